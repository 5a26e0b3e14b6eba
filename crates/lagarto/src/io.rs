use std::io::Write as _;

/// Trait for the engine's warning and diagnostic stream.
///
/// The key table's discouraged-name warnings and the uncaught-exception
/// reporter emit one-line diagnostics through this hook. The default
/// implementation writes to stderr; embedders that want to capture or
/// suppress diagnostics install their own writer via
/// [`crate::Engine::set_env_writer`].
pub trait EnvWriter {
    /// Called once per diagnostic line, without a trailing newline.
    fn write_diag(&mut self, line: &str);
}

/// Default `EnvWriter` that writes each diagnostic to stderr.
#[derive(Debug, Default)]
pub struct StderrEnv;

impl EnvWriter for StderrEnv {
    fn write_diag(&mut self, line: &str) {
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{line}");
    }
}

/// `EnvWriter` that collects diagnostics in memory, for tests and hosts
/// that surface warnings through their own channels.
#[derive(Debug, Default)]
pub struct CollectEnv {
    /// Collected diagnostic lines, in emission order.
    pub lines: Vec<String>,
}

impl EnvWriter for CollectEnv {
    fn write_diag(&mut self, line: &str) {
        self.lines.push(line.to_owned());
    }
}
