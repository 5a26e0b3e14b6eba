//! Registered source inputs.
//!
//! An input owns the original source bytes for the lifetime of the engine,
//! a line-offset table for diagnostics, and a list of attached values —
//! parse-time literals (escaped strings, identifier keys) whose lifetime
//! is pinned to the input rather than to any particular activation.

use std::rc::Rc;

use crate::{
    exception::CodeLoc,
    text::{Text, TextSrc},
    value::Value,
};

#[derive(Debug)]
pub(crate) struct Input {
    pub name: String,
    /// Shared so the lexer can hold the source while the parser mutates
    /// the engine.
    pub bytes: Rc<str>,
    /// Byte offset of each line start; index 0 is always 0.
    pub lines: Vec<u32>,
    /// Values kept alive for as long as the input is registered.
    pub attached: Vec<Value>,
}

impl Input {
    fn new(name: String, bytes: String) -> Self {
        let mut lines = vec![0u32];
        let mut chars = bytes.char_indices().peekable();
        while let Some((offset, c)) = chars.next() {
            match c {
                '\r' => {
                    let next = chars.peek().map_or(offset + 1, |(next, _)| *next);
                    if bytes[next..].starts_with('\n') {
                        continue;
                    }
                    lines.push((offset + 1) as u32);
                }
                '\n' => lines.push((offset + 1) as u32),
                '\u{2028}' | '\u{2029}' => lines.push((offset + c.len_utf8()) as u32),
                _ => {}
            }
        }
        Self {
            name,
            bytes: Rc::from(bytes.as_str()),
            lines,
            attached: Vec::new(),
        }
    }

    /// 1-based line number and the line's span for a byte offset.
    pub(crate) fn line_of(&self, offset: u32) -> (u32, std::ops::Range<usize>) {
        let line_index = match self.lines.binary_search(&offset) {
            Ok(exact) => exact,
            Err(insertion) => insertion.saturating_sub(1),
        };
        let start = self.lines[line_index] as usize;
        let end = self
            .lines
            .get(line_index + 1)
            .map_or(self.bytes.len(), |&next| (next as usize).min(self.bytes.len()));
        (line_index as u32 + 1, start..end)
    }

    pub(crate) fn attach_value(&mut self, value: Value) -> Value {
        self.attached.push(value);
        value
    }
}

#[derive(Debug, Default)]
pub(crate) struct Inputs {
    list: Vec<Input>,
}

impl Inputs {
    pub(crate) fn add(&mut self, name: &str, source: String) -> u16 {
        assert!(self.list.len() < u16::MAX as usize, "too many inputs registered");
        self.list.push(Input::new(name.to_owned(), source));
        (self.list.len() - 1) as u16
    }

    pub(crate) fn source(&self, id: u16) -> &str {
        &self.list[id as usize].bytes
    }

    pub(crate) fn get(&self, id: u16) -> &Input {
        &self.list[id as usize]
    }

    pub(crate) fn get_mut(&mut self, id: u16) -> &mut Input {
        &mut self.list[id as usize]
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Input> {
        self.list.iter()
    }

    /// Locates the input a text view points into.
    pub(crate) fn find_input(&self, text: &Text) -> Option<u16> {
        match text.src {
            TextSrc::Input(id) => Some(id),
            _ => None,
        }
    }

    /// Resolves a span to a host-facing location.
    pub(crate) fn location(&self, text: &Text) -> Option<CodeLoc> {
        let id = self.find_input(text)?;
        let input = self.get(id);
        let (line, span) = input.line_of(text.offset);
        Some(CodeLoc {
            input: input.name.clone(),
            line,
            column: text.offset - span.start as u32,
        })
    }

    /// Renders `name:line`, the offending line, and a caret run under the
    /// span, for uncaught-exception reporting.
    pub(crate) fn render_context(&self, text: &Text) -> Option<String> {
        let id = self.find_input(text)?;
        let input = self.get(id);
        let (line, span) = input.line_of(text.offset);
        let line_text = input.bytes[span.clone()].trim_end_matches(['\n', '\r']);
        let column = (text.offset as usize).saturating_sub(span.start);
        let width = (text.length as usize).clamp(1, line_text.len().saturating_sub(column).max(1));
        let mut out = format!("{}:{line}\n{line_text}\n", input.name);
        out.extend(std::iter::repeat_n(' ', column));
        out.extend(std::iter::repeat_n('^', width));
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_table_tracks_all_terminators() {
        let mut inputs = Inputs::default();
        let id = inputs.add("t.js", "a\nb\r\nc\u{2028}d".to_owned());
        let input = inputs.get(id);
        assert_eq!(input.lines, vec![0, 2, 5, 9]);
        assert_eq!(input.line_of(0).0, 1);
        assert_eq!(input.line_of(2).0, 2);
        assert_eq!(input.line_of(5).0, 3);
        assert_eq!(input.line_of(9).0, 4);
    }

    #[test]
    fn render_context_points_at_the_span() {
        let mut inputs = Inputs::default();
        let id = inputs.add("t.js", "var x = boom;\n".to_owned());
        let text = Text::in_input(id, 8, 4);
        let rendered = inputs.render_context(&text).unwrap();
        assert_eq!(rendered, "t.js:1\nvar x = boom;\n        ^^^^");
    }
}
