//! The pull lexer.
//!
//! `next_token` consumes bytes from a registered input and returns one
//! token tag, leaving the token's source span in `text` and any computed
//! payload (identifier key, number, unescaped string) in `value`. The
//! parser flips the `allow_regex` / `disallow_keyword` /
//! `allow_unicode_outside_literal` switches around the grammar positions
//! that need them.

use std::rc::Rc;

use strum::Display;

use crate::{
    chars::{self, Append, ScanFlags, ScanInt},
    engine::Engine,
    key::Key,
    text::{self, Text},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub(crate) enum Token {
    /// End of input.
    No,
    /// A syntax error was recorded; the parser propagates it.
    Error,

    Null,
    True,
    False,
    Integer,
    Binary,
    String,
    EscapedString,
    Identifier,
    Regexp,

    Break,
    Case,
    Catch,
    Continue,
    Debugger,
    Default,
    Delete,
    Do,
    Else,
    Finally,
    For,
    Function,
    If,
    In,
    InstanceOf,
    New,
    Return,
    Switch,
    This,
    Throw,
    Try,
    TypeOf,
    Var,
    Void,
    With,
    While,

    Equal,
    NotEqual,
    Identical,
    NotIdentical,
    LeftShiftAssign,
    RightShiftAssign,
    UnsignedRightShiftAssign,
    LeftShift,
    RightShift,
    UnsignedRightShift,
    LessOrEqual,
    MoreOrEqual,
    Increment,
    Decrement,
    LogicalAnd,
    LogicalOr,
    AddAssign,
    MinusAssign,
    MultiplyAssign,
    DivideAssign,
    ModuloAssign,
    AndAssign,
    OrAssign,
    XorAssign,

    OpenBrace,
    CloseBrace,
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    Semicolon,
    Comma,
    Dot,
    Question,
    Colon,
    Tilde,
    Assign,
    Not,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Less,
    More,
}

const KEYWORDS: &[(&str, Token)] = &[
    ("break", Token::Break),
    ("case", Token::Case),
    ("catch", Token::Catch),
    ("continue", Token::Continue),
    ("debugger", Token::Debugger),
    ("default", Token::Default),
    ("delete", Token::Delete),
    ("do", Token::Do),
    ("else", Token::Else),
    ("finally", Token::Finally),
    ("for", Token::For),
    ("function", Token::Function),
    ("if", Token::If),
    ("in", Token::In),
    ("instanceof", Token::InstanceOf),
    ("new", Token::New),
    ("return", Token::Return),
    ("switch", Token::Switch),
    ("typeof", Token::TypeOf),
    ("throw", Token::Throw),
    ("try", Token::Try),
    ("var", Token::Var),
    ("void", Token::Void),
    ("while", Token::While),
    ("with", Token::With),
    ("null", Token::Null),
    ("true", Token::True),
    ("false", Token::False),
    ("this", Token::This),
];

const RESERVED: &[&str] = &[
    "class", "enum", "extends", "super", "const", "export", "import", "implements", "let", "private", "public",
    "interface", "package", "protected", "static", "yield",
];

/// Computed payload of the last token.
#[derive(Debug, Clone, Default)]
pub(crate) enum TokenValue {
    #[default]
    None,
    Key(Key),
    Integer(i32),
    Binary(f64),
    /// Unescaped content of an `EscapedString` token.
    String(String),
}

pub(crate) struct Lexer {
    source: Rc<str>,
    input_id: u16,
    offset: usize,
    token_start: usize,
    pub text: Text,
    pub value: TokenValue,
    pub did_line_break: bool,
    pub allow_regex: bool,
    pub allow_unicode_outside_literal: bool,
    pub disallow_keyword: bool,
    /// First scan error; the parser surfaces it as a SyntaxError.
    pub error: Option<String>,
}

impl Lexer {
    pub(crate) fn new(source: Rc<str>, input_id: u16) -> Self {
        Self {
            source,
            input_id,
            offset: 0,
            token_start: 0,
            text: Text::in_input(input_id, 0, 0),
            value: TokenValue::None,
            did_line_break: false,
            allow_regex: false,
            allow_unicode_outside_literal: false,
            disallow_keyword: false,
            error: None,
        }
    }

    /// Byte offset of the cursor; the parser uses this to rewind one token
    /// when it re-lexes a `/` as a regex literal.
    pub(crate) fn rewind_to(&mut self, offset: usize) {
        self.offset = offset;
    }

    pub(crate) fn token_offset(&self) -> usize {
        self.token_start
    }

    fn eof(&self) -> bool {
        self.offset >= self.source.len()
    }

    fn peek(&self) -> Option<char> {
        self.source[self.offset..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.offset += c.len_utf8();
        if text::is_line_feed(c) {
            // CRLF counts once; the break flag only matters per token.
            self.did_line_break = true;
        }
        Some(c)
    }

    fn accept(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.offset += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn span(&self) -> &str {
        &self.source[self.token_start..self.offset]
    }

    fn set_text(&mut self, start: usize, length: usize) {
        self.text = Text::in_input(self.input_id, start as u32, length as u32);
    }

    fn fail(&mut self, message: impl Into<String>) -> Token {
        self.set_text(self.token_start, self.offset - self.token_start);
        self.error = Some(message.into());
        Token::Error
    }

    /// Scans and returns the next token.
    pub(crate) fn next_token(&mut self, vm: &mut Engine) -> Token {
        self.value = TokenValue::None;
        self.did_line_break = false;
        let token = self.scan(vm);
        if !matches!(token, Token::Error) {
            // Errors position the text themselves.
            if matches!(token, Token::String | Token::EscapedString) {
                // Text spans the content between the quotes.
            } else {
                self.set_text(self.token_start, self.offset - self.token_start);
            }
        }
        token
    }

    fn scan(&mut self, vm: &mut Engine) -> Token {
        loop {
            self.token_start = self.offset;
            let Some(c) = self.bump() else {
                self.set_text(self.offset, 0);
                return Token::No;
            };

            return match c {
                c if text::is_space(c) => continue,
                '/' => match self.scan_slash() {
                    Some(token) => token,
                    None => continue,
                },
                '\'' | '"' => self.scan_string(c),
                '.' => {
                    if self.peek().is_some_and(text::is_digit) {
                        self.scan_number(c)
                    } else {
                        Token::Dot
                    }
                }
                '0'..='9' => self.scan_number(c),
                '{' => Token::OpenBrace,
                '}' => Token::CloseBrace,
                '(' => Token::OpenParen,
                ')' => Token::CloseParen,
                '[' => Token::OpenBracket,
                ']' => Token::CloseBracket,
                ';' => Token::Semicolon,
                ',' => Token::Comma,
                '~' => Token::Tilde,
                '?' => Token::Question,
                ':' => Token::Colon,
                '^' => {
                    if self.accept('=') {
                        Token::XorAssign
                    } else {
                        Token::Caret
                    }
                }
                '%' => {
                    if self.accept('=') {
                        Token::ModuloAssign
                    } else {
                        Token::Percent
                    }
                }
                '*' => {
                    if self.accept('=') {
                        Token::MultiplyAssign
                    } else {
                        Token::Star
                    }
                }
                '=' => {
                    if self.accept('=') {
                        if self.accept('=') {
                            Token::Identical
                        } else {
                            Token::Equal
                        }
                    } else {
                        Token::Assign
                    }
                }
                '!' => {
                    if self.accept('=') {
                        if self.accept('=') {
                            Token::NotIdentical
                        } else {
                            Token::NotEqual
                        }
                    } else {
                        Token::Not
                    }
                }
                '+' => {
                    if self.accept('+') {
                        Token::Increment
                    } else if self.accept('=') {
                        Token::AddAssign
                    } else {
                        Token::Plus
                    }
                }
                '-' => {
                    if self.accept('-') {
                        Token::Decrement
                    } else if self.accept('=') {
                        Token::MinusAssign
                    } else {
                        Token::Minus
                    }
                }
                '&' => {
                    if self.accept('&') {
                        Token::LogicalAnd
                    } else if self.accept('=') {
                        Token::AndAssign
                    } else {
                        Token::Amp
                    }
                }
                '|' => {
                    if self.accept('|') {
                        Token::LogicalOr
                    } else if self.accept('=') {
                        Token::OrAssign
                    } else {
                        Token::Pipe
                    }
                }
                '<' => {
                    if self.accept('<') {
                        if self.accept('=') {
                            Token::LeftShiftAssign
                        } else {
                            Token::LeftShift
                        }
                    } else if self.accept('=') {
                        Token::LessOrEqual
                    } else {
                        Token::Less
                    }
                }
                '>' => {
                    if self.accept('>') {
                        if self.accept('>') {
                            if self.accept('=') {
                                Token::UnsignedRightShiftAssign
                            } else {
                                Token::UnsignedRightShift
                            }
                        } else if self.accept('=') {
                            Token::RightShiftAssign
                        } else {
                            Token::RightShift
                        }
                    } else if self.accept('=') {
                        Token::MoreOrEqual
                    } else {
                        Token::More
                    }
                }
                c => self.scan_word(vm, c),
            };
        }
    }

    /// `/`-family: comments, regex literals (when the parser allows them),
    /// `/=`, or plain division. `None` means "skipped a comment, go again".
    fn scan_slash(&mut self) -> Option<Token> {
        if self.accept('*') {
            while !self.eof() {
                if self.bump() == Some('*') && self.accept('/') {
                    return None;
                }
            }
            return Some(self.fail("unterminated comment"));
        }
        if self.peek() == Some('/') {
            while let Some(c) = self.bump() {
                if c == '\r' || c == '\n' {
                    return None;
                }
            }
            return Some(Token::No);
        }
        if self.allow_regex {
            while !self.eof() {
                let c = self.bump();
                match c {
                    Some('\\') => {
                        self.bump();
                    }
                    Some('/') => {
                        while self.peek().is_some_and(|p| p.is_ascii_alphanumeric() || p == '\\') {
                            self.bump();
                        }
                        return Some(Token::Regexp);
                    }
                    Some('\n') => break,
                    _ => {}
                }
            }
            return Some(self.fail("unterminated regexp literal"));
        }
        if self.accept('=') {
            return Some(Token::DivideAssign);
        }
        Some(Token::Slash)
    }

    fn scan_string(&mut self, quote: char) -> Token {
        let content_start = self.offset;
        let mut have_escape = false;
        let saved_line_break = self.did_line_break;

        while let Some(c) = self.bump() {
            if c == '\\' {
                have_escape = true;
                self.bump();
                // An escaped newline is a continuation, not a break.
                self.did_line_break = saved_line_break;
            } else if c == quote {
                let content_end = self.offset - 1;
                self.set_text(content_start, content_end - content_start);
                if have_escape {
                    return self.unescape_string(content_start, content_end);
                }
                return Token::String;
            } else if c == '\r' || c == '\n' {
                break;
            }
        }
        self.fail("unterminated string literal")
    }

    fn unescape_string(&mut self, start: usize, end: usize) -> Token {
        let source = Rc::clone(&self.source);
        let bytes = &source[start..end];
        let mut out = Append::begin();
        let mut iter = bytes.char_indices().peekable();

        while let Some((index, c)) = iter.next() {
            if c != '\\' {
                out.push_char(c);
                continue;
            }
            let Some((_, escape)) = iter.next() else {
                break;
            };
            match escape {
                '0' => out.push_char('\0'),
                'b' => out.push_char('\u{8}'),
                'f' => out.push_char('\u{c}'),
                'n' => out.push_char('\n'),
                'r' => out.push_char('\r'),
                't' => out.push_char('\t'),
                'v' => out.push_char('\u{b}'),
                'x' => {
                    let rest = &bytes[index + 2..];
                    if let Some(value) = hex_escape(rest, 2) {
                        out.push_codepoint(value);
                        iter.nth(1);
                    } else {
                        self.set_text(start + index, 4.min(end - start - index));
                        self.error = Some("malformed hexadecimal character escape sequence".to_owned());
                        return Token::Error;
                    }
                }
                'u' => {
                    let rest = &bytes[index + 2..];
                    if let Some(value) = hex_escape(rest, 4) {
                        out.push_codepoint(value);
                        iter.nth(3);
                    } else {
                        self.set_text(start + index, 6.min(end - start - index));
                        self.error = Some("malformed Unicode character escape sequence".to_owned());
                        return Token::Error;
                    }
                }
                '\r' => {
                    // Line continuation; a CRLF pair counts once.
                    if matches!(iter.peek(), Some((_, '\n'))) {
                        iter.next();
                    }
                }
                '\n' => {}
                other => out.push_char(other),
            }
        }

        self.value = TokenValue::String(out.into_string());
        Token::EscapedString
    }

    fn scan_number(&mut self, first: char) -> Token {
        let mut binary = false;

        if first == '0' && (self.accept('x') || self.accept('X')) {
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.bump();
            }
            if self.offset - self.token_start <= 2 {
                return self.fail("missing hexadecimal digits after '0x'");
            }
        } else {
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
            if first == '.' || self.accept('.') {
                binary = true;
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
            if self.accept('e') || self.accept('E') {
                binary = true;
                if !self.accept('+') {
                    self.accept('-');
                }
                if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    return self.fail("missing exponent");
                }
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }

        if self.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
            self.token_start = self.offset;
            self.bump();
            return self.fail("identifier starts immediately after numeric literal");
        }

        if binary {
            self.value = TokenValue::Binary(chars::scan_binary(self.span(), ScanFlags::empty()));
            Token::Binary
        } else {
            match chars::scan_integer(self.span(), 0, ScanFlags::empty()) {
                ScanInt::Integer(i) => {
                    self.value = TokenValue::Integer(i);
                    Token::Integer
                }
                ScanInt::Binary(b) => {
                    self.value = TokenValue::Binary(b);
                    Token::Binary
                }
            }
        }
    }

    fn scan_word(&mut self, vm: &mut Engine, first: char) -> Token {
        let unicode_ok = self.allow_unicode_outside_literal;
        let starts_identifier =
            first.is_ascii_alphabetic() || first == '$' || first == '_' || (unicode_ok && (first == '\\' || !first.is_ascii()));

        if !starts_identifier {
            return if !first.is_ascii() {
                self.fail(format!("invalid character '{first}'"))
            } else if first.is_ascii_graphic() {
                self.fail(format!("invalid character '{first}'"))
            } else {
                self.fail(format!("invalid character '\\{}'", first as u32))
            };
        }

        let mut have_escape = first == '\\';
        loop {
            match self.peek() {
                Some(c) if text::is_word(c) || (unicode_ok && (c == '\\' || !c.is_ascii())) => {
                    if c == '\\' {
                        have_escape = true;
                    }
                    self.bump();
                }
                _ => break,
            }
        }

        let source = Rc::clone(&self.source);
        let word = &source[self.token_start..self.offset];

        if have_escape {
            let mut decoded = Append::begin();
            let mut iter = word.char_indices().peekable();
            while let Some((index, c)) = iter.next() {
                if c == '\\' && matches!(iter.peek(), Some((_, 'u'))) {
                    if let Some(value) = hex_escape(&word[index + 2..], 4) {
                        decoded.push_codepoint(value);
                        iter.nth(4);
                        continue;
                    }
                    return self.fail("incomplete unicode escape");
                }
                decoded.push_char(c);
            }
            let name = decoded.into_string();
            self.value = TokenValue::Key(vm.make_key(&name));
            return Token::Identifier;
        }

        if !self.disallow_keyword {
            for (name, token) in KEYWORDS {
                if *name == word {
                    return *token;
                }
            }
            for name in RESERVED {
                if *name == word {
                    return self.fail(format!("'{name}' is a reserved identifier"));
                }
            }
        }

        self.value = TokenValue::Key(vm.make_key(word));
        Token::Identifier
    }
}

fn hex_escape(bytes: &str, width: usize) -> Option<u32> {
    if bytes.len() < width || !bytes.as_bytes()[..width].iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    u32::from_str_radix(&bytes[..width], 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(source: &str) -> (Vec<Token>, Engine) {
        let mut vm = Engine::new();
        let id = vm.inputs.add("test.js", source.to_owned());
        let mut lexer = Lexer::new(vm.inputs.get(id).bytes.clone(), id);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token(&mut vm);
            if matches!(token, Token::No | Token::Error) {
                tokens.push(token);
                break;
            }
            tokens.push(token);
        }
        (tokens, vm)
    }

    #[test]
    fn operators_and_punctuation() {
        let (tokens, _) = lex_all(">>>= === !== && ++ <<");
        assert_eq!(
            tokens,
            vec![
                Token::UnsignedRightShiftAssign,
                Token::Identical,
                Token::NotIdentical,
                Token::LogicalAnd,
                Token::Increment,
                Token::LeftShift,
                Token::No,
            ]
        );
    }

    #[test]
    fn keywords_and_identifiers() {
        let (tokens, _) = lex_all("var x = typeof null");
        assert_eq!(
            tokens,
            vec![Token::Var, Token::Identifier, Token::Assign, Token::TypeOf, Token::Null, Token::No]
        );
    }

    #[test]
    fn reserved_words_error() {
        let (tokens, _) = lex_all("class");
        assert_eq!(*tokens.last().unwrap(), Token::Error);
    }

    #[test]
    fn numbers_narrow_to_integers() {
        let mut vm = Engine::new();
        let id = vm.inputs.add("t.js", "42 4.5 0x10 1e3".to_owned());
        let mut lexer = Lexer::new(vm.inputs.get(id).bytes.clone(), id);

        assert_eq!(lexer.next_token(&mut vm), Token::Integer);
        assert!(matches!(lexer.value, TokenValue::Integer(42)));
        assert_eq!(lexer.next_token(&mut vm), Token::Binary);
        assert!(matches!(lexer.value, TokenValue::Binary(b) if b == 4.5));
        assert_eq!(lexer.next_token(&mut vm), Token::Integer);
        assert!(matches!(lexer.value, TokenValue::Integer(16)));
        assert_eq!(lexer.next_token(&mut vm), Token::Binary);
        assert!(matches!(lexer.value, TokenValue::Binary(b) if b == 1000.0));
    }

    #[test]
    fn identifier_after_number_is_an_error() {
        let (tokens, _) = lex_all("3px");
        assert_eq!(*tokens.last().unwrap(), Token::Error);
    }

    #[test]
    fn strings_split_into_raw_and_escaped() {
        let mut vm = Engine::new();
        let id = vm.inputs.add("t.js", r#"'plain' 'a\nb' "\x41q""#.to_owned());
        let mut lexer = Lexer::new(vm.inputs.get(id).bytes.clone(), id);

        assert_eq!(lexer.next_token(&mut vm), Token::String);
        assert_eq!(lexer.text.slice(&vm.inputs), "plain");

        assert_eq!(lexer.next_token(&mut vm), Token::EscapedString);
        assert!(matches!(&lexer.value, TokenValue::String(s) if s == "a\nb"));

        assert_eq!(lexer.next_token(&mut vm), Token::EscapedString);
        assert!(matches!(&lexer.value, TokenValue::String(s) if s == "Aq"));
    }

    #[test]
    fn line_breaks_set_the_asi_flag() {
        let mut vm = Engine::new();
        let id = vm.inputs.add("t.js", "a\nb".to_owned());
        let mut lexer = Lexer::new(vm.inputs.get(id).bytes.clone(), id);
        assert_eq!(lexer.next_token(&mut vm), Token::Identifier);
        assert!(!lexer.did_line_break);
        assert_eq!(lexer.next_token(&mut vm), Token::Identifier);
        assert!(lexer.did_line_break);
    }

    #[test]
    fn comments_are_skipped() {
        let (tokens, _) = lex_all("1 /* two */ 3 // four");
        assert_eq!(tokens, vec![Token::Integer, Token::Integer, Token::No]);
    }
}
