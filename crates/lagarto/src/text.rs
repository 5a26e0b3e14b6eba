//! Source text views.
//!
//! A [`Text`] is a non-owning `(source, offset, length)` view used for two
//! jobs: op records carry the span they were compiled from (for error
//! reporting), and string values produced directly from source or static
//! storage avoid copying. Views into inputs stay valid because inputs are
//! owned by the engine and never dropped before it.

use crate::input::Inputs;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct TextFlags: u8 {
        /// Marks a statement boundary; the interpreter prefers these spans
        /// when attributing an error to source.
        const BREAK = 0x01;
        /// This view denotes the trailing half of a surrogate pair that a
        /// 16-bit string index split down the middle.
        const LAST_CHUNK = 0x02;
    }
}

/// Where a [`Text`]'s bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TextSrc {
    /// No backing bytes; the view is empty.
    None,
    /// A static string compiled into the engine.
    Static(&'static str),
    /// A registered input, by index.
    Input(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Text {
    pub(crate) src: TextSrc,
    pub(crate) offset: u32,
    pub(crate) length: u32,
    pub(crate) flags: TextFlags,
}

macro_rules! static_texts {
    ($(($konst:ident, $string:literal),)*) => {
        impl Text {
            $(pub(crate) const $konst: Text = Text::from_static($string);)*
        }
    };
}

static_texts![
    (UNDEFINED, "undefined"),
    (NULL, "null"),
    (TRUE, "true"),
    (FALSE, "false"),
    (BOOLEAN, "boolean"),
    (NUMBER, "number"),
    (STRING, "string"),
    (OBJECT, "object"),
    (FUNCTION, "function"),
    (NATIVE_CODE, "[native code]"),
];

impl Text {
    pub(crate) const fn from_static(bytes: &'static str) -> Self {
        Self {
            src: TextSrc::Static(bytes),
            offset: 0,
            length: bytes.len() as u32,
            flags: TextFlags::empty(),
        }
    }

    pub(crate) const fn none() -> Self {
        Self {
            src: TextSrc::None,
            offset: 0,
            length: 0,
            flags: TextFlags::empty(),
        }
    }

    pub(crate) fn in_input(input: u16, offset: u32, length: u32) -> Self {
        Self {
            src: TextSrc::Input(input),
            offset,
            length,
            flags: TextFlags::empty(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Resolves the view to its bytes.
    pub(crate) fn slice<'a>(&self, inputs: &'a Inputs) -> &'a str {
        let (start, end) = (self.offset as usize, (self.offset + self.length) as usize);
        match self.src {
            TextSrc::None => "",
            TextSrc::Static(bytes) => &bytes[start..end],
            TextSrc::Input(id) => &inputs.source(id)[start..end],
        }
    }

    /// The smallest span covering both views. Both sides are expected to
    /// come from the same source; when they do not, the left side wins.
    pub(crate) fn join(a: Text, b: Text) -> Text {
        if a.src == TextSrc::None {
            return b;
        }
        if b.src == TextSrc::None || a.src != b.src {
            return a;
        }
        let start = a.offset.min(b.offset);
        let end = (a.offset + a.length).max(b.offset + b.length);
        Text {
            src: a.src,
            offset: start,
            length: end - start,
            flags: a.flags,
        }
    }
}

/// Decodes the first codepoint of `bytes`, yielding the character and its
/// encoded width. Malformed input never reaches here (inputs are `str`),
/// so the only degenerate case is emptiness.
pub(crate) fn next_character(bytes: &str) -> Option<(char, usize)> {
    let c = bytes.chars().next()?;
    Some((c, c.len_utf8()))
}

/// Decodes the codepoint ending at `bytes`'s end, walking backward over
/// continuation bytes.
pub(crate) fn prev_character(bytes: &str) -> Option<(char, usize)> {
    let c = bytes.chars().next_back()?;
    Some((c, c.len_utf8()))
}

/// ES5 WhiteSpace: tab, VT, FF, space, NBSP, BOM, and Unicode space
/// separators.
pub(crate) fn is_space(c: char) -> bool {
    matches!(
        c,
        '\t' | '\u{b}' | '\u{c}' | ' ' | '\u{a0}' | '\u{feff}'
            | '\u{1680}'
            | '\u{2000}'..='\u{200a}'
            | '\u{202f}'
            | '\u{205f}'
            | '\u{3000}'
    ) || is_line_feed(c)
}

/// ES5 LineTerminator: LF, CR, LS, PS.
pub(crate) fn is_line_feed(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

pub(crate) fn is_digit(c: char) -> bool {
    c.is_ascii_digit()
}

/// Identifier-ish character class used by the word boundary checks.
pub(crate) fn is_word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Number of UTF-16 code units needed for `s`.
pub(crate) fn utf16_length(s: &str) -> usize {
    s.chars().map(char::len_utf16).sum()
}

/// Maps a UTF-16 unit index to `(byte_offset, inside_surrogate_pair)`.
///
/// When the index lands on the low half of a surrogate pair, the byte
/// offset points at the supplementary character and the flag is set; the
/// caller models the trailing half with [`TextFlags::LAST_CHUNK`].
pub(crate) fn byte_offset_of_unit(s: &str, unit_index: usize) -> (usize, bool) {
    let mut units = 0usize;
    for (byte, c) in s.char_indices() {
        if units == unit_index {
            return (byte, false);
        }
        let width = c.len_utf16();
        if width == 2 && units + 1 == unit_index {
            return (byte, true);
        }
        units += width;
    }
    (s.len(), false)
}

/// The UTF-16 code unit at `unit_index`, if in range.
pub(crate) fn unit_at(s: &str, unit_index: usize) -> Option<u16> {
    let mut units = 0usize;
    for c in s.chars() {
        let mut pair = [0u16; 2];
        let encoded = c.encode_utf16(&mut pair);
        for &unit in encoded.iter() {
            if units == unit_index {
                return Some(unit);
            }
            units += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_covers_both_spans() {
        let a = Text::in_input(0, 4, 3);
        let b = Text::in_input(0, 10, 2);
        let joined = Text::join(a, b);
        assert_eq!((joined.offset, joined.length), (4, 8));
    }

    #[test]
    fn walking_is_symmetric() {
        let s = "a\u{2028}é𝄞";
        let (first, w) = next_character(s).unwrap();
        assert_eq!((first, w), ('a', 1));
        let (last, w) = prev_character(s).unwrap();
        assert_eq!((last, w), ('𝄞', 4));
    }

    #[test]
    fn utf16_accounting_handles_surrogates() {
        let s = "a𝄞b";
        assert_eq!(utf16_length(s), 4);
        assert_eq!(unit_at(s, 0), Some(0x61));
        assert_eq!(unit_at(s, 1), Some(0xd834));
        assert_eq!(unit_at(s, 2), Some(0xdd1e));
        assert_eq!(unit_at(s, 3), Some(0x62));
        assert_eq!(byte_offset_of_unit(s, 2), (1, true));
        assert_eq!(byte_offset_of_unit(s, 3), (5, false));
    }

    #[test]
    fn space_classes_follow_es5() {
        for c in ['\t', ' ', '\u{a0}', '\u{feff}', '\u{2028}', '\n'] {
            assert!(is_space(c), "{c:?}");
        }
        assert!(!is_space('\u{200b}'));
        assert!(is_line_feed('\u{2029}'));
        assert!(!is_line_feed('\t'));
    }
}
