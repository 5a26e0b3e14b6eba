//! Interned property names.
//!
//! Every property name the engine ever sees is interned once into the key
//! table and referred to by a 16-bit key number afterwards; equality is an
//! integer compare and the object hashmap addresses its trie with the key's
//! four nibbles. Key zero is the "no key" sentinel. Keys are never
//! reclaimed; the table lives as long as the engine.

use ahash::RandomState;
use indexmap::IndexSet;

use crate::chars;

bitflags::bitflags! {
    /// Flags accepted by [`KeyTable::make`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct KeyFlags: u8 {
        /// The caller does not guarantee the spelling's lifetime, so the
        /// table must take its own copy. Spellings are always owned here;
        /// the flag is kept so call sites read the same as the lookup
        /// paths that motivated it.
        const COPY_ON_CREATE = 0x01;
    }
}

/// Interned identity of a property name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Key(u16);

macro_rules! well_known_keys {
    ($(($konst:ident, $spelling:literal, $number:literal),)*) => {
        impl Key {
            $(pub(crate) const $konst: Key = Key($number);)*
        }

        /// Spellings interned at table construction, in key-number order.
        const WELL_KNOWN: &[&str] = &[$($spelling,)*];
    };
}

well_known_keys![
    (PROTOTYPE, "prototype", 1),
    (CONSTRUCTOR, "constructor", 2),
    (LENGTH, "length", 3),
    (ARGUMENTS, "arguments", 4),
    (CALLEE, "callee", 5),
    (NAME, "name", 6),
    (MESSAGE, "message", 7),
    (TO_STRING, "toString", 8),
    (VALUE_OF, "valueOf", 9),
    (EVAL, "eval", 10),
    (VALUE, "value", 11),
    (WRITABLE, "writable", 12),
    (ENUMERABLE, "enumerable", 13),
    (CONFIGURABLE, "configurable", 14),
    (GET, "get", 15),
    (SET, "set", 16),
    (JOIN, "join", 17),
    (TO_ISO_STRING, "toISOString", 18),
    (INPUT, "input", 19),
    (INDEX, "index", 20),
    (LAST_INDEX, "lastIndex", 21),
    (GLOBAL, "global", 22),
    (IGNORE_CASE, "ignoreCase", 23),
    (MULTILINE, "multiline", 24),
    (SOURCE, "source", 25),
];

impl Key {
    pub(crate) const NONE: Key = Key(0);

    /// The four trie digits of this key, most significant first.
    #[inline]
    pub(crate) fn nibbles(self) -> [usize; 4] {
        let n = self.0 as usize;
        [(n >> 12) & 0xf, (n >> 8) & 0xf, (n >> 4) & 0xf, n & 0xf]
    }

    #[inline]
    pub(crate) fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Result of interning a spelling: the key, plus a diagnostic for names
/// that are legal but discouraged (numeric-looking spellings that bypass
/// the element store). The operation always succeeds.
pub(crate) struct MadeKey {
    pub key: Key,
    pub warning: Option<String>,
}

/// The engine-scoped intern table: an insertion-ordered set of spellings
/// whose position (plus one, reserving zero for the sentinel) is the key
/// number.
pub(crate) struct KeyTable {
    spellings: IndexSet<Box<str>, RandomState>,
}

impl KeyTable {
    pub(crate) fn new() -> Self {
        let mut table = Self {
            spellings: IndexSet::with_hasher(RandomState::new()),
        };
        for spelling in WELL_KNOWN {
            table.intern(spelling);
        }
        debug_assert_eq!(table.search("prototype"), Some(Key::PROTOTYPE));
        debug_assert_eq!(table.search("source"), Some(Key::SOURCE));
        table
    }

    /// Looks up an existing key by spelling without creating one.
    pub(crate) fn search(&self, spelling: &str) -> Option<Key> {
        self.spellings.get_index_of(spelling).map(|index| Key(index as u16 + 1))
    }

    /// Interns a spelling, reusing the existing key when present.
    pub(crate) fn make(&mut self, spelling: &str, _flags: KeyFlags) -> MadeKey {
        if let Some(key) = self.search(spelling) {
            return MadeKey { key, warning: None };
        }

        let first = spelling.as_bytes().first().copied().unwrap_or(0);
        let numeric_looking = (first.is_ascii_digit() || first == b'-')
            && !chars::scan_binary(spelling, chars::ScanFlags::empty()).is_nan();
        let warning = numeric_looking.then(|| {
            format!(
                "creating identifier '{spelling}'; {} identifier(s) left; \
                 indices beyond 0x{:x} and negative or floating-point property names bypass the element store",
                u16::MAX as usize - self.spellings.len() - 1,
                crate::object::ELEMENT_MAX,
            )
        });

        MadeKey {
            key: self.intern(spelling),
            warning,
        }
    }

    pub(crate) fn make_with_cstring(&mut self, spelling: &str) -> Key {
        self.make(spelling, KeyFlags::empty()).key
    }

    /// The spelling of an allocated key; the sentinel spells as empty.
    pub(crate) fn text_of(&self, key: Key) -> &str {
        if key.is_none() {
            return "";
        }
        self.spellings
            .get_index(key.0 as usize - 1)
            .expect("key numbers index allocated spellings")
    }

    fn intern(&mut self, spelling: &str) -> Key {
        if self.spellings.len() >= u16::MAX as usize {
            // Keys are a finite resource; running out is unrecoverable.
            panic!("key table exhausted: no identifier numbers left");
        }
        let (index, _) = self.spellings.insert_full(Box::from(spelling));
        Key(index as u16 + 1)
    }
}

pub(crate) fn is_equal(a: Key, b: Key) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_keys_have_fixed_numbers() {
        let table = KeyTable::new();
        assert_eq!(table.search("length"), Some(Key::LENGTH));
        assert_eq!(table.text_of(Key::TO_STRING), "toString");
        assert_eq!(table.text_of(Key::LAST_INDEX), "lastIndex");
    }

    #[test]
    fn search_round_trips_every_allocated_key() {
        let mut table = KeyTable::new();
        let a = table.make("alpha", KeyFlags::COPY_ON_CREATE).key;
        let b = table.make("beta", KeyFlags::empty()).key;
        for key in [a, b, Key::PROTOTYPE, Key::SOURCE] {
            assert_eq!(table.search(table.text_of(key).to_owned().as_str()), Some(key));
        }
    }

    #[test]
    fn interning_is_idempotent() {
        let mut table = KeyTable::new();
        let first = table.make("worm", KeyFlags::empty()).key;
        let second = table.make("worm", KeyFlags::COPY_ON_CREATE).key;
        assert!(is_equal(first, second));
    }

    #[test]
    fn nibbles_follow_the_key_number() {
        let key = Key(0x1234);
        assert_eq!(key.nibbles(), [1, 2, 3, 4]);
        assert_eq!(Key::NONE.nibbles(), [0, 0, 0, 0]);
    }

    #[test]
    fn numeric_spellings_warn_but_succeed() {
        let mut table = KeyTable::new();
        let made = table.make("123", KeyFlags::empty());
        assert!(made.warning.is_some());
        assert_eq!(table.text_of(made.key), "123");
        assert!(table.make("-1.5", KeyFlags::empty()).warning.is_some());
        assert!(table.make("12abc", KeyFlags::empty()).warning.is_none());
    }
}
