//! Store keys — a name paired with the node that owns the value.

use std::fmt;

/// Identity of one stored value.
///
/// Immutable after construction: two keys are equal iff both the name and
/// the home node match. The home node is the only node allowed to hold the
/// authoritative copy of the value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub name: String,
    /// Index of the node responsible for holding this key's value.
    pub home: u32,
}

impl Key {
    pub fn new(name: impl Into<String>, home: u32) -> Self {
        Self { name: name.into(), home }
    }

    /// Key name for one flushed column chunk:
    /// base name + column index + chunk index.
    pub fn for_chunk(base: &str, column: u32, chunk: u32, home: u32) -> Self {
        Self {
            name: format!("{base}-c{column}-ck{chunk}"),
            home,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.home)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn equality_requires_both_fields() {
        assert_eq!(Key::new("a", 0), Key::new("a", 0));
        assert_ne!(Key::new("a", 0), Key::new("a", 1));
        assert_ne!(Key::new("a", 0), Key::new("b", 0));
    }

    #[test]
    fn usable_as_a_map_key() {
        let mut map = HashMap::new();
        map.insert(Key::new("x", 2), 7);
        assert_eq!(map.get(&Key::new("x", 2)), Some(&7));
        assert_eq!(map.get(&Key::new("x", 3)), None);
    }

    #[test]
    fn chunk_key_names_are_deterministic() {
        let k = Key::for_chunk("words", 1, 4, 3);
        assert_eq!(k.name, "words-c1-ck4");
        assert_eq!(k.home, 3);
        assert_eq!(k, Key::for_chunk("words", 1, 4, 3));
    }

    #[test]
    fn display_includes_home() {
        assert_eq!(Key::new("col", 5).to_string(), "col@5");
    }
}
