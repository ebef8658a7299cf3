//! String interning for symbol, opcode, and method names.
//!
//! The original system leaned on a process-global unique-string table; here
//! the interner is an explicit object owned by a compile session and shared
//! (frozen behind `Arc`) with everything downstream. Interning requires
//! `&mut`; lookups and resolution are `&self`, so a frozen interner can be
//! queried freely from the runtime.

use rustc_hash::FxHashMap;

/// Handle to an interned string.
///
/// `Istr(0)` is always the empty string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Istr(u32);

impl Istr {
    /// The interned empty string.
    pub const EMPTY: Istr = Istr(0);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl Default for Istr {
    fn default() -> Self {
        Istr::EMPTY
    }
}

/// Deduplicating string store.
#[derive(Debug)]
pub struct Interner {
    strings: Vec<String>,
    lookup: FxHashMap<String, Istr>,
}

impl Interner {
    pub fn new() -> Self {
        let mut interner = Interner {
            strings: Vec::new(),
            lookup: FxHashMap::default(),
        };
        let empty = interner.intern("");
        debug_assert_eq!(empty, Istr::EMPTY);
        interner
    }

    /// Intern a string, returning the existing handle if already present.
    pub fn intern(&mut self, s: &str) -> Istr {
        if let Some(&id) = self.lookup.get(s) {
            return id;
        }
        let id = Istr(self.strings.len() as u32);
        self.strings.push(s.to_string());
        self.lookup.insert(s.to_string(), id);
        id
    }

    /// Look up a string without interning it.
    pub fn get(&self, s: &str) -> Option<Istr> {
        self.lookup.get(s).copied()
    }

    /// Resolve a handle back to its string.
    pub fn resolve(&self, id: Istr) -> &str {
        &self.strings[id.index()]
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        // Slot 0 (the empty string) is always present.
        self.strings.len() <= 1
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_deduplicates() {
        let mut i = Interner::new();
        let a = i.intern("P");
        let b = i.intern("P");
        assert_eq!(a, b);
        assert_eq!(i.resolve(a), "P");
    }

    #[test]
    fn empty_is_slot_zero() {
        let mut i = Interner::new();
        assert_eq!(i.intern(""), Istr::EMPTY);
        assert!(Istr::EMPTY.is_empty());
        assert_eq!(i.resolve(Istr::EMPTY), "");
    }

    #[test]
    fn get_does_not_intern() {
        let mut i = Interner::new();
        assert!(i.get("u").is_none());
        let u = i.intern("u");
        assert_eq!(i.get("u"), Some(u));
    }
}
