//! Identifier interning.
//!
//! Every name the lexer produces is interned into a small integer. Interned
//! strings are bump-allocated once and never freed for the lifetime of the
//! process, so a [`Symbol`] is `Copy` and comparing two symbols is comparing
//! two `u32`s.

use bumpalo::Bump;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(u32);

impl Symbol {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        INTERNER.with(|i| i.borrow().strings[self.0 as usize])
    }

    #[must_use]
    pub fn into_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

struct Interner {
    // Safety: every `&'static str` below borrows from `arena`, which is
    // never truncated or dropped while any `Symbol` referring into it is
    // alive (the interner, and hence the arena, lives for the process).
    arena: Bump,
    map: HashMap<&'static str, Symbol>,
    strings: Vec<&'static str>,
}

impl Interner {
    fn new() -> Self {
        Interner { arena: Bump::new(), map: HashMap::new(), strings: Vec::new() }
    }

    fn intern(&mut self, s: &str) -> Symbol {
        if let Some(&sym) = self.map.get(s) {
            return sym;
        }
        let allocated: &str = self.arena.alloc_str(s);
        // Safety: see the comment on `arena` above.
        let allocated: &'static str = unsafe { std::mem::transmute::<&str, &'static str>(allocated) };
        let sym = Symbol(self.strings.len() as u32);
        self.strings.push(allocated);
        self.map.insert(allocated, sym);
        sym
    }
}

thread_local! {
    static INTERNER: RefCell<Interner> = RefCell::new(Interner::new());
}

/// Interns `s`, returning the same [`Symbol`] for equal strings.
#[must_use]
pub fn intern(s: &str) -> Symbol {
    INTERNER.with(|i| i.borrow_mut().intern(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_strings_intern_to_the_same_symbol() {
        let a = intern("foo");
        let b = intern("foo");
        let c = intern("bar");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str(), "foo");
    }
}
