//! The path model.
//!
//! A path is an ordered list of name segments, optionally anchored at the
//! global root: a leading `::` sets `global`, and an expression shaped like
//! `a::b::c` flattens into the three-segment path `a.b.c` via
//! [`Path::from_expr`].

use smallvec::SmallVec;
use std::fmt;

use crate::ast::{Expr, ExprKind, UnOp};
use crate::symbol::Symbol;

/// Most paths are a handful of segments (module nesting rarely runs deep),
/// so segments live inline up to 4 entries before spilling to the heap.
pub type Segments = SmallVec<[Symbol; 4]>;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Path {
    segments: Segments,
    global: bool,
}

impl Path {
    #[must_use]
    pub fn new(segments: impl IntoIterator<Item = Symbol>, global: bool) -> Self {
        Path { segments: segments.into_iter().collect(), global }
    }

    #[must_use]
    pub fn root() -> Self {
        Path { segments: Segments::new(), global: true }
    }

    #[must_use]
    pub fn single(name: Symbol) -> Self {
        Path { segments: Segments::from_iter([name]), global: false }
    }

    #[must_use]
    pub fn is_global(&self) -> bool {
        self.global
    }

    #[must_use]
    pub fn segments(&self) -> &[Symbol] {
        &self.segments
    }

    #[must_use]
    pub fn last(&self) -> Option<Symbol> {
        self.segments.last().copied()
    }

    /// Appends a segment, returning the extended path.
    #[must_use]
    pub fn append(&self, name: Symbol) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name);
        Path { segments, global: self.global }
    }

    /// Drops the last segment. A path with no segments has no parent.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Path { segments, global: self.global })
    }

    /// Prefixes `prefix` onto `self`, unless `self` is already anchored at
    /// the global root (a global path ignores any prefix).
    #[must_use]
    pub fn with_prefix(&self, prefix: &Path) -> Self {
        if self.global {
            return self.clone();
        }
        let mut segments = prefix.segments.clone();
        segments.extend(self.segments.iter().copied());
        Path { segments, global: prefix.global }
    }

    /// Converts a parsed expression shaped like a chain of `::`-joined names
    /// (optionally prefixed by a leading `::`) into a path. Returns `None`
    /// for anything else; callers report "not a valid path" themselves so
    /// the message can include context (e.g. which macro argument it was).
    #[must_use]
    pub fn from_expr(expr: &Expr) -> Option<Path> {
        match &expr.kind {
            ExprKind::Name(name) => Some(Path::single(*name)),
            ExprKind::PathConcat(left, right) => {
                let left = Path::from_expr(left)?;
                let right = Path::from_expr(right)?;
                if right.global {
                    return None;
                }
                let mut segments = left.segments;
                segments.extend(right.segments);
                Some(Path { segments, global: left.global })
            }
            ExprKind::Unary(UnOp::GlobalAnchor, inner) => {
                let mut p = Path::from_expr(inner)?;
                p.global = true;
                Some(p)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.global {
            write!(f, "::")?;
        }
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::intern;

    #[test]
    fn append_and_parent_are_inverse() {
        let a = intern("a");
        let b = intern("b");
        let p = Path::single(a).append(b);
        assert_eq!(p.to_string(), "a.b");
        assert_eq!(p.parent().unwrap().to_string(), "a");
    }

    #[test]
    fn global_path_ignores_prefix() {
        let root = intern("root");
        let a = intern("a");
        let mut global = Path::single(a);
        global.global = true;
        let prefixed = global.with_prefix(&Path::single(root));
        assert_eq!(prefixed.to_string(), "::a");
    }

    #[test]
    fn non_global_path_takes_prefix() {
        let root = intern("root");
        let a = intern("a");
        let prefixed = Path::single(a).with_prefix(&Path::single(root));
        assert_eq!(prefixed.to_string(), "root.a");
    }
}
