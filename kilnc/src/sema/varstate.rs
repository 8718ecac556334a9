//! The per-variable use-state model.
//!
//! Three flags (`is_undefined`, `was_defined`, `was_read`) whose
//! exactly-one-set combination is a "definitely-X" state, and whose OR-join
//! at branch merges produces the "maybe-X" states. A primitive's flags never
//! have more than one set except transiently at a join; a compound's
//! "definitely" queries fold by conjunction across fields, "maybe" queries
//! by disjunction, with the empty-struct case vacuously "definitely-defined".

use hashbrown::HashMap;

use crate::diag::Range;
use crate::symbol::Symbol;

#[derive(Clone, Debug)]
pub struct PrimState {
    pub is_undefined: bool,
    pub was_defined: bool,
    pub was_read: bool,
    pub defined_pos: Option<Range>,
    pub read_pos: Option<Range>,
}

impl PrimState {
    #[must_use]
    pub fn undefined() -> Self {
        PrimState { is_undefined: true, was_defined: false, was_read: false, defined_pos: None, read_pos: None }
    }

    pub fn make_definitely_defined(&mut self, pos: Range) {
        self.is_undefined = false;
        self.was_defined = true;
        self.was_read = false;
        self.defined_pos = Some(pos);
        self.read_pos = None;
    }

    pub fn make_definitely_read(&mut self, pos: Range) {
        self.is_undefined = false;
        self.was_defined = false;
        self.was_read = true;
        self.defined_pos = None;
        self.read_pos = Some(pos);
    }

    pub fn make_definitely_moved(&mut self, pos: Range) {
        // Moved-away storage is neither defined nor readable again; modeled
        // as the undefined state with the move's range remembered as the
        // "defined_pos" so a later definite-undefined diagnostic can point
        // at the move site.
        self.is_undefined = true;
        self.was_defined = false;
        self.was_read = false;
        self.defined_pos = Some(pos);
        self.read_pos = None;
    }

    #[must_use]
    pub fn is_definitely_undefined(&self) -> bool {
        self.is_undefined && !self.was_defined && !self.was_read
    }

    #[must_use]
    pub fn is_definitely_defined(&self) -> bool {
        !self.is_undefined && self.was_defined && !self.was_read
    }

    #[must_use]
    pub fn is_maybe_undefined(&self) -> bool {
        self.is_undefined
    }

    #[must_use]
    pub fn is_maybe_defined(&self) -> bool {
        self.was_defined
    }

    /// Branch-join disjunction: flags OR together; the later
    /// source-order range wins on each positional field.
    #[must_use]
    pub fn join(&self, other: &PrimState) -> PrimState {
        PrimState {
            is_undefined: self.is_undefined || other.is_undefined,
            was_defined: self.was_defined || other.was_defined,
            was_read: self.was_read || other.was_read,
            defined_pos: later(&self.defined_pos, &other.defined_pos),
            read_pos: later(&self.read_pos, &other.read_pos),
        }
    }
}

fn later(a: &Option<Range>, b: &Option<Range>) -> Option<Range> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if (a.line, a.col) >= (b.line, b.col) { a.clone() } else { b.clone() }),
        (Some(a), None) => Some(a.clone()),
        (None, Some(b)) => Some(b.clone()),
        (None, None) => None,
    }
}

/// A variable's full state: one [`PrimState`] per leaf (itself, for a
/// primitive; `parent.field` for each field of a struct, recursively), plus
/// the set of field names directly owned at this level for aggregate
/// queries.
#[derive(Clone, Debug)]
pub struct VarState {
    pub leaf: Option<PrimState>,
    pub fields: Vec<(Symbol, VarState)>,
}

impl VarState {
    #[must_use]
    pub fn primitive() -> Self {
        VarState { leaf: Some(PrimState::undefined()), fields: Vec::new() }
    }

    #[must_use]
    pub fn compound(fields: Vec<(Symbol, VarState)>) -> Self {
        VarState { leaf: None, fields }
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.leaf.is_some()
    }

    pub fn make_definitely_defined(&mut self, pos: &Range) {
        if let Some(leaf) = &mut self.leaf {
            leaf.make_definitely_defined(pos.clone());
        }
        for (_, child) in &mut self.fields {
            child.make_definitely_defined(pos);
        }
    }

    pub fn make_definitely_read(&mut self, pos: &Range) {
        if let Some(leaf) = &mut self.leaf {
            leaf.make_definitely_read(pos.clone());
        }
        for (_, child) in &mut self.fields {
            child.make_definitely_read(pos);
        }
    }

    pub fn make_definitely_moved(&mut self, pos: &Range) {
        if let Some(leaf) = &mut self.leaf {
            leaf.make_definitely_moved(pos.clone());
        }
        for (_, child) in &mut self.fields {
            child.make_definitely_moved(pos);
        }
    }

    /// The empty struct is vacuously "definitely undefined" = false (the
    /// original's comment: "empty structs are always defined").
    #[must_use]
    pub fn is_definitely_undefined(&self) -> bool {
        match &self.leaf {
            Some(l) => l.is_definitely_undefined(),
            None => {
                if self.fields.is_empty() {
                    return false;
                }
                self.fields.iter().all(|(_, c)| c.is_definitely_undefined())
            }
        }
    }

    #[must_use]
    pub fn is_definitely_defined(&self) -> bool {
        match &self.leaf {
            Some(l) => l.is_definitely_defined(),
            None => self.fields.iter().all(|(_, c)| c.is_definitely_defined()),
        }
    }

    #[must_use]
    pub fn is_maybe_undefined(&self) -> bool {
        match &self.leaf {
            Some(l) => l.is_maybe_undefined(),
            None => self.fields.iter().any(|(_, c)| c.is_maybe_undefined()),
        }
    }

    #[must_use]
    pub fn is_maybe_defined(&self) -> bool {
        match &self.leaf {
            Some(l) => l.is_maybe_defined(),
            None => self.fields.iter().any(|(_, c)| c.is_maybe_defined()),
        }
    }

    /// A struct's aggregate state is recomputed from its already-joined
    /// fields rather than joined again at the aggregate level. Primitive
    /// leaves join normally.
    #[must_use]
    pub fn join(&self, other: &VarState) -> VarState {
        match (&self.leaf, &other.leaf) {
            (Some(a), Some(b)) => VarState { leaf: Some(a.join(b)), fields: Vec::new() },
            _ => {
                let fields = self
                    .fields
                    .iter()
                    .zip(other.fields.iter())
                    .map(|((name, a), (_, b))| (*name, a.join(b)))
                    .collect();
                VarState { leaf: None, fields }
            }
        }
    }

    pub fn field_mut(&mut self, name: Symbol) -> Option<&mut VarState> {
        self.fields.iter_mut().find(|(n, _)| *n == name).map(|(_, s)| s)
    }
}

/// The per-function table of live variable states, keyed by flat storage
/// name. A stack of snapshots backs scope entry/exit.
#[derive(Default)]
pub struct VarTable {
    states: HashMap<Symbol, VarState>,
    snapshots: Vec<HashMap<Symbol, VarState>>,
}

impl VarTable {
    #[must_use]
    pub fn new() -> Self {
        VarTable::default()
    }

    pub fn declare(&mut self, name: Symbol, state: VarState) {
        self.states.insert(name, state);
    }

    #[must_use]
    pub fn contains(&self, name: Symbol) -> bool {
        self.states.contains_key(&name)
    }

    pub fn get(&self, name: Symbol) -> Option<&VarState> {
        self.states.get(&name)
    }

    pub fn get_mut(&mut self, name: Symbol) -> Option<&mut VarState> {
        self.states.get_mut(&name)
    }

    /// Scope entry: snapshot every live state, after transitioning
    /// definitely-defined states into definitely-read (: "the act
    /// of entering an inner scope is treated as a potential use site").
    pub fn enter_scope(&mut self, pos: &Range) {
        for state in self.states.values_mut() {
            if state.is_definitely_defined() {
                state.make_definitely_read(pos);
            }
        }
        self.snapshots.push(self.states.clone());
    }

    /// Plain-block exit: the post-scope state simply replaces
    /// the pre-scope snapshot; the snapshot is discarded.
    pub fn exit_scope_block(&mut self) {
        self.snapshots.pop();
    }

    /// Branch exit (if/while bodies, ): join pre-scope and
    /// post-scope states with the disjunction in [`VarState::join`].
    pub fn exit_scope_branch(&mut self) {
        let Some(pre) = self.snapshots.pop() else { return };
        for (name, pre_state) in pre {
            if let Some(post_state) = self.states.get(&name) {
                let joined = pre_state.join(post_state);
                self.states.insert(name, joined);
            } else {
                self.states.insert(name, pre_state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn r() -> Range {
        Range::synthetic(Rc::from("t.kl"))
    }

    #[test]
    fn definitely_defined_excludes_definitely_read() {
        let mut s = PrimState::undefined();
        assert!(s.is_definitely_undefined());
        s.make_definitely_defined(r());
        assert!(s.is_definitely_defined());
        s.make_definitely_read(r());
        assert!(!s.is_definitely_defined());
        assert!(s.was_read);
    }

    #[test]
    fn join_is_or_of_flags() {
        let mut a = PrimState::undefined();
        a.make_definitely_defined(r());
        let b = PrimState::undefined();
        let joined = a.join(&b);
        assert!(joined.was_defined);
        assert!(joined.is_undefined);
        // Not definite either way: both flags set.
        assert!(!joined.is_definitely_defined());
        assert!(!joined.is_definitely_undefined());
    }

    #[test]
    fn empty_struct_is_vacuously_definitely_defined() {
        let empty = VarState::compound(Vec::new());
        assert!(empty.is_definitely_defined());
        assert!(!empty.is_definitely_undefined());
    }

    #[test]
    fn compound_definitely_defined_is_conjunction_of_fields() {
        use crate::symbol::intern;
        let mut x = VarState::primitive();
        x.make_definitely_defined(&r());
        let y = VarState::primitive();
        let s = VarState::compound(vec![(intern("x"), x), (intern("y"), y)]);
        assert!(!s.is_definitely_defined());
        assert!(!s.is_definitely_undefined());
    }
}
