//! Lifetime and ownership analysis.
//!
//! Walks a verified [`TypedUnit`] function by function. Every local's
//! current value gets a `Lifetime` record (`birth`/`death`/`last_death`);
//! taking an address (`&x`) produces a borrow record and a directed
//! constraint edge "this borrow must die no later than its referent";
//! assigning a borrow into a variable joins the two. At `return`, anything
//! reachable from the returned value's lifetime that still traces back to
//! a local (not a parameter) is an escaping-reference error.
//!
//! `visit_*` builds the timeline and `check_return_escape` walks the
//! resulting graph, run together rather than as two full tree passes, since
//! the only graph query needed is "does this root reach a non-escaping
//! local", which can run at each `return` as it's visited.

use std::collections::VecDeque;

use hashbrown::HashMap;
use hashbrown::HashSet;

use crate::diag::{Range, Sink};
use crate::hir::{TExpr, TExprKind, TStmt, TStmtKind, TopDecl, TypedUnit};
use crate::symbol::Symbol;

/// How many times a `while` body is re-walked looking for a fixed point
/// before giving up and using the last iteration's endpoints. Real loop
/// bodies converge in one or two passes; this is a sanity backstop against
/// a pathological graph, not an expected case.
const FIXED_POINT_BOUND: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LifetimeKind {
    /// Outlives the function: literals, globals, call results.
    Static,
    /// A borrow (`&expr`) or other value with no named storage of its own.
    Temporary,
    /// The current value of a named local or parameter.
    Local(Symbol),
}

#[derive(Clone, Debug)]
struct Lifetime {
    kind: LifetimeKind,
    birth: usize,
    death: usize,
    last_death: usize,
}

type LifetimeId = usize;

/// A constraint edge: `from` must die no later than `to` (`from.last_death
/// <= to.last_death`), introduced at `range`. `via_borrow` marks the one
/// kind of edge a `&expr` produces (borrow to referent); plain value
/// propagation (assignment, `var` initializers) never sets it. Escape
/// checking only flags a local reached after crossing at least one
/// `via_borrow` edge — a returned-by-value local with no borrow anywhere in
/// its chain is ordinary value semantics, not an escaping reference.
#[derive(Clone, Debug)]
struct Edge {
    from: LifetimeId,
    to: LifetimeId,
    via_borrow: bool,
    range: Range,
}

struct FnAnalyser<'s> {
    sink: &'s mut Sink,
    records: Vec<Lifetime>,
    edges: Vec<Edge>,
    current: HashMap<Symbol, LifetimeId>,
    decl_range: HashMap<Symbol, Range>,
    is_param: HashMap<Symbol, bool>,
    index: usize,
    static_id: LifetimeId,
}

impl<'s> FnAnalyser<'s> {
    fn new(sink: &'s mut Sink) -> Self {
        let static_record = Lifetime { kind: LifetimeKind::Static, birth: 0, death: 0, last_death: usize::MAX };
        FnAnalyser {
            sink,
            records: vec![static_record],
            edges: Vec::new(),
            current: HashMap::new(),
            decl_range: HashMap::new(),
            is_param: HashMap::new(),
            index: 0,
            static_id: 0,
        }
    }

    fn push_record(&mut self, kind: LifetimeKind, birth: usize) -> LifetimeId {
        self.records.push(Lifetime { kind, birth, death: birth, last_death: birth });
        self.records.len() - 1
    }

    fn declare_param(&mut self, name: Symbol, range: &Range) {
        // A parameter's storage belongs to the caller, so its lifetime
        // never triggers the "escaping reference" check on return; it is
        // still tracked for ordinary use-after-reassign bookkeeping.
        let id = self.push_record(LifetimeKind::Local(name), 0);
        self.current.insert(name, id);
        self.decl_range.insert(name, range.clone());
        self.is_param.insert(name, true);
    }

    fn declare_local(&mut self, name: Symbol, range: &Range) -> LifetimeId {
        let id = self.push_record(LifetimeKind::Local(name), self.index);
        self.current.insert(name, id);
        self.decl_range.insert(name, range.clone());
        self.is_param.insert(name, false);
        id
    }

    fn use_var(&mut self, name: Symbol) -> LifetimeId {
        if let Some(&id) = self.current.get(&name) {
            self.records[id].death = self.records[id].death.max(self.index);
            id
        } else {
            // Only reachable if an earlier pass let an unresolved reference
            // through; treat it as `static` rather than panicking.
            self.static_id
        }
    }

    /// Reassigns `name`'s current lifetime, closing the previous one at
    /// `self.index` and recording an edge to `rhs` (the lifetime of
    /// whatever was just assigned in).
    fn assign_var(&mut self, name: Symbol, rhs: LifetimeId, range: &Range) -> LifetimeId {
        if let Some(&old) = self.current.get(&name) {
            self.records[old].last_death = self.records[old].last_death.min(self.index);
        }
        let new_id = self.push_record(LifetimeKind::Local(name), self.index);
        self.current.insert(name, new_id);
        self.edges.push(Edge { from: new_id, to: rhs, via_borrow: false, range: range.clone() });
        new_id
    }

    fn visit_expr(&mut self, expr: &TExpr) -> LifetimeId {
        match &expr.kind {
            TExprKind::Int(_)
            | TExprKind::Real(_)
            | TExprKind::Str(_)
            | TExprKind::Bool(_)
            | TExprKind::Null
            | TExprKind::Global(_)
            | TExprKind::Field(_) => self.static_id,
            TExprKind::Local(name) => self.use_var(*name),
            TExprKind::Neg(inner) | TExprKind::Not(inner) | TExprKind::Deref(inner) | TExprKind::Cast(inner) => {
                self.visit_expr(inner)
            }
            TExprKind::Ref(inner) => {
                let referent = self.visit_expr(inner);
                let borrow = self.push_record(LifetimeKind::Temporary, self.index);
                self.edges.push(Edge { from: borrow, to: referent, via_borrow: true, range: expr.range.clone() });
                borrow
            }
            TExprKind::Add(a, b)
            | TExprKind::Sub(a, b)
            | TExprKind::Mul(a, b)
            | TExprKind::Div(a, b)
            | TExprKind::Lt(a, b)
            | TExprKind::Le(a, b)
            | TExprKind::Gt(a, b)
            | TExprKind::Ge(a, b)
            | TExprKind::Eq(a, b)
            | TExprKind::Ne(a, b) => {
                self.visit_expr(a);
                self.visit_expr(b);
                self.static_id
            }
            TExprKind::Assign(lhs, rhs) => {
                let rhs_id = self.visit_expr(rhs);
                match root_local(lhs) {
                    Some(name) => self.assign_var(name, rhs_id, &expr.range),
                    // Assigning through a member chain (`a.b.c =...`) uses
                    // the root struct rather than rebirthing it: structs
                    // share their members' lifetime.
                    None => {
                        self.visit_expr(lhs);
                        self.static_id
                    }
                }
            }
            TExprKind::Member(base, _) => self.visit_expr(base),
            TExprKind::Call(_, args) => {
                for arg in args {
                    self.visit_expr(arg);
                }
                self.static_id
            }
        }
    }

    /// Only a *borrow* whose target is a local is an escaping-reference
    /// error (spec §4.9: "Returns of borrows whose target is a local are
    /// errors"). A returned-by-value local (no `&` anywhere in its chain)
    /// is ordinary value semantics and must not be flagged, so the BFS
    /// tracks whether it has crossed a `via_borrow` edge yet and only
    /// raises the diagnostic on a `Local` reached after doing so.
    fn check_return_escape(&mut self, start: LifetimeId, use_range: &Range) {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(start);
        queue.push_back((start, false, Vec::<(Range, String)>::new()));
        while let Some((id, crossed_borrow, path)) = queue.pop_front() {
            if crossed_borrow {
                if let LifetimeKind::Local(name) = self.records[id].kind {
                    if !*self.is_param.get(&name).unwrap_or(&false) {
                        let mut handle = self
                            .sink
                            .error(use_range.clone(), format!("returning a reference to `{name}`, which does not live long enough"));
                        if let Some(decl) = self.decl_range.get(&name) {
                            handle = handle.note(decl.clone(), format!("`{name}` is declared here"));
                        }
                        for (range, msg) in path {
                            handle = handle.note(range, msg);
                        }
                        return;
                    }
                }
            }
            for edge in &self.edges {
                if edge.from == id && visited.insert(edge.to) {
                    let mut next = path.clone();
                    next.push((edge.range.clone(), "lifetime constrained here".to_string()));
                    queue.push_back((edge.to, crossed_borrow || edge.via_borrow, next));
                }
            }
        }
    }

    fn visit_stmts(&mut self, stmts: &[TStmt]) {
        for stmt in stmts {
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &TStmt) {
        match &stmt.kind {
            TStmtKind::Return(expr) => {
                if let Some(e) = expr {
                    let id = self.visit_expr(e);
                    self.check_return_escape(id, &stmt.range);
                }
            }
            TStmtKind::If { cond, then_branch, else_branch } => {
                self.visit_expr(cond);
                let snapshot = self.current.clone();
                self.visit_stmts(then_branch);
                let then_state = std::mem::replace(&mut self.current, snapshot.clone());
                let else_state = if let Some(eb) = else_branch {
                    self.visit_stmts(eb);
                    std::mem::replace(&mut self.current, snapshot)
                } else {
                    snapshot
                };
                self.current = self.merge_branches(then_state, else_state);
            }
            TStmtKind::While { cond, body } => {
                let mut last_endpoints = self.record_endpoints();
                for iteration in 0..FIXED_POINT_BOUND {
                    self.visit_expr(cond);
                    let pre = self.current.clone();
                    self.visit_stmts(body);
                    self.current = self.merge_branches(pre, self.current.clone());
                    let endpoints = self.record_endpoints();
                    if endpoints == last_endpoints {
                        break;
                    }
                    last_endpoints = endpoints;
                    if iteration == FIXED_POINT_BOUND - 1 {
                        log::warn!("lifetime fixed point did not converge within {FIXED_POINT_BOUND} iterations; using last endpoints");
                    }
                }
            }
            TStmtKind::Break | TStmtKind::Continue => {}
            TStmtKind::Block(body) => self.visit_stmts(body),
            TStmtKind::VarDecl { name, init, .. } => {
                let rhs_id = init.as_ref().map(|e| self.visit_expr(e));
                self.declare_local(*name, &stmt.range);
                if let Some(rhs) = rhs_id {
                    let new_id = self.current[&name];
                    self.edges.push(Edge { from: new_id, to: rhs, via_borrow: false, range: stmt.range.clone() });
                }
            }
            TStmtKind::Expr(e) => {
                self.visit_expr(e);
            }
        }
        self.index += 1;
    }

    /// A cheap summary of every record's endpoints, used to detect when a
    /// loop body re-walk has stopped changing anything.
    fn record_endpoints(&self) -> Vec<(usize, usize)> {
        self.records.iter().map(|r| (r.death, r.last_death)).collect()
    }

    fn merge_branches(
        &mut self,
        then_state: HashMap<Symbol, LifetimeId>,
        else_state: HashMap<Symbol, LifetimeId>,
    ) -> HashMap<Symbol, LifetimeId> {
        let mut merged = HashMap::new();
        let names: HashSet<Symbol> = then_state.keys().chain(else_state.keys()).copied().collect();
        for name in names {
            let a = then_state.get(&name).copied();
            let b = else_state.get(&name).copied();
            let id = match (a, b) {
                (Some(a), Some(b)) if a == b => a,
                (Some(a), Some(b)) => {
                    let ra = &self.records[a];
                    let rb = &self.records[b];
                    let joined = Lifetime {
                        kind: ra.kind,
                        birth: ra.birth.min(rb.birth),
                        death: ra.death.max(rb.death),
                        last_death: ra.last_death.min(rb.last_death),
                    };
                    self.records.push(joined);
                    self.records.len() - 1
                }
                (Some(a), None) => a,
                (None, Some(b)) => b,
                (None, None) => unreachable!("name collected from a non-empty state"),
            };
            merged.insert(name, id);
        }
        merged
    }
}

/// Finds the root local a member-access chain ultimately assigns into, for
/// the `a.b.c = rhs` case (assigning to a member does not
/// rebirth the containing struct's lifetime).
fn root_local(expr: &TExpr) -> Option<Symbol> {
    match &expr.kind {
        TExprKind::Local(name) => Some(*name),
        TExprKind::Member(base, _) => root_local(base),
        _ => None,
    }
}

fn check_fn_def(sig: &crate::hir::TFnSig, body: &[TStmt], sink: &mut Sink) {
    let mut analyser = FnAnalyser::new(sink);
    for param in &sig.params {
        analyser.declare_param(param.name, &sig.range);
    }
    analyser.visit_stmts(body);
}

fn check_decls(decls: &[TopDecl], sink: &mut Sink) {
    for decl in decls {
        match decl {
            TopDecl::FnDef { sig, body } => check_fn_def(sig, body, sink),
            TopDecl::Import { nested, .. } => check_decls(nested, sink),
            TopDecl::FnDeclOnly(_) | TopDecl::Struct { .. } => {}
        }
    }
}

/// `lifetime_check`: walks every function definition in `unit`,
/// reporting escaping-reference errors to `sink`. Struct/field lifetime
/// intersection and borrow constraints never outlive their own function,
/// so this does not need to thread any state between functions.
pub fn lifetime_check(unit: &TypedUnit, sink: &mut Sink) {
    log::debug!("lifetime_check: {} top-level items", unit.decls.len());
    check_decls(&unit.decls, sink);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{TExpr, TExprKind, TFnSig, TParam, TStmt, TStmtKind};
    use crate::symbol::intern;
    use crate::types::TypeInterner;
    use std::rc::Rc;

    fn r(line: u32) -> Range {
        Range::new(Rc::from("t.kl"), line, 1, 1)
    }

    fn texpr(kind: TExprKind, ty: crate::types::Ty, line: u32) -> TExpr {
        TExpr { kind, ty, range: r(line) }
    }

    fn tstmt(kind: TStmtKind, line: u32) -> TStmt {
        TStmt { kind, range: r(line) }
    }

    fn sig(name: &str, interner: &TypeInterner, params: Vec<TParam>) -> TFnSig {
        TFnSig {
            path: crate::path::Path::single(intern(name)),
            params,
            variadic: false,
            ret: interner.prim(crate::types::PrimType::I32).ref_one(),
            range: r(0),
        }
    }

    #[test]
    fn returning_address_of_local_is_an_error() {
        let interner = TypeInterner::new();
        let i32t = interner.prim(crate::types::PrimType::I32);
        let x = intern("x");
        let body = vec![
            tstmt(
                TStmtKind::VarDecl { name: x, ty: i32t, init: Some(texpr(TExprKind::Int(1), i32t, 1)) },
                1,
            ),
            tstmt(
                TStmtKind::Return(Some(texpr(
                    TExprKind::Ref(Box::new(texpr(TExprKind::Local(x), i32t, 2))),
                    i32t.ref_one(),
                    2,
                ))),
                2,
            ),
        ];
        let mut sink = Sink::new();
        check_fn_def(&sig("f", &interner, vec![]), &body, &mut sink);
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn returning_address_of_parameter_is_allowed() {
        let interner = TypeInterner::new();
        let i32t = interner.prim(crate::types::PrimType::I32);
        let p = intern("p");
        let body = vec![tstmt(
            TStmtKind::Return(Some(texpr(
                TExprKind::Ref(Box::new(texpr(TExprKind::Local(p), i32t, 1))),
                i32t.ref_one(),
                1,
            ))),
            1,
        )];
        let mut sink = Sink::new();
        check_fn_def(&sig("f", &interner, vec![TParam { name: p, ty: i32t }]), &body, &mut sink);
        assert_eq!(sink.error_count(), 0);
    }

    #[test]
    fn returning_a_plain_value_is_never_flagged() {
        let interner = TypeInterner::new();
        let i32t = interner.prim(crate::types::PrimType::I32);
        let body = vec![tstmt(TStmtKind::Return(Some(texpr(TExprKind::Int(4), i32t, 1))), 1)];
        let mut sink = Sink::new();
        check_fn_def(&sig("f", &interner, vec![]), &body, &mut sink);
        assert_eq!(sink.error_count(), 0);
    }

    #[test]
    fn returning_a_by_value_local_with_no_borrow_is_not_flagged() {
        // fn square(i32 x) i32 { i32 y = x * x; return y; }
        let interner = TypeInterner::new();
        let i32t = interner.prim(crate::types::PrimType::I32);
        let x = intern("x");
        let y = intern("y");
        let body = vec![
            tstmt(
                TStmtKind::VarDecl {
                    name: y,
                    ty: i32t,
                    init: Some(texpr(
                        TExprKind::Mul(Box::new(texpr(TExprKind::Local(x), i32t, 1)), Box::new(texpr(TExprKind::Local(x), i32t, 1))),
                        i32t,
                        1,
                    )),
                },
                1,
            ),
            tstmt(TStmtKind::Return(Some(texpr(TExprKind::Local(y), i32t, 2))), 2),
        ];
        let mut sink = Sink::new();
        check_fn_def(&sig("square", &interner, vec![TParam { name: x, ty: i32t }]), &body, &mut sink);
        assert_eq!(sink.error_count(), 0, "{:?}", sink.diagnostics());
    }

    #[test]
    fn borrow_forwarded_through_another_local_still_escapes() {
        let interner = TypeInterner::new();
        let i32t = interner.prim(crate::types::PrimType::I32);
        let x = intern("x");
        let y = intern("y");
        let ptr = i32t.ref_one();
        let body = vec![
            tstmt(TStmtKind::VarDecl { name: x, ty: i32t, init: Some(texpr(TExprKind::Int(1), i32t, 1)) }, 1),
            tstmt(
                TStmtKind::VarDecl {
                    name: y,
                    ty: ptr,
                    init: Some(texpr(TExprKind::Ref(Box::new(texpr(TExprKind::Local(x), i32t, 2))), ptr, 2)),
                },
                2,
            ),
            tstmt(TStmtKind::Return(Some(texpr(TExprKind::Local(y), ptr, 3))), 3),
        ];
        let mut sink = Sink::new();
        check_fn_def(&sig("f", &interner, vec![]), &body, &mut sink);
        assert_eq!(sink.error_count(), 1);
    }
}
