//! Expression verification.
//!
//! Dispatches on [`ExprKind`] with an access mode carried down
//! (`Normal`/`Assignment`/`Move`) plus a member-access-parent flag that
//! suppresses state transitions on the non-leaf parts of a dotted chain.

use hashbrown::HashMap;

use crate::ast::{BinOp, Expr, ExprKind, UnOp};
use crate::diag::{Range, Sink};
use crate::hir::{TExpr, TExprKind};
use crate::path::Path;
use crate::sema::macros;
use crate::sema::prescan::DeclTables;
use crate::sema::varstate::{VarState, VarTable};
use crate::symbol::{intern, Symbol};
use crate::types::{self, PrimType, Ty, TypeInterner};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    Normal,
    Assignment,
    Move,
}

/// How the receiver expression must be adjusted to match a method's
/// declared `this` parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReceiverAdjust {
    None,
    Ref,
    Deref,
}

/// The struct-layout information carried alongside a registered struct
/// path, used for member-access and `$constructor` synthesis.
#[derive(Clone, Debug)]
pub struct StructLayout {
    pub fields: Vec<(Symbol, Ty)>,
}

/// Owns everything the semantic pass needs across one compilation unit:
/// declaration tables (immutable after pre-scan), the type interner, and
/// the mutable bits that move as verification walks the tree (current
/// module path, per-function variable table), threaded explicitly through
/// recursive import/function verification rather than kept as global
/// mutable state.
pub struct ExprVerifier<'a> {
    pub interner: &'a TypeInterner,
    pub tables: &'a DeclTables,
    pub struct_layouts: &'a HashMap<Path, StructLayout>,
    pub module_path: Path,
    pub vars: VarTable,
    /// Declared type of each live local, by its flat storage name. The
    /// variable table itself tracks only liveness flags, not
    /// types, so this sits alongside it; `sema::stmt`'s variable
    /// declaration populates both together.
    pub var_types: HashMap<Symbol, Ty>,
    /// Return type of every function whose signature has already been
    /// verified. `sema::stmt` verifies every signature in the unit before
    /// verifying any body, so by the time a call is checked its callee's
    /// entry (if the callee exists at all) is already present here.
    pub fn_return_types: HashMap<Path, Ty>,
    /// Declared parameter names/types and variadic flag for every function
    /// whose signature has been verified, so call sites can check arity and
    /// per-argument assignability ("Call": "Verify arity... and
    /// type each argument against the declared parameter type"), and so
    /// method dispatch can recognise an implicit `this` receiver by name.
    pub fn_params: HashMap<Path, (Vec<(Symbol, Ty)>, bool)>,
    pub extern_decls: HashMap<Path, Range>,
    /// Next free rename suffix per source name, for the cross-scope shadow
    /// rule in `sema::stmt`: redeclaring
    /// a name already live from an enclosing scope renames the inner one to
    /// `name$N` rather than clobbering the outer binding's flat storage
    /// entry in `vars`/`var_types`.
    pub rename_counters: HashMap<Symbol, u32>,
    /// Names declared directly in the current lexical block, one set per
    /// nesting level; a name reappearing at the *same* level is a plain
    /// redefinition error, not a shadow-rename.
    pub scope_names: Vec<hashbrown::HashSet<Symbol>>,
    /// The storage name currently resolved for each source name — identity
    /// except where a declaration shadowed an enclosing scope's binding of
    /// the same name, in which case it points at the renamed storage symbol
    /// while the shadow is live.
    pub current_binding: HashMap<Symbol, Symbol>,
    /// Per-scope undo log for `current_binding`, popped on scope exit to
    /// restore whatever the enclosing scope had bound each name to.
    pub scope_bindings: Vec<Vec<(Symbol, Option<Symbol>)>>,
}

impl<'a> ExprVerifier<'a> {
    #[must_use]
    pub fn new(interner: &'a TypeInterner, tables: &'a DeclTables, struct_layouts: &'a HashMap<Path, StructLayout>) -> Self {
        ExprVerifier {
            interner,
            tables,
            struct_layouts,
            module_path: Path::root(),
            vars: VarTable::new(),
            var_types: HashMap::new(),
            fn_return_types: HashMap::new(),
            fn_params: HashMap::new(),
            extern_decls: HashMap::new(),
            rename_counters: HashMap::new(),
            scope_names: vec![hashbrown::HashSet::new()],
            current_binding: HashMap::new(),
            scope_bindings: vec![Vec::new()],
        }
    }

    /// Declares a new local: registers its liveness state and its type
    /// together, keeping the two tables in lockstep.
    pub fn declare_local(&mut self, name: Symbol, ty: Ty, state: VarState) {
        self.vars.declare(name, state);
        self.var_types.insert(name, ty);
    }

    #[must_use]
    pub fn current_module(&self) -> &Path {
        &self.module_path
    }

    /// Registers an `extern!`-declared function's return type, parameter
    /// types and declaration site, returning the previous declaration's
    /// range on a redeclaration. `extern!`'s argument shape
    /// carries only types, so parameters are recorded under the
    /// placeholder name `_` — an `extern!` declaration can therefore never
    /// participate in `this`-taking method dispatch.
    pub fn declare_extern(&mut self, path: Path, params: Vec<Ty>, variadic: bool, ret: Ty, range: Range) -> Option<Range> {
        self.fn_return_types.insert(path.clone(), ret);
        let named = params.into_iter().map(|t| (intern("_"), t)).collect();
        self.fn_params.insert(path.clone(), (named, variadic));
        self.extern_decls.insert(path, range)
    }

    pub fn resolve_type_path(&mut self, path: &Path, range: &Range, sink: &mut Sink) -> Option<Ty> {
        if path.segments().len() == 1 && !path.is_global() {
            let name = path.segments()[0].as_str();
            if let Some(prim) = primitive_from_name(name) {
                return Some(self.interner.prim(prim));
            }
        }
        let canonical = self.canonicalize_type_path(path);
        if self.struct_layouts.contains_key(&canonical) || self.tables.structs.contains_key(&canonical) {
            return Some(self.interner.user(canonical, 0));
        }
        sink.error(range.clone(), format!("undefined type `{path}`"));
        None
    }

    fn canonicalize_type_path(&self, path: &Path) -> Path {
        if path.is_global() {
            return path.clone();
        }
        let prefixed = path.with_prefix(&self.module_path);
        if self.struct_layouts.contains_key(&prefixed) {
            return prefixed;
        }
        path.clone()
    }

    #[must_use]
    pub fn resolve_fn_path(&self, path: &Path) -> Option<Path> {
        let prefixed = if path.is_global() { path.clone() } else { path.with_prefix(&self.module_path) };
        if self.tables.functions.contains_key(&prefixed) || self.extern_decls.contains_key(&prefixed) {
            return Some(prefixed);
        }
        if self.tables.functions.contains_key(path) || self.extern_decls.contains_key(path) {
            return Some(path.clone());
        }
        None
    }

    /// Entry point used by macro expansion and by ordinary recursive
    /// descent: verify `expr` in [`AccessMode::Normal`].
    pub fn verify_normal(&mut self, expr: &Expr, sink: &mut Sink) -> Option<TExpr> {
        self.verify(expr, AccessMode::Normal, false, sink)
    }

    pub fn verify(&mut self, expr: &Expr, mode: AccessMode, member_parent: bool, sink: &mut Sink) -> Option<TExpr> {
        match &expr.kind {
            ExprKind::Error => None,
            ExprKind::Int(v) => Some(TExpr { kind: TExprKind::Int(*v), ty: self.interner.prim(PrimType::U0), range: expr.range.clone() }),
            ExprKind::Real(v) => Some(TExpr { kind: TExprKind::Real(*v), ty: self.interner.prim(PrimType::F64), range: expr.range.clone() }),
            ExprKind::Str(s) => Some(TExpr { kind: TExprKind::Str(s.clone()), ty: self.interner.prim(PrimType::Str), range: expr.range.clone() }),
            ExprKind::Bool(b) => Some(TExpr { kind: TExprKind::Bool(*b), ty: self.interner.prim(PrimType::Bool), range: expr.range.clone() }),
            ExprKind::Null => Some(TExpr { kind: TExprKind::Null, ty: self.interner.prim(PrimType::Void).ref_one(), range: expr.range.clone() }),
            ExprKind::Name(name) => self.verify_name(*name, &expr.range, mode, member_parent, sink),
            ExprKind::PathConcat(..) | ExprKind::Unary(UnOp::GlobalAnchor, _) => {
                let Some(path) = Path::from_expr(expr) else {
                    sink.error(expr.range.clone(), "not a valid path");
                    return None;
                };
                self.verify_path_ref(&path, &expr.range, sink)
            }
            ExprKind::Unary(UnOp::Neg, inner) => {
                let v = self.verify(inner, AccessMode::Normal, false, sink)?;
                if !v.ty.is_primitive() {
                    sink.error(expr.range.clone(), format!("cannot negate `{}`", v.ty));
                    return None;
                }
                let ty = v.ty;
                Some(TExpr { kind: TExprKind::Neg(Box::new(v)), ty, range: expr.range.clone() })
            }
            ExprKind::Unary(UnOp::Not, inner) => {
                let v = self.verify(inner, AccessMode::Normal, false, sink)?;
                let bool_ty = self.interner.prim(PrimType::Bool);
                Some(TExpr { kind: TExprKind::Not(Box::new(v)), ty: bool_ty, range: expr.range.clone() })
            }
            ExprKind::Unary(UnOp::Ref, inner) => {
                let v = self.verify(inner, AccessMode::Normal, false, sink)?;
                let ty = v.ty.ref_one();
                Some(TExpr { kind: TExprKind::Ref(Box::new(v)), ty, range: expr.range.clone() })
            }
            ExprKind::Unary(UnOp::Deref, inner) => {
                let v = self.verify(inner, AccessMode::Normal, false, sink)?;
                let Some(ty) = v.ty.deref_one() else {
                    sink.error(expr.range.clone(), format!("cannot dereference non-pointer type `{}`", v.ty));
                    return None;
                };
                Some(TExpr { kind: TExprKind::Deref(Box::new(v)), ty, range: expr.range.clone() })
            }
            ExprKind::Binary(op, lhs, rhs) => self.verify_binary(*op, lhs, rhs, &expr.range, sink),
            ExprKind::Assign(lhs, rhs) => self.verify_assign(lhs, rhs, &expr.range, sink),
            ExprKind::Member(base, field) => self.verify_member(base, *field, &expr.range, mode, sink),
            ExprKind::Call(callee, args) => self.verify_call(callee, args, &expr.range, sink),
            ExprKind::StructInit(callee, args) => self.verify_struct_init(callee, args, &expr.range, sink),
            ExprKind::MacroCall(name, args) => self.verify_macro_call(*name, args, &expr.range, sink),
            ExprKind::Group(inner) => self.verify(inner, mode, member_parent, sink),
            ExprKind::List(_) => {
                sink.error(expr.range.clone(), "list literals are not yet assigned a type by this analyser");
                None
            }
        }
    }

    fn verify_name(&mut self, source_name: Symbol, range: &Range, mode: AccessMode, member_parent: bool, sink: &mut Sink) -> Option<TExpr> {
        let name = self.current_binding.get(&source_name).copied().unwrap_or(source_name);
        if !self.vars.contains(name) {
            // Might be a bare reference to a zero-arg function/constructor;
            // callers that need that resolve it themselves via `Call`. As a
            // bare name it is undefined.
            sink.error(range.clone(), format!("undefined variable `{source_name}`"));
            return None;
        }
        let Some(&ty) = self.var_types.get(&name) else {
            sink.error(range.clone(), format!("`{name}` has no recorded type (internal)"));
            return None;
        };
        if member_parent {
            // Inner parts of a dotted chain are visited without a state
            // transition.
            return Some(TExpr { kind: TExprKind::Local(name), ty, range: range.clone() });
        }
        match mode {
            AccessMode::Assignment => {
                let state = self.vars.get(name).cloned()?;
                if state.is_definitely_defined() || state.is_maybe_defined() {
                    sink.warning(range.clone(), format!("assignment to `{name}` without an intervening read"));
                }
                let state_mut = self.vars.get_mut(name)?;
                state_mut.make_definitely_defined(range);
                Some(TExpr { kind: TExprKind::Local(name), ty, range: range.clone() })
            }
            AccessMode::Normal | AccessMode::Move => {
                let state = self.vars.get(name).cloned()?;
                if state.is_definitely_undefined() {
                    sink.error(range.clone(), format!("`{name}` is definitely undefined here"));
                    return None;
                }
                if state.is_maybe_undefined() {
                    sink.warning(range.clone(), format!("`{name}` is possibly undefined here"));
                }
                let non_copyable = !ty.is_copyable();
                let state_mut = self.vars.get_mut(name)?;
                state_mut.make_definitely_read(range);
                if mode == AccessMode::Move && non_copyable {
                    state_mut.make_definitely_moved(range);
                }
                Some(TExpr { kind: TExprKind::Local(name), ty, range: range.clone() })
            }
        }
    }

    fn verify_path_ref(&mut self, path: &Path, range: &Range, sink: &mut Sink) -> Option<TExpr> {
        if let Some(fn_path) = self.resolve_fn_path(path) {
            let ret = self.fn_return_ty(&fn_path);
            return Some(TExpr { kind: TExprKind::Global(fn_path), ty: ret, range: range.clone() });
        }
        let canonical = self.canonicalize_type_path(path);
        if self.struct_layouts.contains_key(&canonical) {
            return Some(TExpr { kind: TExprKind::Global(canonical.clone()), ty: self.interner.user(canonical, 0), range: range.clone() });
        }
        sink.error(range.clone(), format!("undefined path `{path}`"));
        None
    }

    fn fn_return_ty(&self, path: &Path) -> Ty {
        self.fn_return_types.get(path).copied().unwrap_or_else(|| self.interner.void())
    }

    /// Registers a locally-defined function's full signature (parameter
    /// names/types plus variadic flag), alongside its return type, so later
    /// call sites can check arity and argument types and recognise a
    /// `this`-shaped first parameter.
    pub fn declare_fn_sig(&mut self, path: Path, params: Vec<(Symbol, Ty)>, variadic: bool, ret: Ty) {
        self.fn_return_types.insert(path.clone(), ret);
        self.fn_params.insert(path, (params, variadic));
    }

    fn verify_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, range: &Range, sink: &mut Sink) -> Option<TExpr> {
        let l = self.verify(lhs, AccessMode::Normal, false, sink);
        let r = self.verify(rhs, AccessMode::Normal, false, sink);
        let (l, r) = (l?, r?);
        let (l, r) = (self.promote_literal(l, r.ty), self.promote_literal(r, l.ty));
        match op {
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                if !types::is_comparable(l.ty, r.ty) {
                    sink.error(range.clone(), format!("`{}` and `{}` are not comparable", l.ty, r.ty));
                    return None;
                }
                let bool_ty = self.interner.prim(PrimType::Bool);
                Some(TExpr { kind: make_binary(op, l, r), ty: bool_ty, range: range.clone() })
            }
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => {
                if !types::is_compatible(l.ty, r.ty) {
                    sink.error(range.clone(), format!("`{}` and `{}` are not compatible operands", l.ty, r.ty));
                    return None;
                }
                let Some(ty) = types::arith_result(self.interner, l.ty, r.ty) else {
                    sink.error(range.clone(), format!("no arithmetic result type for `{}` and `{}`", l.ty, r.ty));
                    return None;
                };
                Some(TExpr { kind: make_binary(op, l, r), ty, range: range.clone() })
            }
        }
    }

    fn verify_assign(&mut self, lhs: &Expr, rhs: &Expr, range: &Range, sink: &mut Sink) -> Option<TExpr> {
        let r = self.verify(rhs, AccessMode::Normal, false, sink)?;
        let l = self.verify(lhs, AccessMode::Assignment, false, sink)?;
        let r = self.promote_literal(r, l.ty);
        if !types::is_assignable_from(l.ty, r.ty) {
            sink.error(range.clone(), format!("cannot assign `{}` to `{}`", r.ty, l.ty));
            return None;
        }
        let ty = l.ty;
        Some(TExpr { kind: TExprKind::Assign(Box::new(l), Box::new(r)), ty, range: range.clone() })
    }

    /// Resolves `expr` to the root storage symbol plus the chain of field
    /// names needed to reach its per-field [`VarState`] — `a` for a plain
    /// name, `(a, [b, c])` for `a.b.c`. `None` for anything with no tracked
    /// per-field storage (pointer dereferences, calls, …), in which case the
    /// caller skips the state transition.
    fn resolve_field_path(&self, expr: &Expr) -> Option<(Symbol, Vec<Symbol>)> {
        match &expr.kind {
            ExprKind::Name(name) => {
                let storage = self.current_binding.get(name).copied().unwrap_or(*name);
                Some((storage, Vec::new()))
            }
            ExprKind::Member(base, field) => {
                let (root, mut chain) = self.resolve_field_path(base)?;
                chain.push(*field);
                Some((root, chain))
            }
            ExprKind::Group(inner) => self.resolve_field_path(inner),
            _ => None,
        }
    }

    fn field_state_mut(&mut self, root: Symbol, chain: &[Symbol]) -> Option<&mut VarState> {
        let mut state = self.vars.get_mut(root)?;
        for seg in chain {
            state = state.field_mut(*seg)?;
        }
        Some(state)
    }

    fn verify_member(&mut self, base: &Expr, field: Symbol, range: &Range, mode: AccessMode, sink: &mut Sink) -> Option<TExpr> {
        let field_path = self.resolve_field_path(base);
        let base_t = self.verify(base, AccessMode::Normal, true, sink)?;
        let Some(path) = base_t.ty.user_path().cloned() else {
            sink.error(range.clone(), format!("`{}` is not a user type, cannot access `.{field}`", base_t.ty));
            return None;
        };
        let Some(layout) = self.struct_layouts.get(&path) else {
            sink.error(range.clone(), format!("unknown struct `{path}`"));
            return None;
        };
        let Some((_, field_ty)) = layout.fields.iter().find(|(n, _)| *n == field) else {
            sink.error(range.clone(), format!("`{path}` has no field `{field}`"));
            return None;
        };
        let ty = *field_ty;
        // Assigning to a member transitions only that member; assigning to
        // the whole variable (via `verify_name`) transitions all members.
        if let Some((root, mut chain)) = field_path {
            chain.push(field);
            match mode {
                AccessMode::Assignment => {
                    if let Some(state) = self.field_state_mut(root, &chain) {
                        if state.is_definitely_defined() || state.is_maybe_defined() {
                            sink.warning(range.clone(), format!("assignment to `{field}` without an intervening read"));
                        }
                        state.make_definitely_defined(range);
                    }
                }
                AccessMode::Normal | AccessMode::Move => {
                    if self.field_state_mut(root, &chain).is_some_and(|s| s.is_definitely_undefined()) {
                        sink.error(range.clone(), format!("`{field}` is definitely undefined here"));
                        return None;
                    }
                    if self.field_state_mut(root, &chain).is_some_and(|s| s.is_maybe_undefined()) {
                        sink.warning(range.clone(), format!("`{field}` is possibly undefined here"));
                    }
                    let non_copyable = !ty.is_copyable();
                    if let Some(state) = self.field_state_mut(root, &chain) {
                        state.make_definitely_read(range);
                        if mode == AccessMode::Move && non_copyable {
                            state.make_definitely_moved(range);
                        }
                    }
                }
            }
        }
        Some(TExpr { kind: TExprKind::Member(Box::new(base_t), field), ty, range: range.clone() })
    }

    fn verify_call(&mut self, callee: &Expr, args: &[Expr], range: &Range, sink: &mut Sink) -> Option<TExpr> {
        // Member-access call target: `obj.method(args)`.
        // `T::method(args)` parses as a `PathConcat`, not a `Member`, and is
        // handled by the plain-path branch below (no receiver to pass).
        if let ExprKind::Member(base, method) = &callee.kind {
            return self.verify_method_call(base, *method, args, range, sink);
        }
        let Some(path) = Path::from_expr(callee) else {
            sink.error(range.clone(), "call target is not a resolvable name or path");
            return None;
        };
        let canonical_struct = self.canonicalize_type_path(&path);
        if self.struct_layouts.contains_key(&canonical_struct) {
            return self.verify_struct_init(callee, args, range, sink);
        }
        let Some(fn_path) = self.resolve_fn_path(&path) else {
            sink.error(range.clone(), format!("undefined function `{path}`"));
            return None;
        };
        let typed_args = self.verify_call_args(&fn_path, args, range, sink);
        let ret = self.fn_return_ty(&fn_path);
        Some(TExpr { kind: TExprKind::Call(fn_path, typed_args), ty: ret, range: range.clone() })
    }

    /// Verifies each argument in [`AccessMode::Move`] and checks arity and
    /// per-argument assignability against `fn_path`'s declared signature
    ///. A variadic tail's extra arguments are evaluated
    /// but not type-checked (glossary "Variadic tail"). Falls back to
    /// evaluating arguments untyped when `fn_path` has no recorded
    /// signature (an `extern!` declared in a library this unit imports, for
    /// instance, whose params were not round-tripped — see DESIGN.md).
    fn verify_call_args(&mut self, fn_path: &Path, args: &[Expr], range: &Range, sink: &mut Sink) -> Vec<TExpr> {
        let sig = self.fn_params.get(fn_path).cloned();
        let Some((params, variadic)) = sig else {
            return args.iter().filter_map(|a| self.verify(a, AccessMode::Move, false, sink)).collect();
        };
        if args.len() < params.len() || (!variadic && args.len() > params.len()) {
            sink.error(range.clone(), format!("`{fn_path}` expects {} argument(s), {} given", params.len(), args.len()));
        }
        let mut typed_args = Vec::with_capacity(args.len());
        for (i, a) in args.iter().enumerate() {
            let Some(t) = self.verify(a, AccessMode::Move, false, sink) else { continue };
            if let Some(&(_, param_ty)) = params.get(i) {
                let t = self.promote_literal(t, param_ty);
                if !types::is_assignable_from(param_ty, t.ty) {
                    sink.error(a.range.clone(), format!("cannot pass `{}` as argument of type `{param_ty}`", t.ty));
                }
                typed_args.push(t);
            } else {
                typed_args.push(t);
            }
        }
        typed_args
    }

    /// Promotes an integer-literal operand to floating point when the
    /// context calls for a float ("Binary arithmetic": "emit
    /// float-promotion of an integer literal if the other side is float"),
    /// applied here to call arguments and, in `verify_binary`, to operands.
    /// Leaves anything that is not a bare integer-literal node untouched —
    /// it is not this narrow rule's job to convert arbitrary expressions.
    fn promote_literal(&self, expr: TExpr, target: Ty) -> TExpr {
        if let (TExprKind::Int(v), Some(t)) = (&expr.kind, target.prim()) {
            if t.is_float() {
                return TExpr { kind: TExprKind::Real(*v as f64), ty: target, range: expr.range };
            }
        }
        expr
    }

    /// `obj.method(args)` dispatch. The receiver
    /// is evaluated once; if the method's first declared parameter is
    /// `this` and the receiver type matches (directly, or via implicit
    /// `&`/`*` auto-match), it is passed as the first argument, otherwise
    /// the call is a static method and the receiver expression is dropped
    /// (its side effect, if any, is still observed by verifying it). When
    /// both a by-value and a by-reference `this` would type-check, this is
    /// reported as an ambiguity with both candidates noted.
    fn verify_method_call(&mut self, base: &Expr, method: Symbol, args: &[Expr], range: &Range, sink: &mut Sink) -> Option<TExpr> {
        // `T::method` written through a path that happens to parse as a
        // `Member` cannot occur (that form is always `PathConcat`), so
        // `base` here is always a genuine receiver expression.
        let base_t = self.verify(base, AccessMode::Normal, true, sink)?;
        let Some(struct_path) = base_t.ty.user_path().cloned() else {
            sink.error(range.clone(), format!("`{}` is not a user type, cannot call `.{method}`", base_t.ty));
            return None;
        };
        let value_path = struct_path.append(method);
        // Three ways a `this`-taking method can match the receiver: exactly,
        // via an implicit `&` (receiver is a value, method wants a
        // pointer), or via an implicit `*` (receiver is a pointer, method
        // wants a value) —: "Pointer receivers may auto-match
        // non-pointer `this` methods via implicit deref (and vice versa via
        // implicit `&`), but the match must be unambiguous".
        let direct = self.method_matches_this(&value_path, base_t.ty);
        let via_ref = self.method_matches_this(&value_path, base_t.ty.ref_one());
        let via_deref = base_t.ty.deref_one().is_some_and(|d| self.method_matches_this(&value_path, d));
        let candidates = [direct, via_ref, via_deref].into_iter().filter(|m| *m).count();
        let (fn_path, pass_receiver, adjust) = if candidates > 1 {
            let mut handle = sink.error(range.clone(), format!("ambiguous call to `{struct_path}.{method}`: more than one `this` conversion matches"));
            if direct {
                handle = handle.note(range.clone(), "matches the receiver directly");
            }
            if via_ref {
                handle = handle.note(range.clone(), "matches via an implicit `&`");
            }
            if via_deref {
                handle.note(range.clone(), "matches via an implicit `*`");
            }
            return None;
        } else if direct {
            (value_path, true, ReceiverAdjust::None)
        } else if via_ref {
            (value_path, true, ReceiverAdjust::Ref)
        } else if via_deref {
            (value_path, true, ReceiverAdjust::Deref)
        } else if self.tables.functions.contains_key(&value_path) || self.extern_decls.contains_key(&value_path) {
            // No `this`-taking method; a static method addressed through
            // the receiver's type (`T.method(args)`), receiver not passed.
            (value_path, false, ReceiverAdjust::None)
        } else {
            sink.error(range.clone(), format!("`{struct_path}` has no method `{method}`"));
            return None;
        };
        let mut typed_args = self.verify_call_args(&fn_path, args, range, sink);
        if pass_receiver {
            let receiver_ty = base_t.ty;
            let receiver = match adjust {
                ReceiverAdjust::None => base_t,
                ReceiverAdjust::Ref => TExpr { kind: TExprKind::Ref(Box::new(base_t)), ty: receiver_ty.ref_one(), range: range.clone() },
                ReceiverAdjust::Deref => {
                    let deref_ty = receiver_ty.deref_one().unwrap_or(receiver_ty);
                    TExpr { kind: TExprKind::Deref(Box::new(base_t)), ty: deref_ty, range: range.clone() }
                }
            };
            typed_args.insert(0, receiver);
        }
        let ret = self.fn_return_ty(&fn_path);
        Some(TExpr { kind: TExprKind::Call(fn_path, typed_args), ty: ret, range: range.clone() })
    }

    /// True if `fn_path` is a declared function whose first parameter is
    /// named `this` and whose declared type equals `receiver_ty` exactly
    /// (: "Pointer receivers may auto-match non-pointer `this`
    /// methods via implicit deref (and vice versa via implicit `&`)" — the
    /// caller probes both the by-value and by-reference receiver type
    /// through two calls to this method).
    fn method_matches_this(&self, fn_path: &Path, receiver_ty: Ty) -> bool {
        let Some((params, _)) = self.fn_params.get(fn_path) else { return false };
        params.first().is_some_and(|&(name, ty)| name.as_str() == "this" && ty == receiver_ty)
    }

    fn verify_struct_init(&mut self, callee: &Expr, args: &[Expr], range: &Range, sink: &mut Sink) -> Option<TExpr> {
        let Some(path) = Path::from_expr(callee) else {
            sink.error(range.clone(), "struct-init target is not a resolvable name or path");
            return None;
        };
        let canonical = self.canonicalize_type_path(&path);
        let Some(layout) = self.struct_layouts.get(&canonical).cloned() else {
            sink.error(range.clone(), format!("undefined struct `{path}`"));
            return None;
        };
        if args.len() != layout.fields.len() {
            sink.error(range.clone(), format!("`{canonical}` has {} fields, {} given", layout.fields.len(), args.len()));
            return None;
        }
        let mut typed_args = Vec::with_capacity(args.len());
        for (arg, (_, field_ty)) in args.iter().zip(layout.fields.iter()) {
            let Some(t) = self.verify(arg, AccessMode::Move, false, sink) else { continue };
            let t = self.promote_literal(t, *field_ty);
            if !types::is_assignable_from(*field_ty, t.ty) {
                sink.error(arg.range.clone(), format!("cannot assign `{}` to field of type `{}`", t.ty, field_ty));
            }
            typed_args.push(t);
        }
        let ctor_path = canonical.append(crate::symbol::intern("$constructor"));
        let ty = self.interner.user(canonical, 0);
        Some(TExpr { kind: TExprKind::Call(ctor_path, typed_args), ty, range: range.clone() })
    }

    fn verify_macro_call(&mut self, name: Symbol, args: &[Expr], range: &Range, sink: &mut Sink) -> Option<TExpr> {
        match macros::resolve_builtin(name) {
            Some(macros::BuiltinMacro::As) => macros::expand_as(self, args, range, sink),
            Some(macros::BuiltinMacro::Extern) => macros::expand_extern(self, args, false, range, sink),
            Some(macros::BuiltinMacro::ExternVariadic) => macros::expand_extern(self, args, true, range, sink),
            None => {
                sink.error(range.clone(), format!("unknown macro `{name}!`"));
                None
            }
        }
    }
}

fn make_binary(op: BinOp, l: TExpr, r: TExpr) -> TExprKind {
    match op {
        BinOp::Add => TExprKind::Add(Box::new(l), Box::new(r)),
        BinOp::Sub => TExprKind::Sub(Box::new(l), Box::new(r)),
        BinOp::Mul => TExprKind::Mul(Box::new(l), Box::new(r)),
        BinOp::Div => TExprKind::Div(Box::new(l), Box::new(r)),
        BinOp::Lt => TExprKind::Lt(Box::new(l), Box::new(r)),
        BinOp::Le => TExprKind::Le(Box::new(l), Box::new(r)),
        BinOp::Gt => TExprKind::Gt(Box::new(l), Box::new(r)),
        BinOp::Ge => TExprKind::Ge(Box::new(l), Box::new(r)),
        BinOp::Eq => TExprKind::Eq(Box::new(l), Box::new(r)),
        BinOp::Ne => TExprKind::Ne(Box::new(l), Box::new(r)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Sink;
    use crate::sema::varstate::VarState;
    use crate::symbol::intern;
    use std::rc::Rc;

    fn r() -> Range {
        Range::synthetic(Rc::from("t.kl"))
    }

    fn parse_one(src: &str) -> Expr {
        let mut sink = Sink::new();
        let stmts = crate::parser::parse_unit(src, "t.kl", &[], &mut sink);
        assert_eq!(sink.error_count(), 0);
        match stmts.into_iter().next().unwrap().kind {
            crate::ast::StmtKind::Expr(e) => e,
            other => panic!("expected an expression statement, got {other:?}"),
        }
    }

    #[test]
    fn binary_add_widens_mixed_sign_operands() {
        let interner = TypeInterner::new();
        let tables = DeclTables::new();
        let layouts = HashMap::new();
        let mut verifier = ExprVerifier::new(&interner, &tables, &layouts);
        verifier.declare_local(intern("a"), interner.prim(PrimType::U32), VarState::primitive());
        verifier.declare_local(intern("b"), interner.prim(PrimType::I32), VarState::primitive());
        verifier.vars.get_mut(intern("a")).unwrap().make_definitely_defined(&r());
        verifier.vars.get_mut(intern("b")).unwrap().make_definitely_defined(&r());
        let expr = parse_one("a+b;");
        let mut sink = Sink::new();
        let t = verifier.verify_normal(&expr, &mut sink).unwrap();
        assert_eq!(sink.error_count(), 0);
        assert_eq!(t.ty.prim(), Some(PrimType::I64));
    }

    #[test]
    fn undefined_variable_is_an_error() {
        let interner = TypeInterner::new();
        let tables = DeclTables::new();
        let layouts = HashMap::new();
        let mut verifier = ExprVerifier::new(&interner, &tables, &layouts);
        let expr = parse_one("missing;");
        let mut sink = Sink::new();
        assert!(verifier.verify_normal(&expr, &mut sink).is_none());
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn member_access_resolves_field_type() {
        let interner = TypeInterner::new();
        let tables = DeclTables::new();
        let point = Path::root().append(intern("Point"));
        let mut layouts = HashMap::new();
        layouts.insert(point.clone(), StructLayout { fields: vec![(intern("x"), interner.prim(PrimType::I32))] });
        let mut verifier = ExprVerifier::new(&interner, &tables, &layouts);
        verifier.declare_local(intern("p"), interner.user(point, 0), VarState::primitive());
        verifier.vars.get_mut(intern("p")).unwrap().make_definitely_defined(&r());
        let expr = parse_one("p.x;");
        let mut sink = Sink::new();
        let t = verifier.verify_normal(&expr, &mut sink).unwrap();
        assert_eq!(sink.error_count(), 0);
        assert_eq!(t.ty.prim(), Some(PrimType::I32));
    }

    #[test]
    fn member_assignment_transitions_only_that_field() {
        let interner = TypeInterner::new();
        let tables = DeclTables::new();
        let point = Path::root().append(intern("Point"));
        let mut layouts = HashMap::new();
        layouts.insert(
            point.clone(),
            StructLayout { fields: vec![(intern("x"), interner.prim(PrimType::I32)), (intern("y"), interner.prim(PrimType::I32))] },
        );
        let mut verifier = ExprVerifier::new(&interner, &tables, &layouts);
        let compound = VarState::compound(vec![(intern("x"), VarState::primitive()), (intern("y"), VarState::primitive())]);
        verifier.declare_local(intern("p"), interner.user(point, 0), compound);

        let assign = parse_one("p.x = 1;");
        let mut sink = Sink::new();
        assert!(verifier.verify_normal(&assign, &mut sink).is_some());
        assert_eq!(sink.error_count(), 0);

        let read_x = parse_one("p.x;");
        let mut sink = Sink::new();
        assert!(verifier.verify_normal(&read_x, &mut sink).is_some());
        assert_eq!(sink.error_count(), 0, "x was assigned, reading it should be fine");

        // `y` was never assigned, so reading it is definitely-undefined —
        // assigning `p.x` must not have transitioned `y` too.
        let read_y = parse_one("p.y;");
        let mut sink = Sink::new();
        assert!(verifier.verify_normal(&read_y, &mut sink).is_none());
        assert_eq!(sink.error_count(), 1);
    }
}

fn primitive_from_name(name: &str) -> Option<PrimType> {
    Some(match name {
        "i8" => PrimType::I8,
        "i16" => PrimType::I16,
        "i32" => PrimType::I32,
        "i64" => PrimType::I64,
        "u0" => PrimType::U0,
        "u8" => PrimType::U8,
        "u16" => PrimType::U16,
        "u32" => PrimType::U32,
        "u64" => PrimType::U64,
        "f32" => PrimType::F32,
        "f64" => PrimType::F64,
        "bool" => PrimType::Bool,
        "str" => PrimType::Str,
        "void" => PrimType::Void,
        _ => return None,
    })
}
