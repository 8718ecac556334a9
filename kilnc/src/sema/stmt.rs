//! Statement, function, and struct verification.
//!
//! Builds on [`crate::sema::expr::ExprVerifier`]: this module drives it
//! across the whole tree in two passes — first every signature (so forward
//! calls resolve), then every body — and owns scope entry/exit, variable
//! declaration (with same-scope redefinition and cross-scope shadow-rename),
//! `$constructor` synthesis, and "returns on every path" checking.

use hashbrown::HashMap;
use hashbrown::HashSet;

use crate::ast::{Block, FnSig, Stmt, StmtKind, StructField, TypeExpr};
use crate::diag::{Range, Sink};
use crate::hir::{TExpr, TExprKind, TFnSig, TParam, TStmt, TStmtKind, TStructField, TopDecl, TypedUnit};
use crate::path::Path;
use crate::sema::expr::{ExprVerifier, StructLayout};
use crate::sema::prescan::{self, DeclTables};
use crate::sema::varstate::VarState;
use crate::symbol::{intern, Symbol};
use crate::types::{self, Ty, TypeInterner};

/// Analyses a parsed unit end to end (`analyse`): declaration
/// pre-scan (seeded with `imported_libraries`' declarations so cross-unit
/// names resolve the same way local ones do), struct layout resolution,
/// signature verification, then body verification, returning the typed tree
/// alongside the sink it was given.
///
/// `imported_libraries` is keyed by the name under which the dependency was
/// imported, each value the declaration list [`crate::library::import_library`]
/// (or, as the driver uses it, a dependency's own freshly analysed
/// [`TypedUnit::decls`]) produced.
#[must_use]
pub fn analyse(stmts: &[Stmt], imported_libraries: &HashMap<String, Vec<TopDecl>>, interner: &TypeInterner, sink: &mut Sink) -> TypedUnit {
    let mut tables = DeclTables::new();
    tables.scan(stmts, &Path::root());

    let mut struct_layouts = collect_struct_layouts(stmts, &tables, interner, sink);

    let mut imported_fn_sigs = Vec::new();
    for decls in imported_libraries.values() {
        register_imported_decls(decls, &mut tables, &mut struct_layouts, &mut imported_fn_sigs);
    }

    let mut verifier = ExprVerifier::new(interner, &tables, &struct_layouts);
    for (path, params, variadic, ret) in imported_fn_sigs {
        verifier.declare_fn_sig(path, params, variadic, ret);
    }
    let mut sigs = HashMap::new();
    collect_signatures(stmts, &Path::root(), &mut verifier, &mut sigs, sink);

    let mut decls = verify_decls(stmts, &Path::root(), &mut verifier, &sigs, sink);
    topo_sort_structs(&mut decls);
    TypedUnit { decls }
}

/// Reorders each level of the typed tree so struct declarations form a
/// topological sort of the member-contains relation (spec §3 I5 / §8 P4):
/// if struct `A` has a non-pointer field of type `B`, `B` must precede `A`.
/// Only reorders `Struct` items among their own siblings — the slots they
/// occupy among functions and `import` nodes are left untouched, and a
/// struct never moves across an `import` boundary, since crossing one would
/// also change which module-nesting node it is serialized under. Recurses
/// into each `Import`'s nested list so every level is independently sorted.
fn topo_sort_structs(decls: &mut [TopDecl]) {
    for decl in decls.iter_mut() {
        if let TopDecl::Import { nested, .. } = decl {
            topo_sort_structs(nested);
        }
    }

    let slots: Vec<usize> = decls.iter().enumerate().filter(|(_, d)| matches!(d, TopDecl::Struct { .. })).map(|(i, _)| i).collect();
    if slots.len() < 2 {
        return;
    }

    let paths: Vec<Path> = slots
        .iter()
        .map(|&i| match &decls[i] {
            TopDecl::Struct { path, .. } => path.clone(),
            _ => unreachable!(),
        })
        .collect();
    let index_of: HashMap<&Path, usize> = paths.iter().enumerate().map(|(i, p)| (p, i)).collect();

    // dependency edges: `from` (a field type) must precede `to` (the struct containing it)
    let mut indegree = vec![0usize; paths.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); paths.len()];
    for (to_idx, &slot) in slots.iter().enumerate() {
        let TopDecl::Struct { fields, .. } = &decls[slot] else { unreachable!() };
        for field in fields {
            if field.ty.ptr_level() == 0 {
                if let Some(from_path) = field.ty.user_path() {
                    if let Some(&from_idx) = index_of.get(from_path) {
                        if from_idx != to_idx {
                            dependents[from_idx].push(to_idx);
                            indegree[to_idx] += 1;
                        }
                    }
                }
            }
        }
    }

    // Kahn's algorithm, breaking ties by original order so unrelated structs
    // keep their source-order placement.
    let mut ready: std::collections::BinaryHeap<std::cmp::Reverse<usize>> =
        (0..paths.len()).filter(|&i| indegree[i] == 0).map(std::cmp::Reverse).collect();
    let mut order = Vec::with_capacity(paths.len());
    while let Some(std::cmp::Reverse(i)) = ready.pop() {
        order.push(i);
        for &dep in &dependents[i] {
            indegree[dep] -= 1;
            if indegree[dep] == 0 {
                ready.push(std::cmp::Reverse(dep));
            }
        }
    }
    if order.len() != paths.len() {
        // a cycle (structurally impossible for value-contained fields given
        // the language has no recursive-by-value structs) — leave as-is.
        return;
    }

    let originals: Vec<TopDecl> = slots.iter().map(|&slot| decls[slot].clone()).collect();
    for (slot_pos, &struct_idx) in order.iter().enumerate() {
        decls[slots[slot_pos]] = originals[struct_idx].clone();
    }
}

/// Folds one imported library's declarations into the pre-scan tables, the
/// struct-layout map, and a flat list of function signatures to register on
/// the verifier — the seeding half of `imported_libraries`
/// parameter. Recurses into retained `import` nodes the same way
/// [`DeclTables::scan`] recurses into local ones, since a library bundle's
/// module nesting is preserved the same way.
fn register_imported_decls(
    decls: &[TopDecl],
    tables: &mut DeclTables,
    struct_layouts: &mut HashMap<Path, StructLayout>,
    fn_sigs: &mut Vec<(Path, Vec<(Symbol, Ty)>, bool, Ty)>,
) {
    for decl in decls {
        match decl {
            TopDecl::FnDeclOnly(sig) | TopDecl::FnDef { sig, .. } => {
                tables.functions.insert(sig.path.clone(), prescan::FnDeclShell { path: sig.path.clone() });
                if matches!(decl, TopDecl::FnDef { .. }) {
                    tables.function_bodies.insert(sig.path.clone(), ());
                }
                let named = sig.params.iter().map(|p| (p.name, p.ty)).collect();
                fn_sigs.push((sig.path.clone(), named, sig.variadic, sig.ret));
            }
            TopDecl::Struct { path, fields, .. } => {
                tables.structs.insert(path.clone(), prescan::StructShell { path: path.clone() });
                let resolved = fields.iter().map(|f| (f.name, f.ty)).collect();
                struct_layouts.insert(path.clone(), StructLayout { fields: resolved });
            }
            TopDecl::Import { nested, .. } => register_imported_decls(nested, tables, struct_layouts, fn_sigs),
        }
    }
}

fn resolve_type_expr(verifier: &mut ExprVerifier, te: &TypeExpr, sink: &mut Sink) -> Option<Ty> {
    let base = verifier.resolve_type_path(&te.path, &te.range, sink)?;
    let mut ty = base;
    for _ in 0..te.ptr_level {
        ty = ty.ref_one();
    }
    Some(ty)
}

fn fresh_var_state(ty: Ty, layouts: &HashMap<Path, StructLayout>) -> VarState {
    if let Some(path) = ty.user_path() {
        if let Some(layout) = layouts.get(path) {
            let fields = layout.fields.iter().map(|(n, t)| (*n, fresh_var_state(*t, layouts))).collect();
            return VarState::compound(fields);
        }
    }
    VarState::primitive()
}

fn extend_module(module: &Path, segments: &[Symbol]) -> Path {
    let mut out = module.clone();
    for seg in segments {
        out = out.append(*seg);
    }
    out
}

fn fn_decl_path(sig: &FnSig, module: &Path) -> Path {
    let receiver_last = sig.receiver.as_ref().and_then(|r| r.path.last());
    prescan::fn_path(receiver_last, sig.name, module)
}

// --- Pass 0: struct field types -------------------------------------------

fn collect_struct_layouts(stmts: &[Stmt], tables: &DeclTables, interner: &TypeInterner, sink: &mut Sink) -> HashMap<Path, StructLayout> {
    let mut out = HashMap::new();
    let empty = HashMap::new();
    let mut tmp = ExprVerifier::new(interner, tables, &empty);
    collect_struct_layouts_rec(stmts, &Path::root(), &mut tmp, &mut out, sink);
    out
}

fn collect_struct_layouts_rec(
    stmts: &[Stmt],
    module: &Path,
    verifier: &mut ExprVerifier,
    out: &mut HashMap<Path, StructLayout>,
    sink: &mut Sink,
) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Struct { name, fields, .. } => {
                verifier.module_path = module.clone();
                let path = module.append(*name);
                let resolved = resolve_struct_fields(verifier, fields, sink);
                out.insert(path, StructLayout { fields: resolved });
            }
            StmtKind::Import { segments, resolved: Some(block) } => {
                let nested = extend_module(module, segments);
                collect_struct_layouts_rec(&block.stmts, &nested, verifier, out, sink);
            }
            _ => {}
        }
    }
}

fn resolve_struct_fields(verifier: &mut ExprVerifier, fields: &[StructField], sink: &mut Sink) -> Vec<(Symbol, Ty)> {
    let mut resolved = Vec::with_capacity(fields.len());
    for f in fields {
        let ty = resolve_type_expr(verifier, &f.ty, sink).unwrap_or_else(|| verifier.interner.error());
        resolved.push((f.name, ty));
    }
    resolved
}

// --- Pass 1: signatures -----------------------------------------------------

fn collect_signatures(stmts: &[Stmt], module: &Path, verifier: &mut ExprVerifier, sigs: &mut HashMap<Path, TFnSig>, sink: &mut Sink) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::FnDecl { sig, .. } => {
                verifier.module_path = module.clone();
                let path = fn_decl_path(sig, module);
                let ret = match &sig.ret {
                    Some(te) => resolve_type_expr(verifier, te, sink).unwrap_or_else(|| verifier.interner.error()),
                    None => verifier.interner.void(),
                };
                let mut params = Vec::with_capacity(sig.params.len());
                for p in &sig.params {
                    let ty = resolve_type_expr(verifier, &p.ty, sink).unwrap_or_else(|| verifier.interner.error());
                    params.push(TParam { name: p.name, ty });
                }
                let named_params = params.iter().map(|p| (p.name, p.ty)).collect();
                verifier.declare_fn_sig(path.clone(), named_params, sig.variadic, ret);
                sigs.insert(path.clone(), TFnSig { path, params, variadic: sig.variadic, ret, range: sig.range.clone() });
            }
            StmtKind::Struct { name, .. } => {
                let path = module.append(*name);
                if let Some(layout) = verifier.struct_layouts.get(&path).cloned() {
                    let ctor_path = path.append(intern("$constructor"));
                    let ret = verifier.interner.user(path.clone(), 0);
                    let params: Vec<TParam> = layout.fields.iter().map(|(n, t)| TParam { name: *n, ty: *t }).collect();
                    verifier.declare_fn_sig(ctor_path.clone(), layout.fields.clone(), false, ret);
                    sigs.insert(
                        ctor_path.clone(),
                        TFnSig { path: ctor_path, params, variadic: false, ret, range: stmt.range.clone() },
                    );
                }
            }
            StmtKind::Import { segments, resolved: Some(block) } => {
                let nested = extend_module(module, segments);
                collect_signatures(&block.stmts, &nested, verifier, sigs, sink);
            }
            _ => {}
        }
    }
}

// --- Pass 2: bodies ----------------------------------------------------------

fn verify_decls(stmts: &[Stmt], module: &Path, verifier: &mut ExprVerifier, sigs: &HashMap<Path, TFnSig>, sink: &mut Sink) -> Vec<TopDecl> {
    let mut decls = Vec::new();
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::FnDecl { sig, body } => {
                verifier.module_path = module.clone();
                let path = fn_decl_path(sig, module);
                let Some(tsig) = sigs.get(&path).cloned() else { continue };
                match body {
                    None => decls.push(TopDecl::FnDeclOnly(tsig)),
                    Some(block) => {
                        let body_stmts = verify_fn_body(verifier, &tsig, block, sink);
                        if !tsig.ret.is_void() && !returns_unconditionally(&body_stmts) {
                            sink.error(tsig.range.clone(), format!("function `{}` does not return a value on every path", tsig.path));
                        }
                        decls.push(TopDecl::FnDef { sig: tsig, body: body_stmts });
                    }
                }
            }
            StmtKind::Struct { name, range_of_name, .. } => {
                let path = module.append(*name);
                let Some(layout) = verifier.struct_layouts.get(&path).cloned() else { continue };
                let tfields: Vec<TStructField> = layout.fields.iter().map(|(n, t)| TStructField { name: *n, ty: *t }).collect();
                decls.push(TopDecl::Struct { path: path.clone(), fields: tfields.clone(), range: range_of_name.clone() });
                let ctor_path = path.append(intern("$constructor"));
                if let Some(ctor_sig) = sigs.get(&ctor_path).cloned() {
                    let ctor_body = synthesize_constructor_body(&ctor_sig, &tfields);
                    decls.push(TopDecl::FnDef { sig: ctor_sig, body: ctor_body });
                }
            }
            StmtKind::Import { segments, resolved } => {
                let Some(block) = resolved else { continue };
                let nested_module = extend_module(module, segments);
                let inner = verify_decls(&block.stmts, &nested_module, verifier, sigs, sink);
                let wrapped = segments.iter().rev().fold(inner, |acc, seg| vec![TopDecl::Import { name: *seg, nested: acc }]);
                decls.extend(wrapped);
            }
            _ => {}
        }
    }
    decls
}

/// Builds `$constructor`'s body: one `self.field = field;` assignment per
/// declared field, matching the call-site argument order `verify_struct_init`
/// produces.
fn synthesize_constructor_body(sig: &TFnSig, fields: &[TStructField]) -> Vec<TStmt> {
    let range = sig.range.clone();
    let self_name = intern("self");
    fields
        .iter()
        .zip(sig.params.iter())
        .map(|(field, param)| {
            let target = TExpr {
                kind: TExprKind::Member(Box::new(TExpr { kind: TExprKind::Local(self_name), ty: sig.ret, range: range.clone() }), field.name),
                ty: field.ty,
                range: range.clone(),
            };
            let value = TExpr { kind: TExprKind::Local(param.name), ty: param.ty, range: range.clone() };
            TStmt {
                kind: TStmtKind::Expr(TExpr {
                    kind: TExprKind::Assign(Box::new(target), Box::new(value)),
                    ty: field.ty,
                    range: range.clone(),
                }),
                range: range.clone(),
            }
        })
        .collect()
}

fn verify_fn_body(verifier: &mut ExprVerifier, sig: &TFnSig, block: &Block, sink: &mut Sink) -> Vec<TStmt> {
    verifier.vars = crate::sema::varstate::VarTable::new();
    verifier.var_types.clear();
    verifier.scope_names = vec![HashSet::new()];
    verifier.current_binding.clear();
    verifier.scope_bindings = vec![Vec::new()];
    for p in &sig.params {
        let mut state = fresh_var_state(p.ty, verifier.struct_layouts);
        state.make_definitely_defined(&sig.range);
        verifier.declare_local(p.name, p.ty, state);
        verifier.scope_names.last_mut().unwrap().insert(p.name);
        verifier.current_binding.insert(p.name, p.name);
    }
    verify_stmts(&block.stmts, verifier, sig.ret, 0, sink)
}

/// Declares a new local, honouring same-scope redefinition (error) vs
/// cross-scope shadowing (rename to a fresh `name$N` storage symbol so the
/// outer binding's liveness state is untouched). Returns the storage symbol
/// the declaration actually lives under.
fn declare_variable(verifier: &mut ExprVerifier, source_name: Symbol, ty: Ty, range: &Range, sink: &mut Sink) -> Symbol {
    if verifier.scope_names.last().is_some_and(|s| s.contains(&source_name)) {
        sink.error(range.clone(), format!("redefinition of `{source_name}` in the same scope"));
    }
    verifier.scope_names.last_mut().unwrap().insert(source_name);

    let storage = if verifier.vars.contains(source_name) {
        let counter = verifier.rename_counters.entry(source_name).or_insert(0);
        *counter += 1;
        intern(&format!("{source_name}${}", *counter))
    } else {
        source_name
    };
    let previous_binding = verifier.current_binding.insert(source_name, storage);
    verifier.scope_bindings.last_mut().unwrap().push((source_name, previous_binding));

    let state = fresh_var_state(ty, verifier.struct_layouts);
    verifier.declare_local(storage, ty, state);
    storage
}

fn enter_block(verifier: &mut ExprVerifier, range: &Range) {
    verifier.vars.enter_scope(range);
    verifier.scope_names.push(HashSet::new());
    verifier.scope_bindings.push(Vec::new());
}

fn exit_block(verifier: &mut ExprVerifier, join: bool) {
    if join {
        verifier.vars.exit_scope_branch();
    } else {
        verifier.vars.exit_scope_block();
    }
    verifier.scope_names.pop();
    if let Some(undo) = verifier.scope_bindings.pop() {
        for (name, previous) in undo.into_iter().rev() {
            match previous {
                Some(prev) => {
                    verifier.current_binding.insert(name, prev);
                }
                None => {
                    verifier.current_binding.remove(&name);
                }
            }
        }
    }
}

fn verify_stmts(stmts: &[Stmt], verifier: &mut ExprVerifier, ret_ty: Ty, loop_depth: u32, sink: &mut Sink) -> Vec<TStmt> {
    stmts.iter().filter_map(|s| verify_stmt(s, verifier, ret_ty, loop_depth, sink)).collect()
}

fn verify_stmt(stmt: &Stmt, verifier: &mut ExprVerifier, ret_ty: Ty, loop_depth: u32, sink: &mut Sink) -> Option<TStmt> {
    let range = stmt.range.clone();
    let kind = match &stmt.kind {
        StmtKind::Return(expr) => {
            let texpr = expr.as_ref().and_then(|e| verifier.verify_normal(e, sink));
            match (&texpr, ret_ty.is_void()) {
                (Some(t), false) if !types::is_assignable_from(ret_ty, t.ty) => {
                    sink.error(range.clone(), format!("cannot return `{}` from a function returning `{}`", t.ty, ret_ty));
                }
                (None, false) if expr.is_some() => {}
                (Some(_), true) => {
                    sink.error(range.clone(), "cannot return a value from a void function");
                }
                (None, _) if expr.is_none() && !ret_ty.is_void() => {
                    sink.error(range.clone(), format!("function returning `{ret_ty}` must return a value"));
                }
                _ => {}
            }
            TStmtKind::Return(texpr)
        }
        StmtKind::If { cond, then_branch, else_branch } => {
            let tcond = verifier.verify_normal(cond, sink)?;
            enter_block(verifier, &then_branch.range);
            let then_stmts = verify_stmts(&then_branch.stmts, verifier, ret_ty, loop_depth, sink);
            exit_block(verifier, true);
            let else_stmts = else_branch.as_ref().map(|b| {
                enter_block(verifier, &b.range);
                let stmts = verify_stmts(&b.stmts, verifier, ret_ty, loop_depth, sink);
                exit_block(verifier, true);
                stmts
            });
            TStmtKind::If { cond: tcond, then_branch: then_stmts, else_branch: else_stmts }
        }
        StmtKind::While { cond, body } => {
            let tcond = verifier.verify_normal(cond, sink)?;
            enter_block(verifier, &body.range);
            let body_stmts = verify_stmts(&body.stmts, verifier, ret_ty, loop_depth + 1, sink);
            exit_block(verifier, true);
            TStmtKind::While { cond: tcond, body: body_stmts }
        }
        StmtKind::Break => {
            if loop_depth == 0 {
                sink.error(range.clone(), "`break` outside of a loop");
            }
            TStmtKind::Break
        }
        StmtKind::Continue => {
            if loop_depth == 0 {
                sink.error(range.clone(), "`continue` outside of a loop");
            }
            TStmtKind::Continue
        }
        StmtKind::Block(block) => {
            enter_block(verifier, &block.range);
            let body_stmts = verify_stmts(&block.stmts, verifier, ret_ty, loop_depth, sink);
            exit_block(verifier, false);
            TStmtKind::Block(body_stmts)
        }
        StmtKind::Struct { .. } | StmtKind::Import { .. } | StmtKind::FnDecl { .. } => {
            // Nested declarations inside a function body are not part of
            // this language's grammar (these only appear at module scope);
            // the parser never produces them here.
            return None;
        }
        StmtKind::VarDecl { ty, name, init } => {
            let Some(declared_ty) = resolve_type_expr(verifier, ty, sink) else { return None };
            let tinit = init.as_ref().and_then(|e| verifier.verify_normal(e, sink));
            if let Some(t) = &tinit {
                if !types::is_assignable_from(declared_ty, t.ty) {
                    sink.error(range.clone(), format!("cannot initialise `{name}` of type `{declared_ty}` with `{}`", t.ty));
                }
            }
            let storage = declare_variable(verifier, *name, declared_ty, &range, sink);
            if tinit.is_some() {
                if let Some(state) = verifier.vars.get_mut(storage) {
                    state.make_definitely_defined(&range);
                }
            }
            TStmtKind::VarDecl { name: storage, ty: declared_ty, init: tinit }
        }
        StmtKind::Expr(e) => {
            let t = verifier.verify_normal(e, sink)?;
            TStmtKind::Expr(t)
        }
    };
    Some(TStmt { kind, range })
}

/// Whether `stmts` returns a value on every path reachable from its start: a
/// `return` anywhere in the sequence makes everything after it unreachable,
/// so the first one found settles it; an `if` needs both arms to return; a
/// `while` whose body unconditionally returns counts too (spec §4.6: "a
/// nested block, while-loop, or if-else where both branches unconditionally
/// return").
fn returns_unconditionally(stmts: &[TStmt]) -> bool {
    for stmt in stmts {
        match &stmt.kind {
            TStmtKind::Return(_) => return true,
            TStmtKind::If { then_branch, else_branch: Some(else_branch), .. } => {
                if returns_unconditionally(then_branch) && returns_unconditionally(else_branch) {
                    return true;
                }
            }
            TStmtKind::Block(body) => {
                if returns_unconditionally(body) {
                    return true;
                }
            }
            TStmtKind::While { body, .. } => {
                if returns_unconditionally(body) {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Sink;
    use crate::parser::parse_unit;

    fn parse(src: &str) -> Vec<Stmt> {
        let mut sink = Sink::new();
        let stmts = parse_unit(src, "t.kl", &[], &mut sink);
        assert_eq!(sink.error_count(), 0, "parse errors: {:?}", sink.diagnostics());
        stmts
    }

    #[test]
    fn function_returning_value_on_every_path_is_accepted() {
        let interner = TypeInterner::new();
        let stmts = parse("fn f(bool c) i32 { if (c) { return 1; } else { return 2; } }");
        let mut sink = Sink::new();
        analyse(&stmts, &HashMap::new(), &interner, &mut sink);
        assert_eq!(sink.error_count(), 0, "{:?}", sink.diagnostics());
    }

    #[test]
    fn missing_return_on_one_path_is_an_error() {
        let interner = TypeInterner::new();
        let stmts = parse("fn f(bool c) i32 { if (c) { return 1; } }");
        let mut sink = Sink::new();
        analyse(&stmts, &HashMap::new(), &interner, &mut sink);
        assert!(sink.error_count() > 0);
    }

    #[test]
    fn while_body_that_always_returns_counts_as_returning() {
        let interner = TypeInterner::new();
        let stmts = parse("fn f() i32 { while (1) { return 0; } }");
        let mut sink = Sink::new();
        analyse(&stmts, &HashMap::new(), &interner, &mut sink);
        assert_eq!(sink.error_count(), 0, "{:?}", sink.diagnostics());
    }

    #[test]
    fn struct_gets_a_synthesized_constructor() {
        let interner = TypeInterner::new();
        let stmts = parse("struct Point { i32 x; i32 y; }");
        let mut sink = Sink::new();
        let unit = analyse(&stmts, &HashMap::new(), &interner, &mut sink);
        assert_eq!(sink.error_count(), 0, "{:?}", sink.diagnostics());
        let has_ctor = unit
            .decls
            .iter()
            .any(|d| matches!(d, TopDecl::FnDef { sig, .. } if sig.path.last().map(|s| s.as_str() == "$constructor").unwrap_or(false)));
        assert!(has_ctor);
    }

    #[test]
    fn struct_declaration_order_is_topologically_sorted() {
        // `Outer` is declared first in source but contains `Inner` by value,
        // so `Inner` must come first in the typed tree (spec §3 I5, §8 P4).
        let interner = TypeInterner::new();
        let stmts = parse("struct Outer { Inner i; i32 x; } struct Inner { i32 y; }");
        let mut sink = Sink::new();
        let unit = analyse(&stmts, &HashMap::new(), &interner, &mut sink);
        assert_eq!(sink.error_count(), 0, "{:?}", sink.diagnostics());
        let struct_names: Vec<&str> = unit
            .decls
            .iter()
            .filter_map(|d| match d {
                TopDecl::Struct { path, .. } => Some(path.last().unwrap().as_str()),
                _ => None,
            })
            .collect();
        let inner_pos = struct_names.iter().position(|&n| n == "Inner").unwrap();
        let outer_pos = struct_names.iter().position(|&n| n == "Outer").unwrap();
        assert!(inner_pos < outer_pos, "expected Inner before Outer, got {struct_names:?}");
    }

    #[test]
    fn redeclaring_a_name_in_the_same_block_is_an_error() {
        let interner = TypeInterner::new();
        let stmts = parse("fn f() void { i32 x = 1; i32 x = 2; }");
        let mut sink = Sink::new();
        analyse(&stmts, &HashMap::new(), &interner, &mut sink);
        assert!(sink.error_count() > 0);
    }

    #[test]
    fn shadowing_an_outer_scope_renames_instead_of_erroring() {
        let interner = TypeInterner::new();
        let stmts = parse("fn f() void { i32 x = 1; if (true) { i32 x = 2; } }");
        let mut sink = Sink::new();
        analyse(&stmts, &HashMap::new(), &interner, &mut sink);
        assert_eq!(sink.error_count(), 0, "{:?}", sink.diagnostics());
    }

    #[test]
    fn break_outside_loop_is_an_error() {
        let interner = TypeInterner::new();
        let stmts = parse("fn f() void { break; }");
        let mut sink = Sink::new();
        analyse(&stmts, &HashMap::new(), &interner, &mut sink);
        assert!(sink.error_count() > 0);
    }

    #[test]
    fn method_call_passes_receiver_as_this() {
        let interner = TypeInterner::new();
        let stmts = parse(
            "struct S { i32 x; } \
            fn S.get(S this) i32 { return this.x; } \
            fn main() void { S s = S[1]; s.get(); }",
        );
        let mut sink = Sink::new();
        analyse(&stmts, &HashMap::new(), &interner, &mut sink);
        assert_eq!(sink.error_count(), 0, "{:?}", sink.diagnostics());
    }

    #[test]
    fn method_call_auto_refs_a_pointer_this() {
        let interner = TypeInterner::new();
        let stmts = parse(
            "struct S { i32 x; } \
            fn S.get(*S this) i32 { return this.x; } \
            fn main() void { S s = S[1]; s.get(); }",
        );
        let mut sink = Sink::new();
        analyse(&stmts, &HashMap::new(), &interner, &mut sink);
        assert_eq!(sink.error_count(), 0, "{:?}", sink.diagnostics());
    }

    #[test]
    fn call_with_wrong_arity_is_an_error() {
        let interner = TypeInterner::new();
        let stmts = parse("fn take(i32 x) void {} fn main() void { take(); }");
        let mut sink = Sink::new();
        analyse(&stmts, &HashMap::new(), &interner, &mut sink);
        assert!(sink.error_count() > 0);
    }

    #[test]
    fn call_with_wrong_argument_type_is_an_error() {
        let interner = TypeInterner::new();
        let stmts = parse("fn take(i32 x) void {} fn main() void { take(true); }");
        let mut sink = Sink::new();
        analyse(&stmts, &HashMap::new(), &interner, &mut sink);
        assert!(sink.error_count() > 0);
    }
}
