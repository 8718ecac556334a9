//! Built-in macro expansion.
//!
//! Macros are expanded at the semantic layer, before their arguments are
//! otherwise verified: each declares an argument shape and is handled here
//! rather than through the ordinary call-resolution path.

use crate::ast::Expr;
use crate::diag::{Range, Sink};
use crate::hir::{TExpr, TExprKind};
use crate::path::Path;
use crate::sema::expr::ExprVerifier;
use crate::symbol::Symbol;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuiltinMacro {
    As,
    Extern,
    ExternVariadic,
}

#[must_use]
pub fn resolve_builtin(name: Symbol) -> Option<BuiltinMacro> {
    match name.as_str() {
        "as" => Some(BuiltinMacro::As),
        "extern" => Some(BuiltinMacro::Extern),
        // The variadic counterpart named in ("`extern!`... and
        // its variadic counterpart"), named `externv!` the way this
        // language's other variadic marker (`...`) is spelled as a suffix
        // rather than a separate keyword.
        "externv" => Some(BuiltinMacro::ExternVariadic),
        _ => None,
    }
}

/// `as!(expr, Type)`: produces the same cast node a
/// parser-level cast would. Compound casts are rejected with the
/// "define an `as_T` method" hint.
pub fn expand_as(verifier: &mut ExprVerifier, args: &[Expr], range: &Range, sink: &mut Sink) -> Option<TExpr> {
    let [expr_arg, ty_arg] = args else {
        sink.error(range.clone(), "as! expects exactly 2 arguments: an expression and a type");
        return None;
    };
    let target = Path::from_expr(ty_arg).and_then(|p| verifier.resolve_type_path(&p, range, sink));
    let inner = verifier.verify_normal(expr_arg, sink)?;
    let target = target?;
    if !inner.ty.is_primitive() || !target.is_primitive() {
        sink.error(
            range.clone(),
            format!("cannot cast `{}` to `{target}`; define an `as_{target}` method instead", inner.ty),
        );
        return None;
    }
    Some(TExpr { kind: TExprKind::Cast(Box::new(inner)), ty: target, range: range.clone() })
}

/// `extern!(ReturnType, name, ArgType,...)` and its variadic counterpart
///: registers a declaration-only function under
/// `current_module.append(name)`. Redeclaration is an error with a
/// "previous declaration here" note.
pub fn expand_extern(verifier: &mut ExprVerifier, args: &[Expr], variadic: bool, range: &Range, sink: &mut Sink) -> Option<TExpr> {
    let [ret_arg, name_arg, arg_tys @ ..] = args else {
        sink.error(range.clone(), "extern! expects a return type and a name");
        return None;
    };
    let ret_path = Path::from_expr(ret_arg)?;
    let ret = verifier.resolve_type_path(&ret_path, range, sink)?;
    let name_path = Path::from_expr(name_arg)?;
    let name = name_path.last()?;
    let mut params = Vec::new();
    for ty_expr in arg_tys {
        let p = Path::from_expr(ty_expr)?;
        let ty = verifier.resolve_type_path(&p, range, sink)?;
        params.push(ty);
    }
    let path = verifier.current_module().append(name);
    if let Some(previous) = verifier.declare_extern(path.clone(), params, variadic, ret, range.clone()) {
        sink.error(range.clone(), format!("redeclaration of `{path}`"))
            .note(previous, "previous declaration here");
        return None;
    }
    // `extern!` itself evaluates to a reference to the declared function,
    // not a call; callers dispatch through ordinary call verification
    // afterwards against the return type just registered.
    Some(TExpr { kind: TExprKind::Global(path), ty: ret, range: range.clone() })
}
