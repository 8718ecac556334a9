//! The untyped syntactic tree.
//!
//! One node per grammar construct; every node carries a [`Range`]. This is
//! the parser's output and the semantic analyser's input — it is never
//! mutated in place, only consumed to build the typed tree in [`crate::hir`].

use std::rc::Rc;

use crate::diag::Range;
use crate::symbol::Symbol;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Ref,
    Deref,
    Not,
    /// Leading `::`, anchoring the path that follows at the global root.
    GlobalAnchor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

/// An unresolved, syntactic type reference: a name (possibly a path) plus a
/// pointer level, exactly as written by the user. Resolved into a
/// `crate::types::Ty` during semantic analysis.
#[derive(Clone, Debug)]
pub struct TypeExpr {
    pub path: Path,
    pub ptr_level: u32,
    pub range: Range,
}

use crate::path::Path;

#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub range: Range,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Int(u64),
    Real(f64),
    Str(Rc<str>),
    Bool(bool),
    Null,
    /// A bare identifier, before it is known whether it names a variable, a
    /// function, or a path segment.
    Name(Symbol),
    /// A macro-identifier call, e.g. `as!(x, i32)`. The callee name excludes
    /// the trailing `!`.
    MacroCall(Symbol, Vec<Expr>),
    /// `left::right`, produced by the infix `::` parselet; [`Path::from_expr`]
    /// flattens chains of these (and a leading [`UnOp::GlobalAnchor`]) back
    /// into a [`Path`].
    PathConcat(Box<Expr>, Box<Expr>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Assign(Box<Expr>, Box<Expr>),
    Member(Box<Expr>, Symbol),
    Call(Box<Expr>, Vec<Expr>),
    /// Struct-init syntax `Name[field0, field1,...]`; only legal with a
    /// name/path on the left (enforced by the parser, not this tree).
    StructInit(Box<Expr>, Vec<Expr>),
    /// `[e, e,...]` list literal atom (expression atoms).
    List(Vec<Expr>),
    /// A parenthesized sub-expression, kept so range-covering and
    /// pretty-printing (S1's `(3+(4*5))` form) can distinguish grouping from
    /// operator precedence without reparsing.
    Group(Box<Expr>),
    /// The parser's error-recovery sentinel: a diagnostic was
    /// already recorded at `range`; this node carries no further meaning.
    Error,
}

#[derive(Clone, Debug)]
pub struct Param {
    pub ty: TypeExpr,
    pub name: Symbol,
    pub range: Range,
}

#[derive(Clone, Debug)]
pub struct FnSig {
    /// `Some(ty)` when the declaration is `Type.name(...)`, a method.
    pub receiver: Option<TypeExpr>,
    pub name: Symbol,
    pub params: Vec<Param>,
    pub variadic: bool,
    pub ret: Option<TypeExpr>,
    pub range: Range,
}

#[derive(Clone, Debug)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub range: Range,
}

#[derive(Clone, Debug)]
pub struct StructField {
    pub ty: TypeExpr,
    pub name: Symbol,
    pub range: Range,
}

#[derive(Clone, Debug)]
pub struct Stmt {
    pub kind: StmtKind,
    pub range: Range,
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    FnDecl { sig: FnSig, body: Option<Block> },
    Return(Option<Expr>),
    If { cond: Expr, then_branch: Block, else_branch: Option<Block> },
    While { cond: Expr, body: Block },
    Break,
    Continue,
    Block(Block),
    Struct { name: Symbol, fields: Vec<StructField>, range_of_name: Range },
    /// `import a.b.c;`, before resolution. `segments` is the written path,
    /// already split at `.`; resolution and nesting happen in the analyser,
    /// which wraps the parsed file in nested `Import` statement nodes — one
    /// per segment — using this same variant.
    Import { segments: Vec<Symbol>, resolved: Option<Block> },
    VarDecl { ty: TypeExpr, name: Symbol, init: Option<Expr> },
    Expr(Expr),
}

impl Expr {
    #[must_use]
    pub fn error(range: Range) -> Self {
        Expr { kind: ExprKind::Error, range }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self.kind, ExprKind::Error)
    }

    /// Pretty-prints the fully-parenthesized form used by S1 (`3 + 4 * 5`
    /// prints as `(3+(4*5))`), for parser golden tests.
    #[must_use]
    pub fn to_paren_string(&self) -> String {
        match &self.kind {
            ExprKind::Int(v) => v.to_string(),
            ExprKind::Real(v) => v.to_string(),
            ExprKind::Str(s) => format!("{s:?}"),
            ExprKind::Bool(b) => b.to_string(),
            ExprKind::Null => "null".to_string(),
            ExprKind::Name(s) => s.to_string(),
            ExprKind::MacroCall(name, args) => {
                let inner: Vec<_> = args.iter().map(Expr::to_paren_string).collect();
                format!("{name}!({})", inner.join(","))
            }
            ExprKind::PathConcat(l, r) => format!("{}::{}", l.to_paren_string(), r.to_paren_string()),
            ExprKind::Unary(op, inner) => {
                let sym = match op {
                    UnOp::Neg => "-",
                    UnOp::Ref => "&",
                    UnOp::Deref => "*",
                    UnOp::Not => "!",
                    UnOp::GlobalAnchor => "::",
                };
                format!("({sym}{})", inner.to_paren_string())
            }
            ExprKind::Binary(op, l, r) => {
                let sym = match op {
                    BinOp::Add => "+",
                    BinOp::Sub => "-",
                    BinOp::Mul => "*",
                    BinOp::Div => "/",
                    BinOp::Lt => "<",
                    BinOp::Le => "<=",
                    BinOp::Gt => ">",
                    BinOp::Ge => ">=",
                    BinOp::Eq => "==",
                    BinOp::Ne => "!=",
                };
                format!("({}{sym}{})", l.to_paren_string(), r.to_paren_string())
            }
            ExprKind::Assign(l, r) => format!("({}={})", l.to_paren_string(), r.to_paren_string()),
            ExprKind::Member(l, name) => format!("{}.{}", l.to_paren_string(), name),
            ExprKind::Call(callee, args) => {
                let inner: Vec<_> = args.iter().map(Expr::to_paren_string).collect();
                format!("{}({})", callee.to_paren_string(), inner.join(","))
            }
            ExprKind::StructInit(callee, args) => {
                let inner: Vec<_> = args.iter().map(Expr::to_paren_string).collect();
                format!("{}[{}]", callee.to_paren_string(), inner.join(","))
            }
            ExprKind::List(items) => {
                let inner: Vec<_> = items.iter().map(Expr::to_paren_string).collect();
                format!("[{}]", inner.join(","))
            }
            ExprKind::Group(inner) => inner.to_paren_string(),
            ExprKind::Error => "<error>".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::intern;
    use std::rc::Rc as StdRc;

    fn r() -> Range {
        Range::synthetic(StdRc::from("test.kl"))
    }

    #[test]
    fn precedence_prints_with_full_parenthesization() {
        // 3 + 4 * 5
        let three = Expr { kind: ExprKind::Int(3), range: r() };
        let four = Expr { kind: ExprKind::Int(4), range: r() };
        let five = Expr { kind: ExprKind::Int(5), range: r() };
        let mul = Expr { kind: ExprKind::Binary(BinOp::Mul, Box::new(four), Box::new(five)), range: r() };
        let add = Expr { kind: ExprKind::Binary(BinOp::Add, Box::new(three), Box::new(mul)), range: r() };
        assert_eq!(add.to_paren_string(), "(3+(4*5))");
    }

    #[test]
    fn macro_call_name_excludes_bang() {
        let name = intern("as");
        let arg = Expr { kind: ExprKind::Int(1), range: r() };
        let call = Expr { kind: ExprKind::MacroCall(name, vec![arg]), range: r() };
        assert_eq!(call.to_paren_string(), "as!(1)");
    }
}
