//! The Pratt parser.
//!
//! Tokens become the untyped syntactic tree ([`crate::ast`]) via prefix and
//! infix parselet dispatch keyed by [`TokenKind`]. The parser never panics
//! and never fails outright: an unexpected token is recorded into the
//! [`Sink`] and an [`ExprKind::Error`] sentinel takes its place so the
//! enclosing construct still gets a shape.

use std::path::{Path as FsPath, PathBuf};
use std::rc::Rc;

use crate::ast::*;
use crate::diag::{Range, Sink};
use crate::lexer::{Checkpoint, Lexer, Token, TokenKind};
use crate::path::Path;
use crate::symbol::{intern, Symbol};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    None,
    Assignment,
    Equality,
    Compare,
    Sum,
    Product,
    Prefix,
    Call,
    NameConcat,
}

fn infix_prec(kind: TokenKind) -> Prec {
    match kind {
        TokenKind::Equal => Prec::Assignment,
        TokenKind::DoubleEqual | TokenKind::NotEqual => Prec::Equality,
        TokenKind::Smaller | TokenKind::SmallerEqual | TokenKind::Greater | TokenKind::GreaterEqual => Prec::Compare,
        TokenKind::Plus | TokenKind::Minus => Prec::Sum,
        TokenKind::Asterisk | TokenKind::Slash => Prec::Product,
        TokenKind::ParenOpen | TokenKind::BracketOpen | TokenKind::Period => Prec::Call,
        TokenKind::DoubleColon => Prec::NameConcat,
        _ => Prec::None,
    }
}

pub struct Parser {
    lexer: Lexer,
    current: Token,
    file_dir: PathBuf,
    search_paths: Vec<PathBuf>,
    seen_imports: std::collections::HashSet<PathBuf>,
}

impl Parser {
    fn new(lexer: Lexer, file_dir: PathBuf, search_paths: Vec<PathBuf>) -> Self {
        let mut lexer = lexer;
        let current = lexer.consume();
        Parser { lexer, current, file_dir, search_paths, seen_imports: std::collections::HashSet::new() }
    }

    fn bump(&mut self) -> Token {
        let next = self.lexer.consume();
        std::mem::replace(&mut self.current, next)
    }

    fn checkpoint(&self) -> (Checkpoint, Token) {
        (self.lexer.checkpoint(), self.current.clone())
    }

    fn rollback(&mut self, (cp, tok): (Checkpoint, Token)) {
        self.lexer.rollback(cp);
        self.current = tok;
    }

    fn expect(&mut self, kind: TokenKind, sink: &mut Sink, what: &str) -> Token {
        if self.current.kind == kind {
            self.bump()
        } else {
            sink.error(self.current.range.clone(), format!("expected {what}, found `{}`", self.current.lexeme));
            self.current.clone()
        }
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    // --- Statements -----------------------------------------------------

    fn parse_block(&mut self, sink: &mut Sink) -> Block {
        let open = self.expect(TokenKind::CurlyOpen, sink, "`{`").range;
        let mut stmts = Vec::new();
        while !self.at(TokenKind::CurlyClose) && !self.at(TokenKind::End) {
            stmts.push(self.parse_stmt(sink));
        }
        let close = self.expect(TokenKind::CurlyClose, sink, "`}`").range;
        Block { stmts, range: open.cover(&close) }
    }

    fn parse_type_expr(&mut self, sink: &mut Sink) -> TypeExpr {
        let start = self.current.range.clone();
        let path = if self.at(TokenKind::Type) {
            let tok = self.bump();
            Path::single(intern(&tok.lexeme))
        } else if self.at(TokenKind::Name) || self.at(TokenKind::DoubleColon) {
            let e = self.parse_prefix(sink, Prec::NameConcat);
            Path::from_expr(&e).unwrap_or_else(|| {
                sink.error(e.range.clone(), "expected a type name");
                Path::single(intern("<error>"))
            })
        } else {
            sink.error(start.clone(), "expected a type");
            Path::single(intern("<error>"))
        };
        let mut ptr_level = 0;
        while self.eat(TokenKind::Asterisk) {
            ptr_level += 1;
        }
        let end = self.current.range.clone();
        TypeExpr { path, ptr_level, range: start.cover(&end) }
    }

    /// Looks ahead to see whether the upcoming tokens look like the start of
    /// a variable declaration (`Type name` or `Type *name` etc.), using the
    /// checkpoint mechanism so the probe is free to abandon.
    fn looks_like_var_decl(&mut self) -> bool {
        let saved = self.checkpoint();
        let is_type_start = self.at(TokenKind::Type) || self.at(TokenKind::Name) || self.at(TokenKind::DoubleColon);
        if !is_type_start {
            self.rollback(saved);
            return false;
        }
        let mut probe_sink = Sink::new();
        self.parse_type_expr(&mut probe_sink);
        let result = self.at(TokenKind::Name) && probe_sink.error_count() == 0;
        self.rollback(saved);
        result
    }

    pub fn parse_stmt(&mut self, sink: &mut Sink) -> Stmt {
        let start = self.current.range.clone();
        match self.current.kind {
            TokenKind::Fn => self.parse_fn_decl(sink),
            TokenKind::Return => {
                self.bump();
                let expr = if self.at(TokenKind::Semicolon) { None } else { Some(self.parse_expr(sink)) };
                let end = self.expect(TokenKind::Semicolon, sink, "`;`").range;
                Stmt { kind: StmtKind::Return(expr), range: start.cover(&end) }
            }
            TokenKind::If => {
                self.bump();
                let cond = self.parse_expr(sink);
                let then_branch = self.parse_block(sink);
                let else_branch = if self.eat(TokenKind::Else) { Some(self.parse_block(sink)) } else { None };
                let end = else_branch.as_ref().map_or(&then_branch.range, |b| &b.range).clone();
                Stmt { kind: StmtKind::If { cond, then_branch, else_branch }, range: start.cover(&end) }
            }
            TokenKind::While => {
                self.bump();
                let cond = self.parse_expr(sink);
                let body = self.parse_block(sink);
                let range = start.cover(&body.range);
                Stmt { kind: StmtKind::While { cond, body }, range }
            }
            TokenKind::Break => {
                self.bump();
                let end = self.expect(TokenKind::Semicolon, sink, "`;`").range;
                Stmt { kind: StmtKind::Break, range: start.cover(&end) }
            }
            TokenKind::Continue => {
                self.bump();
                let end = self.expect(TokenKind::Semicolon, sink, "`;`").range;
                Stmt { kind: StmtKind::Continue, range: start.cover(&end) }
            }
            TokenKind::CurlyOpen => {
                let block = self.parse_block(sink);
                let range = block.range.clone();
                Stmt { kind: StmtKind::Block(block), range }
            }
            TokenKind::Struct => self.parse_struct(sink),
            TokenKind::Import => self.parse_import(sink),
            _ if self.looks_like_var_decl() => self.parse_var_decl(sink),
            _ => {
                let expr = self.parse_expr(sink);
                let end = self.expect(TokenKind::Semicolon, sink, "`;`").range;
                let range = start.cover(&end);
                Stmt { kind: StmtKind::Expr(expr), range }
            }
        }
    }

    fn parse_var_decl(&mut self, sink: &mut Sink) -> Stmt {
        let start = self.current.range.clone();
        let ty = self.parse_type_expr(sink);
        let name_tok = self.expect(TokenKind::Name, sink, "a variable name");
        let name = intern(&name_tok.lexeme);
        let init = if self.eat(TokenKind::Equal) { Some(self.parse_expr(sink)) } else { None };
        let end = self.expect(TokenKind::Semicolon, sink, "`;`").range;
        Stmt { kind: StmtKind::VarDecl { ty, name, init }, range: start.cover(&end) }
    }

    fn parse_fn_decl(&mut self, sink: &mut Sink) -> Stmt {
        let start = self.bump().range; // `fn`
        let first = self.parse_type_expr(sink);
        let (receiver, name) = if self.eat(TokenKind::Period) {
            let name_tok = self.expect(TokenKind::Name, sink, "a method name");
            (Some(first), intern(&name_tok.lexeme))
        } else {
            let name = first.path.last().unwrap_or_else(|| intern("<error>"));
            (None, name)
        };
        self.expect(TokenKind::ParenOpen, sink, "`(`");
        let mut params = Vec::new();
        let mut variadic = false;
        while !self.at(TokenKind::ParenClose) && !self.at(TokenKind::End) {
            if self.eat(TokenKind::TriplePeriod) {
                variadic = true;
                break;
            }
            let prange = self.current.range.clone();
            let ty = self.parse_type_expr(sink);
            let name_tok = self.expect(TokenKind::Name, sink, "a parameter name");
            params.push(Param { ty, name: intern(&name_tok.lexeme), range: prange });
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::ParenClose, sink, "`)`");
        let ret = if self.at(TokenKind::CurlyOpen) { None } else { Some(self.parse_type_expr(sink)) };
        let sig_end = ret.as_ref().map_or(self.current.range.clone(), |r| r.range.clone());
        let sig = FnSig { receiver, name, params, variadic, ret, range: start.cover(&sig_end) };
        let body = if self.at(TokenKind::CurlyOpen) { Some(self.parse_block(sink)) } else {
            self.expect(TokenKind::Semicolon, sink, "`;` or a function body");
            None
        };
        let range = body.as_ref().map_or(sig.range.clone(), |b| sig.range.cover(&b.range));
        Stmt { kind: StmtKind::FnDecl { sig, body }, range }
    }

    fn parse_struct(&mut self, sink: &mut Sink) -> Stmt {
        let start = self.bump().range; // `struct`
        let name_tok = self.expect(TokenKind::Name, sink, "a struct name");
        let name = intern(&name_tok.lexeme);
        self.expect(TokenKind::CurlyOpen, sink, "`{`");
        let mut fields = Vec::new();
        while !self.at(TokenKind::CurlyClose) && !self.at(TokenKind::End) {
            let frange = self.current.range.clone();
            let ty = self.parse_type_expr(sink);
            let fname_tok = self.expect(TokenKind::Name, sink, "a field name");
            self.expect(TokenKind::Semicolon, sink, "`;`");
            fields.push(StructField { ty, name: intern(&fname_tok.lexeme), range: frange });
        }
        let end = self.expect(TokenKind::CurlyClose, sink, "`}`").range;
        Stmt { kind: StmtKind::Struct { name, fields, range_of_name: name_tok.range }, range: start.cover(&end) }
    }

    fn parse_import(&mut self, sink: &mut Sink) -> Stmt {
        let start = self.bump().range; // `import`
        let mut segments = Vec::new();
        loop {
            let tok = self.expect(TokenKind::Name, sink, "a path segment");
            segments.push(intern(&tok.lexeme));
            if !self.eat(TokenKind::Period) {
                break;
            }
        }
        let end = self.expect(TokenKind::Semicolon, sink, "`;`").range;
        let resolved = self.resolve_import(&segments, sink, &start);
        Stmt { kind: StmtKind::Import { segments, resolved }, range: start.cover(&end) }
    }

    /// Resolves `segments` against the importing file's directory, then
    /// `search_paths`, in order. A re-import of an
    /// already-canonicalised path yields an empty block rather than being
    /// dropped, so the `import` node's nesting still round-trips.
    fn resolve_import(&mut self, segments: &[Symbol], sink: &mut Sink, range: &Range) -> Option<Block> {
        let rel: PathBuf = segments.iter().map(Symbol::as_str).collect::<Vec<_>>().join("/").into();
        let mut candidate = self.file_dir.join(&rel);
        candidate.set_extension("kl");
        let found = if candidate.is_file() {
            Some(candidate)
        } else {
            self.search_paths.iter().map(|root| {
                let mut p = root.join(&rel);
                p.set_extension("kl");
                p
            }).find(|p| p.is_file())
        };
        let Some(found) = found else {
            sink.error(range.clone(), format!("could not resolve import `{}`", rel.display()));
            return None;
        };
        let canon = found.canonicalize().unwrap_or(found.clone());
        if !self.seen_imports.insert(canon) {
            return Some(Block { stmts: Vec::new(), range: range.clone() });
        }
        let source = match std::fs::read_to_string(&found) {
            Ok(s) => s,
            Err(e) => {
                sink.error(range.clone(), format!("could not read `{}`: {e}", found.display()));
                return None;
            }
        };
        let file_name: Rc<str> = Rc::from(found.to_string_lossy().as_ref());
        let dir = found.parent().map_or_else(|| PathBuf::from("."), FsPath::to_path_buf);
        let saved_dir = std::mem::replace(&mut self.file_dir, dir);
        let saved_seen = std::mem::take(&mut self.seen_imports);
        self.seen_imports = saved_seen.clone();
        let mut sub_lexer = Lexer::new(&source, file_name);
        let first = sub_lexer.consume();
        let mut sub_parser = Parser {
            lexer: sub_lexer,
            current: first,
            file_dir: self.file_dir.clone(),
            search_paths: self.search_paths.clone(),
            seen_imports: self.seen_imports.clone(),
        };
        let mut stmts = Vec::new();
        while !sub_parser.at(TokenKind::End) {
            stmts.push(sub_parser.parse_stmt(sink));
        }
        self.seen_imports = sub_parser.seen_imports;
        self.file_dir = saved_dir;
        Some(Block { stmts, range: range.clone() })
    }

    // --- Expressions ------------------------------------------------------

    pub fn parse_expr(&mut self, sink: &mut Sink) -> Expr {
        self.parse_prefix(sink, Prec::Assignment)
    }

    fn parse_prefix(&mut self, sink: &mut Sink, min_prec: Prec) -> Expr {
        let mut left = self.parse_atom(sink);
        loop {
            let prec = infix_prec(self.current.kind);
            if prec == Prec::None || prec < min_prec {
                break;
            }
            left = self.parse_infix(sink, left, prec);
        }
        left
    }

    fn parse_atom(&mut self, sink: &mut Sink) -> Expr {
        let tok = self.current.clone();
        match tok.kind {
            TokenKind::Integer => {
                self.bump();
                let v = tok.lexeme.parse::<u64>().unwrap_or(0);
                Expr { kind: ExprKind::Int(v), range: tok.range }
            }
            TokenKind::Real => {
                self.bump();
                let v = tok.lexeme.parse::<f64>().unwrap_or(0.0);
                Expr { kind: ExprKind::Real(v), range: tok.range }
            }
            TokenKind::String => {
                self.bump();
                Expr { kind: ExprKind::Str(Rc::from(tok.lexeme.as_ref())), range: tok.range }
            }
            TokenKind::True => {
                self.bump();
                Expr { kind: ExprKind::Bool(true), range: tok.range }
            }
            TokenKind::False => {
                self.bump();
                Expr { kind: ExprKind::Bool(false), range: tok.range }
            }
            TokenKind::Null => {
                self.bump();
                Expr { kind: ExprKind::Null, range: tok.range }
            }
            TokenKind::Name => {
                self.bump();
                Expr { kind: ExprKind::Name(intern(&tok.lexeme)), range: tok.range }
            }
            TokenKind::MacroName => {
                self.bump();
                let name = intern(tok.lexeme.trim_end_matches('!'));
                self.expect(TokenKind::ParenOpen, sink, "`(`");
                let args = self.parse_args(sink, TokenKind::ParenClose);
                let end = self.expect(TokenKind::ParenClose, sink, "`)`").range;
                Expr { kind: ExprKind::MacroCall(name, args), range: tok.range.cover(&end) }
            }
            TokenKind::DoubleColon => {
                self.bump();
                let inner = self.parse_prefix(sink, Prec::Prefix);
                let range = tok.range.cover(&inner.range);
                Expr { kind: ExprKind::Unary(UnOp::GlobalAnchor, Box::new(inner)), range }
            }
            TokenKind::Minus => {
                self.bump();
                let inner = self.parse_prefix(sink, Prec::Prefix);
                let range = tok.range.cover(&inner.range);
                Expr { kind: ExprKind::Unary(UnOp::Neg, Box::new(inner)), range }
            }
            TokenKind::Ampersand => {
                self.bump();
                let inner = self.parse_prefix(sink, Prec::Prefix);
                let range = tok.range.cover(&inner.range);
                Expr { kind: ExprKind::Unary(UnOp::Ref, Box::new(inner)), range }
            }
            TokenKind::Asterisk => {
                self.bump();
                let inner = self.parse_prefix(sink, Prec::Prefix);
                let range = tok.range.cover(&inner.range);
                Expr { kind: ExprKind::Unary(UnOp::Deref, Box::new(inner)), range }
            }
            TokenKind::Not => {
                self.bump();
                let inner = self.parse_prefix(sink, Prec::Prefix);
                let range = tok.range.cover(&inner.range);
                Expr { kind: ExprKind::Unary(UnOp::Not, Box::new(inner)), range }
            }
            TokenKind::ParenOpen => {
                self.bump();
                let inner = self.parse_expr(sink);
                let end = self.expect(TokenKind::ParenClose, sink, "`)`").range;
                let range = tok.range.cover(&end);
                Expr { kind: ExprKind::Group(Box::new(inner)), range }
            }
            TokenKind::BracketOpen => {
                self.bump();
                let items = self.parse_args(sink, TokenKind::BracketClose);
                let end = self.expect(TokenKind::BracketClose, sink, "`]`").range;
                Expr { kind: ExprKind::List(items), range: tok.range.cover(&end) }
            }
            _ => {
                self.bump();
                sink.error(tok.range.clone(), format!("unexpected token `{}`", tok.lexeme));
                Expr::error(tok.range)
            }
        }
    }

    fn parse_args(&mut self, sink: &mut Sink, closing: TokenKind) -> Vec<Expr> {
        let mut args = Vec::new();
        while !self.at(closing) && !self.at(TokenKind::End) {
            args.push(self.parse_expr(sink));
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        args
    }

    fn parse_infix(&mut self, sink: &mut Sink, left: Expr, prec: Prec) -> Expr {
        let tok = self.bump();
        match tok.kind {
            TokenKind::DoubleColon => {
                let right = self.parse_prefix(sink, Prec::NameConcat);
                let range = left.range.cover(&right.range);
                Expr { kind: ExprKind::PathConcat(Box::new(left), Box::new(right)), range }
            }
            TokenKind::Period => {
                // `x.as!(T)`: the receiver is spliced in as the macro
                // call's first argument before dispatch.
                if self.at(TokenKind::MacroName) {
                    let macro_tok = self.bump();
                    let name = intern(macro_tok.lexeme.trim_end_matches('!'));
                    self.expect(TokenKind::ParenOpen, sink, "`(`");
                    let mut args = vec![left.clone()];
                    args.extend(self.parse_args(sink, TokenKind::ParenClose));
                    let end = self.expect(TokenKind::ParenClose, sink, "`)`").range;
                    let range = left.range.cover(&end);
                    return Expr { kind: ExprKind::MacroCall(name, args), range };
                }
                let name_tok = self.expect(TokenKind::Name, sink, "a field or method name");
                let range = left.range.cover(&name_tok.range);
                Expr { kind: ExprKind::Member(Box::new(left), intern(&name_tok.lexeme)), range }
            }
            TokenKind::ParenOpen => {
                let args = self.parse_args(sink, TokenKind::ParenClose);
                let end = self.expect(TokenKind::ParenClose, sink, "`)`").range;
                let range = left.range.cover(&end);
                Expr { kind: ExprKind::Call(Box::new(left), args), range }
            }
            TokenKind::BracketOpen => {
                let args = self.parse_args(sink, TokenKind::BracketClose);
                let end = self.expect(TokenKind::BracketClose, sink, "`]`").range;
                let range = left.range.cover(&end);
                Expr { kind: ExprKind::StructInit(Box::new(left), args), range }
            }
            TokenKind::Equal => {
                let right = self.parse_prefix(sink, Prec::Assignment);
                let range = left.range.cover(&right.range);
                Expr { kind: ExprKind::Assign(Box::new(left), Box::new(right)), range }
            }
            _ => {
                let bin = match tok.kind {
                    TokenKind::Plus => BinOp::Add,
                    TokenKind::Minus => BinOp::Sub,
                    TokenKind::Asterisk => BinOp::Mul,
                    TokenKind::Slash => BinOp::Div,
                    TokenKind::Smaller => BinOp::Lt,
                    TokenKind::SmallerEqual => BinOp::Le,
                    TokenKind::Greater => BinOp::Gt,
                    TokenKind::GreaterEqual => BinOp::Ge,
                    TokenKind::DoubleEqual => BinOp::Eq,
                    TokenKind::NotEqual => BinOp::Ne,
                    _ => unreachable!("infix_prec only admits binary-operator kinds here"),
                };
                // `prec` is the current operator's own precedence; the
                // right operand binds everything strictly tighter (left
                // associative).
                let next_min = match prec {
                    Prec::Sum => Prec::Product,
                    Prec::Product => Prec::Prefix,
                    Prec::Compare => Prec::Sum,
                    Prec::Equality => Prec::Compare,
                    p => p,
                };
                let right = self.parse_prefix(sink, next_min);
                let range = left.range.cover(&right.range);
                Expr { kind: ExprKind::Binary(bin, Box::new(left), Box::new(right)), range }
            }
        }
    }
}

/// `parse_unit`: synchronous, always returns a tree.
#[must_use]
pub fn parse_unit(source: &str, filename: &str, search_paths: &[PathBuf], sink: &mut Sink) -> Vec<Stmt> {
    log::debug!("parse_unit: {filename}");
    let file: Rc<str> = Rc::from(filename);
    let lexer = Lexer::new(source, file);
    let dir = FsPath::new(filename).parent().map_or_else(|| PathBuf::from("."), FsPath::to_path_buf);
    let mut parser = Parser::new(lexer, dir, search_paths.to_vec());
    let mut stmts = Vec::new();
    while !parser.at(TokenKind::End) {
        stmts.push(parser.parse_stmt(sink));
    }
    log::debug!("parse_unit: {filename} done, {} errors", sink.error_count());
    stmts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_expression_precedence() {
        let mut sink = Sink::new();
        let stmts = parse_unit("3 + 4 * 5;", "t.kl", &[], &mut sink);
        assert_eq!(sink.error_count(), 0);
        let StmtKind::Expr(e) = &stmts[0].kind else { panic!("expected expr stmt") };
        assert_eq!(e.to_paren_string(), "(3+(4*5))");
    }

    #[test]
    fn macro_in_member_position_splices_receiver_as_first_argument() {
        let mut sink = Sink::new();
        let stmts = parse_unit("x.as!(i32);", "t.kl", &[], &mut sink);
        assert_eq!(sink.error_count(), 0, "{:?}", sink.diagnostics());
        let StmtKind::Expr(e) = &stmts[0].kind else { panic!("expected expr stmt") };
        let ExprKind::MacroCall(name, args) = &e.kind else { panic!("expected a macro call, got {:?}", e.kind) };
        assert_eq!(name.as_str(), "as");
        assert_eq!(args.len(), 2);
        assert_eq!(e.to_paren_string(), "as!(x,i32)");
    }

    #[test]
    fn unexpected_token_recovers_with_sentinel() {
        let mut sink = Sink::new();
        let stmts = parse_unit(");", "t.kl", &[], &mut sink);
        assert!(sink.error_count() > 0);
        let StmtKind::Expr(e) = &stmts[0].kind else { panic!("expected expr stmt") };
        assert!(e.is_error());
    }

    #[test]
    fn fn_decl_with_method_receiver() {
        let mut sink = Sink::new();
        let stmts = parse_unit("fn S.take(i32 x) void {}", "t.kl", &[], &mut sink);
        assert_eq!(sink.error_count(), 0);
        let StmtKind::FnDecl { sig, .. } = &stmts[0].kind else { panic!("expected fn decl") };
        assert!(sig.receiver.is_some());
        assert_eq!(sig.name.as_str(), "take");
    }

    #[test]
    fn variadic_params_set_flag() {
        let mut sink = Sink::new();
        let stmts = parse_unit("fn f(i32 x,...) void {}", "t.kl", &[], &mut sink);
        assert_eq!(sink.error_count(), 0);
        let StmtKind::FnDecl { sig, .. } = &stmts[0].kind else { panic!("expected fn decl") };
        assert!(sig.variadic);
        assert_eq!(sig.params.len(), 1);
    }

    #[test]
    fn missing_import_reports_one_error() {
        let mut sink = Sink::new();
        parse_unit("import does.not.exist;", "t.kl", &[], &mut sink);
        assert_eq!(sink.error_count(), 1);
    }
}
