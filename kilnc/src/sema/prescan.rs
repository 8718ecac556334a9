//! Semantic pre-scan: populate declaration tables before
//! verification touches a single statement, per the two-sub-pass split of
//! Declarations live in hashbrown maps keyed by [`Path`].

use hashbrown::HashMap;

use crate::ast::{Stmt, StmtKind};
use crate::path::Path;
use crate::symbol::Symbol;

#[derive(Clone, Debug)]
pub struct FnDeclShell {
    pub path: Path,
}

#[derive(Clone, Debug)]
pub struct StructShell {
    pub path: Path,
}

/// Declaration tables populated pre-scan, then treated as immutable for the
/// rest of the unit's verification.
#[derive(Default)]
pub struct DeclTables {
    pub functions: HashMap<Path, FnDeclShell>,
    /// Subset of `functions` whose bodies are present, tracked separately
    /// per so `extern!`-declared signatures can be told apart from
    /// real definitions without a sentinel.
    pub function_bodies: HashMap<Path, ()>,
    pub structs: HashMap<Path, StructShell>,
}

impl DeclTables {
    #[must_use]
    pub fn new() -> Self {
        DeclTables::default()
    }

    /// Walks `stmts` once, in source order, recording every function and
    /// struct path under `current_module`. `import` nodes push
    /// their name onto the current module path for the duration of their
    /// (already-resolved) nested block.
    pub fn scan(&mut self, stmts: &[Stmt], current_module: &Path) {
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::FnDecl { sig, body } => {
                    let path = match &sig.receiver {
                        Some(recv) => {
                            let recv_path = Path::single(recv.path.last().unwrap_or(sig.name)).with_prefix(current_module);
                            recv_path.append(sig.name)
                        }
                        None => current_module.append(sig.name),
                    };
                    self.functions.insert(path.clone(), FnDeclShell { path: path.clone() });
                    if body.is_some() {
                        self.function_bodies.insert(path, ());
                    }
                }
                StmtKind::Struct { name, .. } => {
                    let path = current_module.append(*name);
                    self.structs.insert(path.clone(), StructShell { path });
                }
                StmtKind::Import { segments, resolved } => {
                    if let Some(block) = resolved {
                        let mut nested_module = current_module.clone();
                        for seg in segments {
                            nested_module = nested_module.append(*seg);
                        }
                        self.scan(&block.stmts, &nested_module);
                    }
                }
                _ => {}
            }
        }
    }
}

/// Computes a function's canonical declaration path:
/// `member_of.with_prefix(current_module).append(name)` for a method, else
/// `current_module.append(name)`.
#[must_use]
pub fn fn_path(receiver_last_segment: Option<Symbol>, name: Symbol, current_module: &Path) -> Path {
    match receiver_last_segment {
        Some(recv) => Path::single(recv).with_prefix(current_module).append(name),
        None => current_module.append(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Sink;
    use crate::parser::parse_unit;
    use crate::symbol::intern;

    #[test]
    fn declares_free_function_under_module_path() {
        let mut sink = Sink::new();
        let stmts = parse_unit("fn f() void {}", "t.kl", &[], &mut sink);
        let mut tables = DeclTables::new();
        tables.scan(&stmts, &Path::root());
        assert!(tables.functions.contains_key(&Path::root().append(intern("f"))));
    }

    #[test]
    fn declares_method_under_receiver_path() {
        let mut sink = Sink::new();
        let stmts = parse_unit("fn S.take(i32 x) void {}", "t.kl", &[], &mut sink);
        let mut tables = DeclTables::new();
        tables.scan(&stmts, &Path::root());
        let expected = Path::root().append(intern("S")).append(intern("take"));
        assert!(tables.functions.contains_key(&expected));
    }

    #[test]
    fn declares_struct_under_module_path() {
        let mut sink = Sink::new();
        let stmts = parse_unit("struct S { i32 x; }", "t.kl", &[], &mut sink);
        let mut tables = DeclTables::new();
        tables.scan(&stmts, &Path::root());
        assert!(tables.structs.contains_key(&Path::root().append(intern("S"))));
    }
}
