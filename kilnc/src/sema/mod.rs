//! Semantic analysis: name/path resolution,
//! type checking, typed-tree construction, variable-state tracking, and
//! built-in macro expansion.
//!
//! Split across files under one module rather than one monolithic source:
//! [`prescan`] populates declaration tables, [`expr`] verifies expressions,
//! [`stmt`] drives statements/functions/structs and owns scope management,
//! [`varstate`] is the per-variable use-state model, and [`macros`] expands
//! the built-in macros (`as!`, `extern!`, `externv!`).

pub mod expr;
pub mod macros;
pub mod prescan;
pub mod stmt;
pub mod varstate;

pub use stmt::analyse;
