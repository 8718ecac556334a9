//! Front-end and middle-end of the Kiln compiler: lexer, parser, semantic
//! analysis and lifetime checking.
//!
//! The four public entry points in [`mod@sema`]/[`parser`]/[`lifetime`]/
//! [`library`] are exactly those listed in:
//!
//! - [`parser::parse_unit`] — source bytes to the untyped syntactic tree.
//! - [`sema::analyse`] — syntactic tree to the typed tree.
//! - [`lifetime::lifetime_check`] — in-place ownership annotation.
//! - [`library::export_library`] / [`library::import_library`] — the
//! declaration-bundle round trip.
//!
//! Everything else (source positions, tokens, the path and type models, the
//! two tree shapes) is shared infrastructure the three passes are built on.

pub mod ast;
pub mod diag;
pub mod hir;
pub mod lexer;
pub mod library;
pub mod lifetime;
pub mod parser;
pub mod path;
pub mod sema;
pub mod symbol;
pub mod types;

pub use diag::{Range, Sink};
pub use hir::{TopDecl, TypedUnit};
pub use library::{export_library, import_library, BundleError};
pub use lifetime::lifetime_check;
pub use parser::parse_unit;
pub use sema::analyse;
