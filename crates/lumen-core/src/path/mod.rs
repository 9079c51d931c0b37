//! Path-expression compilation and evaluation.
//!
//! Implements the subset of FHIRPath the store needs for search-parameter
//! extraction and subscription trigger criteria: member navigation,
//! `where`/`exists`/`empty`/`not`/`first`/`count`/`resolve`/`ofType`,
//! comparison and boolean operators, literals, and the `%previous` /
//! `%current` / `%resource` variables.

mod ast;
mod eval;
mod lexer;
mod parser;

pub use ast::{BinaryOp, Expr, Literal};
pub use eval::{EvalContext, PathExpression};
