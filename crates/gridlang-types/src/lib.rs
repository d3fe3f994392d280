//! Shared types for GridLang.
//!
//! This crate defines the AST contract handed to the evaluator by the
//! parser, grid cell addresses, source spans, diagnostic codes, and a small
//! builder API for assembling programs without source text.

mod cell;
mod error;
mod span;
pub mod ast;
pub mod build;

pub use cell::{column_index, column_name, AddressError, CellAddr};
pub use error::{Diagnostic, ErrorCategory, ErrorCode};
pub use span::Span;
