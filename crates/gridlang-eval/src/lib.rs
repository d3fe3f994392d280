//! GridLang evaluator.
//!
//! Turns a GridLang program into a populated grid. Statements are ordered
//! by their dependencies rather than their position:
//!
//! ```text
//! Program → Registry (hoisted types/callables) → Dependency graph → Plan → Machine → Sheet
//! ```
//!
//! Every block (script, loop body, callable body) is planned once. A
//! machine runs planned blocks with an explicit frame stack, which lets a
//! callable suspend at each `return` and act as a generator for a `For`
//! loop.

pub mod builtins;
pub mod config;
mod deps;
pub mod env;
pub mod error;
mod graph;
pub mod grid;
mod plan;
pub mod registry;
pub mod shape;
pub mod text;
pub mod value;

mod calls;
mod expr;
mod interp;
mod machine;
mod mutate;
mod ops;
mod script;
mod types;

pub use config::{EvalConfig, DEFAULT_GAS_LIMIT};
pub use error::{EvalError, EvalResult};
pub use grid::{Grid, Sheet};
pub use script::{run, Script};
pub use value::{Array, Field, Object, Value};
