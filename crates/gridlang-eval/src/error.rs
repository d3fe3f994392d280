//! Evaluation error types.

use gridlang_types::{Diagnostic, ErrorCode, Span};
use thiserror::Error;

/// Evaluation failure. Every variant is terminal for the script run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// A declaration depends on itself, directly or through others.
    #[error("cyclic dependency: {0}")]
    CyclicDependency(String),
    /// Conflicting `For`/`Let`/`:` ownership of one name.
    #[error("ordering conflict: {0}")]
    OrderingConflict(String),
    /// Name, cell or callable never resolvable.
    #[error("undefined reference: {0}")]
    UndefinedReference(String),
    /// Value outside a declared type, bound, value set or dimension.
    #[error("type constraint violation: {0}")]
    TypeConstraintViolation(String),
    /// Hidden field or private member reached from outside its type.
    #[error("access violation: {0}")]
    AccessViolation(String),
    /// `push`/`Let` on something that does not accept it.
    #[error("mutation violation: {0}")]
    MutationViolation(String),
    /// Array shapes disagree, or wrong argument count.
    #[error("arity or shape mismatch: {0}")]
    ArityOrShapeMismatch(String),
    /// `a to b step 0`
    #[error("invalid range: {0}")]
    InvalidRange(String),
    /// Configured step budget exceeded.
    #[error("gas exhausted")]
    GasExhausted,
    /// Malformed program shapes with no more specific kind.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl EvalError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::CyclicDependency(_) => ErrorCode::CYCLIC_DEPENDENCY,
            Self::OrderingConflict(_) => ErrorCode::ORDERING_CONFLICT,
            Self::UndefinedReference(_) => ErrorCode::UNDEFINED_REFERENCE,
            Self::TypeConstraintViolation(_) => ErrorCode::TYPE_CONSTRAINT_VIOLATION,
            Self::AccessViolation(_) => ErrorCode::ACCESS_VIOLATION,
            Self::MutationViolation(_) => ErrorCode::MUTATION_VIOLATION,
            Self::ArityOrShapeMismatch(_) => ErrorCode::ARITY_OR_SHAPE_MISMATCH,
            Self::InvalidRange(_) => ErrorCode::INVALID_RANGE,
            Self::GasExhausted => ErrorCode::GAS_EXHAUSTED,
            Self::Runtime(_) => ErrorCode::RUNTIME,
        }
    }

    /// Render for a host, pointing at the offending declaration.
    pub fn to_diagnostic(&self, span: Span) -> Diagnostic {
        Diagnostic::new(self.code(), self.to_string()).at(span)
    }
}

/// Result alias for evaluator operations.
pub type EvalResult<T> = Result<T, EvalError>;
