use crate::Span;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Diagnostic category, determined by error code range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Scheduling,
    Type,
    Mutation,
    Resource,
    Runtime,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Scheduling => "scheduling",
            Self::Type => "type",
            Self::Mutation => "mutation",
            Self::Resource => "resource",
            Self::Runtime => "runtime",
        };
        f.write_str(name)
    }
}

/// Numeric error code (E100–E599).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ErrorCode(pub u16);

impl ErrorCode {
    // ── Scheduling errors (E100–E199) ──
    pub const CYCLIC_DEPENDENCY: Self = Self(100);
    pub const ORDERING_CONFLICT: Self = Self(101);
    pub const UNDEFINED_REFERENCE: Self = Self(102);

    // ── Type errors (E200–E299) ──
    pub const TYPE_CONSTRAINT_VIOLATION: Self = Self(200);
    pub const ARITY_OR_SHAPE_MISMATCH: Self = Self(201);
    pub const INVALID_RANGE: Self = Self(202);

    // ── Access and mutation errors (E300–E399) ──
    pub const ACCESS_VIOLATION: Self = Self(300);
    pub const MUTATION_VIOLATION: Self = Self(301);

    // ── Resource errors (E400–E499) ──
    pub const GAS_EXHAUSTED: Self = Self(400);

    // ── Runtime errors (E500–E599) ──
    pub const RUNTIME: Self = Self(500);

    /// Get the category for this error code.
    pub fn category(self) -> ErrorCategory {
        match self.0 {
            100..=199 => ErrorCategory::Scheduling,
            200..=299 => ErrorCategory::Type,
            300..=399 => ErrorCategory::Mutation,
            400..=499 => ErrorCategory::Resource,
            _ => ErrorCategory::Runtime,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// A structured evaluation failure, ready for a host to render.
///
/// Evaluation stops at the first failure, so a run produces at most one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Error code (e.g., E101).
    pub code: ErrorCode,
    /// Error category (derived from code).
    pub category: ErrorCategory,
    /// Human-readable error message.
    pub message: String,
    /// Location of the offending declaration, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl Diagnostic {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            category: code.category(),
            message: message.into(),
            span: None,
        }
    }

    /// Attach the location of the offending declaration.
    pub fn at(mut self, span: Span) -> Self {
        if !span.is_synthetic() {
            self.span = Some(span);
        }
        self
    }

    /// Serialize as a JSON object for host tooling.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.span {
            Some(span) => write!(
                f,
                "{}: {} [{}] {}",
                span, self.code, self.category, self.message
            ),
            None => write!(f, "{} [{}] {}", self.code, self.category, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_categories() {
        assert_eq!(ErrorCode::CYCLIC_DEPENDENCY.category(), ErrorCategory::Scheduling);
        assert_eq!(ErrorCode::ARITY_OR_SHAPE_MISMATCH.category(), ErrorCategory::Type);
        assert_eq!(ErrorCode::MUTATION_VIOLATION.category(), ErrorCategory::Mutation);
        assert_eq!(ErrorCode::GAS_EXHAUSTED.category(), ErrorCategory::Resource);
        assert_eq!(ErrorCode::RUNTIME.category(), ErrorCategory::Runtime);
    }

    #[test]
    fn test_diagnostic_display() {
        let d = Diagnostic::new(ErrorCode::CYCLIC_DEPENDENCY, "x -> x").at(Span::point(2, 1));
        assert_eq!(d.to_string(), "2:1: E100 [scheduling] x -> x");
        let bare = Diagnostic::new(ErrorCode::RUNTIME, "boom");
        assert_eq!(bare.to_string(), "E500 [runtime] boom");
    }

    #[test]
    fn test_diagnostic_json_skips_missing_span() {
        let d = Diagnostic::new(ErrorCode::ACCESS_VIOLATION, "hidden field").at(Span::default());
        let json = d.to_json();
        assert_eq!(json["code"], 300);
        assert_eq!(json["category"], "mutation");
        assert!(json.get("start_line").is_none());
        assert!(json.get("span").is_none());
    }
}
