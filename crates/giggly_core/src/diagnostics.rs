//! # Diagnostics
//!
//! Structured error records produced by every stage of the compiler. The core never
//! prints anything itself; it builds a [`Diagnostic`] and hands it to whichever sink
//! the caller wired up (the CLI driver renders them with a source excerpt and a caret
//! underline, an editor integration could turn them into LSP `Diagnostic`s instead).
//!
//! The taxonomy mirrors the one laid out for the semantic/IR-generation core: name
//! resolution, type, overload, structural, unimplemented-feature, and internal-bug
//! diagnostics all funnel through this one record shape.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::lexer::Span;

/// A single candidate signature and why it did not match a call site, used to build
/// the mismatch matrix for [`DiagnosticKind::NoOverload`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateMismatch {
    pub signature: String,
    pub mismatched_params: Vec<usize>,
}

/// Tag distinguishing the broad family a diagnostic belongs to. Kept separate from
/// the human-readable `message` so tooling (and tests) can match on it without
/// parsing text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// Parser-level syntax error, passed through unchanged.
    Syntax,
    /// An identifier does not resolve in any enclosing scope.
    NotDefined { name: String },
    /// A member (field or method) does not exist on the resolved type.
    DoesntContain { owner: String, member: String },
    /// Expected one type, found an incompatible one, with the set of types that
    /// would have been accepted.
    WrongType {
        expected: Vec<String>,
        actual: String,
    },
    /// An infix operator has no valid interpretation for the operand types.
    WrongInfix {
        op: String,
        left: String,
        right: String,
    },
    /// A call expression could not be indexed.
    CantIndex { on: String },
    /// No candidate overload matched; carries every candidate's mismatch set.
    NoOverload {
        callee: String,
        candidates: Vec<CandidateMismatch>,
    },
    /// A variable was declared twice in the same scope.
    DuplicateVariable { name: String },
    /// `break`/`continue`/`return` used outside a valid host statement, or a loop
    /// depth that exceeds the active loop-stack size.
    NodeOutside { what: String },
    /// A recognized-but-unimplemented language feature (`try`/`catch`/`raise`,
    /// numeric-to-bool conversion).
    Unimplemented { feature: String },
    /// The compiler reached a node kind it does not know how to handle; indicates a
    /// bug upstream in the parser rather than a user error.
    Internal { detail: String },
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::Syntax => write!(f, "syntax error"),
            DiagnosticKind::NotDefined { name } => write!(f, "'{name}' is not defined"),
            DiagnosticKind::DoesntContain { owner, member } => {
                write!(f, "'{owner}' has no member '{member}'")
            }
            DiagnosticKind::WrongType { expected, actual } => {
                write!(f, "expected one of {expected:?}, found '{actual}'")
            }
            DiagnosticKind::WrongInfix { op, left, right } => {
                write!(f, "cannot apply '{op}' to '{left}' and '{right}'")
            }
            DiagnosticKind::CantIndex { on } => write!(f, "cannot index '{on}'"),
            DiagnosticKind::NoOverload { callee, .. } => {
                write!(f, "no overload of '{callee}' matches this call")
            }
            DiagnosticKind::DuplicateVariable { name } => {
                write!(f, "'{name}' is already declared in this scope")
            }
            DiagnosticKind::NodeOutside { what } => write!(f, "{what}"),
            DiagnosticKind::Unimplemented { feature } => {
                write!(f, "'{feature}' is not implemented yet")
            }
            DiagnosticKind::Internal { detail } => write!(f, "internal compiler error: {detail}"),
        }
    }
}

/// A fully structured diagnostic: enough information for a sink to render a
/// multi-line error with a source excerpt and a caret underline. Serializable so a
/// non-terminal sink (an LSP front end, a JSON-emitting `--dump-diagnostics` flag)
/// can forward it without re-deriving the excerpt from scratch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file: String,
    pub source: String,
    pub start_line: usize,
    pub start_col: usize,
    pub end_line: usize,
    pub end_col: usize,
    pub kind: DiagnosticKind,
    pub suggested_fix: Option<String>,
}

impl Diagnostic {
    pub fn new(file: impl Into<String>, source: impl Into<String>, span: Span, kind: DiagnosticKind) -> Self {
        Diagnostic {
            file: file.into(),
            source: source.into(),
            start_line: span.start.0,
            start_col: span.start.1,
            end_line: span.end.0,
            end_col: span.end.1,
            kind,
            suggested_fix: None,
        }
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }

    pub fn message(&self) -> String {
        self.kind.to_string()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{file}:{line}:{col}: {message}",
            file = self.file,
            line = self.start_line,
            col = self.start_col,
            message = self.message()
        )
    }
}

impl std::error::Error for Diagnostic {}

/// Result alias used throughout the core: every fallible compiler operation returns
/// a single [`Diagnostic`] rather than a generic boxed error, so callers can match on
/// `kind` without downcasting.
pub type CoreResult<T> = Result<T, Diagnostic>;
