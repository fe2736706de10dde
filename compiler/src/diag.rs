// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used across all compiler phases:
// front-end (lex/parse/resolve) diagnostics carry a source span, pass-level
// diagnostics (verification, resources, lowering) usually do not.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::Serialize;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0101`, `W0300`).
///
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registered diagnostic codes.
pub mod codes {
    use super::DiagCode;

    // E00xx — options and configuration
    pub const E0001: DiagCode = DiagCode("E0001"); // invalid kernel options

    // E01xx — front-end
    pub const E0100: DiagCode = DiagCode("E0100"); // lex/parse error
    pub const E0101: DiagCode = DiagCode("E0101"); // undefined value
    pub const E0102: DiagCode = DiagCode("E0102"); // undefined block label
    pub const E0103: DiagCode = DiagCode("E0103"); // unknown opcode
    pub const E0104: DiagCode = DiagCode("E0104"); // wrong operand count or kind
    pub const E0105: DiagCode = DiagCode("E0105"); // duplicate definition
    pub const E0106: DiagCode = DiagCode("E0106"); // unknown type
    pub const E0107: DiagCode = DiagCode("E0107"); // missing or unexpected result type
    pub const E0108: DiagCode = DiagCode("E0108"); // instruction outside a block

    // E02xx — IR and placement verification
    pub const E0200: DiagCode = DiagCode("E0200"); // IR verification failed
    pub const E0201: DiagCode = DiagCode("E0201"); // placement verification failed

    // E03xx — resources
    pub const E0300: DiagCode = DiagCode("E0300"); // shared memory exceeds device capacity

    // E04xx — final lowering
    pub const E0400: DiagCode = DiagCode("E0400"); // lowering failed

    // W03xx — resource warnings
    pub const W0300: DiagCode = DiagCode("W0300"); // conflicting layout demands resolved to shared
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Cause record ─────────────────────────────────────────────────────────

/// One link in a cause chain explaining a failure.
#[derive(Debug, Clone)]
pub struct CauseRecord {
    pub message: String,
    pub span: Option<Span>,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Option<Span>,
    pub message: String,
    pub hint: Option<String>,
    pub cause_chain: Vec<CauseRecord>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, span, hint, or causes.
    pub fn new(level: DiagLevel, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span: None,
            message: message.into(),
            hint: None,
            cause_chain: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach the source location.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a cause record to the chain.
    pub fn with_cause(mut self, message: impl Into<String>, span: Option<Span>) -> Self {
        self.cause_chain.push(CauseRecord {
            message: message.into(),
            span,
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        for cause in &self.cause_chain {
            write!(f, "\n  cause: {}", cause.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// True when any diagnostic is an error.
pub fn has_errors(diags: &[Diagnostic]) -> bool {
    diags.iter().any(Diagnostic::is_error)
}
