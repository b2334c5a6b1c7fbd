use crate::position::Span;
use derive_more::From;
use std::fmt::{self, Display, Formatter};

/// Ordered log of user-visible diagnostics. Passes accumulate as many errors
/// as they safely can; the inline driver only halts at batch boundaries, so
/// one run reports the maximum number of problems.
///
/// Internal invariant violations do not go through the sink. They use the
/// [`bug!`](crate::bug) macro, which aborts immediately.
#[derive(Debug, Default)]
pub struct ErrorSink {
    diagnostics: Vec<Diagnostic>,
}

impl ErrorSink {
    pub fn error(&mut self, span: Span, payload: impl Into<DiagnosticPayload>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            span,
            payload: payload.into(),
        });
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.diagnostics.len()
    }
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub span: Span,
    pub payload: DiagnosticPayload,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Severity {
    /// User-visible problem; the driver halts after the current batch.
    Error,
    /// Internal-invariant violation; execution never continues past one.
    Bug,
}

#[derive(Clone, Debug, Eq, From, PartialEq)]
pub enum DiagnosticPayload {
    Inline(InlineError),
    Bfrt(BfrtError),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InlineError {
    MultipleInvocations { instance: String },
    ControlFromParser { instance: String },
    ParserFromControl { instance: String },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BfrtError {
    InvalidImplementationId { id: u32 },
    MismatchedExternPayload { instance: String },
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Bug => "bug",
        };
        write!(f, "{severity} at {}: {}", self.span, self.payload)
    }
}

impl Display for DiagnosticPayload {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let message = match self {
            Self::Inline(error) => match error {
                InlineError::MultipleInvocations { instance } => format!(
                    "Multiple invocations of the same block are not supported on this target: `{instance}`.",
                ),
                InlineError::ControlFromParser { instance } => {
                    format!("`{instance}`: invocation of a control from a parser.")
                }
                InlineError::ParserFromControl { instance } => {
                    format!("`{instance}`: invocation of a parser from a control.")
                }
            },
            Self::Bfrt(error) => match error {
                BfrtError::InvalidImplementationId { id } => {
                    format!("Invalid implementation id in P4Info: {id}.")
                }
                BfrtError::MismatchedExternPayload { instance } => format!(
                    "Extern instance `{instance}` does not pack an ActionSelector object.",
                ),
            },
        };
        write!(f, "{message}")
    }
}

/// Aborts on an internal-invariant violation. These indicate implementation
/// bugs, never user mistakes, and are not recoverable.
#[macro_export]
macro_rules! bug {
    ($($arg:tt)*) => {
        panic!("internal compiler bug: {}", format_args!($($arg)*))
    };
}
