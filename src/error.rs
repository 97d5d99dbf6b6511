//! Error taxonomy for the Imports Manager (§7) plus the `miette`-rendered
//! diagnostics the CLI surface prints them through, grounded on the
//! teacher's `SchemaError`/`ToolDiagnostic` split: a closed, data-carrying
//! `thiserror` enum for programmatic handling, and a thin `miette::Diagnostic`
//! wrapper for human output.

use thiserror::Error;

/// Error taxonomy for import resolution, introspection, and caching.
#[derive(Debug, Clone, Error)]
pub enum ImportsError {
    #[error("could not resolve import '{name}': {reason}")]
    ResolveFailed { name: String, reason: String },

    #[error("introspection of '{name}' timed out after {deadline_secs}s")]
    IntrospectionTimeout {
        name: String,
        args: Vec<String>,
        deadline_secs: u64,
    },

    #[error("introspection of '{name}' crashed (exit {exit_status}): {stderr_tail}")]
    IntrospectionCrashed {
        name: String,
        args: Vec<String>,
        exit_status: String,
        stderr_tail: String,
    },

    #[error("introspection of '{name}' failed: {message}")]
    IntrospectionError {
        name: String,
        args: Vec<String>,
        kind: String,
        message: String,
        source_location: Option<String>,
    },

    #[error("cache I/O error at '{path}': {cause}")]
    CacheIoError { path: String, cause: String },

    #[error("'{path}' has an extension not allowed for resources ({allowed:?})")]
    InvalidResourceExtension { path: String, allowed: Vec<String> },
}

impl ImportsError {
    /// Whether this error should flip the owning Entry to `Failed` (as
    /// opposed to cache I/O errors, which are swallowed per §7's
    /// propagation policy and never fail the build).
    pub fn is_build_failure(&self) -> bool {
        !matches!(self, Self::CacheIoError { .. })
    }
}

/// A lightweight diagnostic for tool-level errors/warnings without an
/// associated source file, rendered through `miette` exactly as the
/// teacher's `ToolDiagnostic` does (`× message` / `⚠ message`).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ToolDiagnostic {
    message: String,
    severity: miette::Severity,
    help_text: Option<String>,
}

impl ToolDiagnostic {
    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
            severity: miette::Severity::Error,
            help_text: None,
        }
    }

    pub fn warning(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
            severity: miette::Severity::Warning,
            help_text: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help_text = Some(help.into());
        self
    }
}

impl miette::Diagnostic for ToolDiagnostic {
    fn severity(&self) -> Option<miette::Severity> {
        Some(self.severity)
    }

    fn help<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        self.help_text.as_ref().map(|h| Box::new(h.as_str()) as Box<dyn std::fmt::Display>)
    }
}

impl From<&ImportsError> for ToolDiagnostic {
    fn from(err: &ImportsError) -> Self {
        ToolDiagnostic::error(err.to_string())
    }
}
