//! Core error types for the tplex template engine.
//!
//! [`TplexError`] covers every failure the engine can surface: missing
//! templates, syntax errors from the host template language, execution
//! errors, configuration problems, raw-read deadlines, and watcher failures.

use thiserror::Error;

/// The primary error type for the template engine.
///
/// Compilation and rendering failures are reported through this enum.
/// [`TplexError::Render`] wraps any of the other variants with the name of
/// the template that was being rendered.
#[derive(Error, Debug)]
pub enum TplexError {
    // ── Templates ────────────────────────────────────────────────────

    /// The requested template could not be read from its provider.
    #[error("Template does not exist: {0}")]
    TemplateDoesNotExist(String),

    /// A template contains invalid syntax.
    #[error("Template syntax error: {0}")]
    TemplateSyntaxError(String),

    /// Executing a compiled template failed.
    #[error("Render error: {0}")]
    RenderError(String),

    /// Rendering a named template failed; wraps the underlying cause.
    #[error("Parse {name} err: {source}")]
    Render {
        /// The template key that was being rendered.
        name: String,
        /// The underlying failure.
        #[source]
        source: Box<TplexError>,
    },

    // ── Providers ────────────────────────────────────────────────────

    /// Reading raw template content did not finish before the deadline.
    #[error("Read timeout: {0}")]
    ReadTimeout(String),

    /// The filesystem watcher could not be started or failed while running.
    #[error("Watch error: {0}")]
    WatchError(String),

    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    // ── IO ───────────────────────────────────────────────────────────

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TplexError {
    /// Wraps this error with the name of the template being rendered.
    ///
    /// An error that is already a [`TplexError::Render`] is returned unchanged.
    #[must_use]
    pub fn in_template(self, name: impl Into<String>) -> Self {
        match self {
            err @ Self::Render { .. } => err,
            other => Self::Render {
                name: name.into(),
                source: Box::new(other),
            },
        }
    }

    /// Returns `true` if this error means the template was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::TemplateDoesNotExist(_) => true,
            Self::Render { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

/// A convenience type alias for `Result<T, TplexError>`.
pub type TplexResult<T> = Result<T, TplexError>;
