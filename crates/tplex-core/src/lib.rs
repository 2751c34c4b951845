//! # tplex-core
//!
//! Core types for the tplex template engine: the error taxonomy, settings,
//! settings loading, and tracing setup. Has no dependency on the engine itself.
//!
//! ## Modules
//!
//! - [`error`] - Error types and result aliases
//! - [`settings`] - Engine and template settings with defaults
//! - [`settings_loader`] - Loading settings from TOML, JSON, and the environment
//! - [`logging`] - Tracing-based logging integration

pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{TplexError, TplexResult};
pub use settings::{Settings, TemplateSettings};
