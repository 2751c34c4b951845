//! # tplex-template
//!
//! A caching template engine that adds layout inheritance and partials to a
//! small action-based template language. Templates use `{{Extend "layout"}}`,
//! `{{Block "name"}}...{{/Block}}` with `{{Super}}`, and
//! `{{Include "partial" [pass]}}`; compiled results are cached per template
//! and invalidated precisely when a file they were built from changes.
//!
//! ## Modules
//!
//! - [`context`] - Dynamic values passed to templates
//! - [`lexer`] - Delimiters and tokenization
//! - [`parser`] - Parse trees and execution
//! - [`funcs`] - Function maps and built-in functions
//! - [`set`] - Compiled template sets and reusable fragments
//! - [`directive`] - Directive syntax and matching
//! - [`include`] - Include resolution
//! - [`inheritance`] - Extend, Block, and Super resolution
//! - [`cache`] - Compiled template cache and relation graph
//! - [`loaders`] - Raw content providers
//! - [`store`] - Watched in-memory raw store
//! - [`watcher`] - Filesystem watcher
//! - [`engine`] - The public engine API

pub mod cache;
pub mod context;
pub mod directive;
pub mod engine;
pub mod funcs;
pub mod include;
pub mod inheritance;
pub mod lexer;
pub mod loaders;
pub mod parser;
pub mod set;
pub mod store;
pub mod watcher;

// Re-export the most commonly used types at the crate root.
pub use context::ContextValue;
pub use engine::Engine;
pub use funcs::FuncMap;
pub use loaders::{FileSystemLoader, StringLoader, TemplateLoader};
pub use set::TemplateSet;
pub use store::TemplateStore;
