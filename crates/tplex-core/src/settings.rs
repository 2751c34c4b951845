//! Settings for the tplex template engine.
//!
//! [`Settings`] holds the process-level options (debug mode, log level) and a
//! [`TemplateSettings`] block describing where templates live, which
//! delimiters and directive tags they use, and how raw content is cached and
//! watched. All fields have defaults, so partial configuration files work.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Template engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateSettings {
    /// Root directory containing template files.
    pub dir: PathBuf,
    /// Extension appended to every logical template name (e.g. `.html`).
    pub extension: String,
    /// Left action delimiter.
    pub delimiter_left: String,
    /// Right action delimiter.
    pub delimiter_right: String,
    /// Tag name of the partial inlining directive.
    pub include_tag: String,
    /// Tag name of the layout inheritance directive.
    pub extend_tag: String,
    /// Tag name of the overridable region directive.
    pub block_tag: String,
    /// Marker expanding to the layout's original block content.
    pub super_tag: String,
    /// Whether `fetch` renders failures as visible diagnostic text.
    pub debug: bool,
    /// Whether raw template text is served from a watched in-memory store.
    pub cache_raw: bool,
    /// Whether the filesystem watcher runs.
    pub reload: bool,
    /// Deadline for one raw template read, in milliseconds.
    pub read_timeout_ms: Option<u64>,
    /// Interval of the watcher's timer tick, in milliseconds.
    pub tick_interval_ms: u64,
    /// File-name globs that are never loaded into the raw store.
    pub ignores: Vec<String>,
    /// File-name globs admitted to the raw store. Empty means `*` + extension.
    pub cached_allows: Vec<String>,
}

impl TemplateSettings {
    /// Returns the raw-read deadline, if one is configured.
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    /// Returns the watcher tick interval.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    /// Returns the globs admitted to the raw store, defaulting to the extension.
    pub fn allowed_patterns(&self) -> Vec<String> {
        if self.cached_allows.is_empty() {
            vec![format!("*{}", self.extension)]
        } else {
            self.cached_allows.clone()
        }
    }
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("templates"),
            extension: ".html".to_string(),
            delimiter_left: "{{".to_string(),
            delimiter_right: "}}".to_string(),
            include_tag: "Include".to_string(),
            extend_tag: "Extend".to_string(),
            block_tag: "Block".to_string(),
            super_tag: "Super".to_string(),
            debug: false,
            cache_raw: false,
            reload: true,
            read_timeout_ms: Some(5000),
            tick_interval_ms: 2000,
            ignores: vec!["*.tmp".to_string(), "*.TMP".to_string()],
            cached_allows: Vec::new(),
        }
    }
}

/// The complete set of engine settings.
///
/// # Examples
///
/// ```
/// use tplex_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert_eq!(settings.log_level, "info");
/// assert_eq!(settings.templates.extension, ".html");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Whether debug mode (pretty logs) is enabled.
    pub debug: bool,
    /// The tracing filter directive (e.g. "info", "tplex_template=debug").
    pub log_level: String,
    /// Template engine configuration.
    pub templates: TemplateSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            log_level: "info".to_string(),
            templates: TemplateSettings::default(),
        }
    }
}
