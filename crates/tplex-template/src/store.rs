//! An in-memory store of raw template text backed by a directory.
//!
//! [`TemplateStore`] reads a template from disk on first use and serves it
//! from memory afterwards. The filesystem watcher keeps it current by
//! calling [`TemplateStore::apply_event`] for every change under the root.
//! Which files are kept is governed by two lists of file-name patterns:
//! `ignores` (never watched) and `allows` (refreshed on change). Patterns are
//! globs (`*.tmp`, `draft-*`, `.#*`, `*.[tT][mM][pP]`) matched against the
//! file name, or against the whole relative path when they contain a `/`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use glob::Pattern;
use parking_lot::Mutex;
use tplex_core::error::TplexError;
use tplex_core::settings::TemplateSettings;
use tracing::{debug, error, info};

use crate::loaders::TemplateLoader;
use crate::watcher::{ChangeEvent, ChangeOp, EntryKind};

/// Rewrites template text before it is stored.
pub type Preprocessor = Box<dyn Fn(String) -> String + Send + Sync>;

/// Raw template text cached by key.
pub struct TemplateStore {
    root: PathBuf,
    caches: Mutex<HashMap<String, String>>,
    ignores: FilePatterns,
    allows: FilePatterns,
    preprocessor: Option<Preprocessor>,
}

impl std::fmt::Debug for TemplateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateStore")
            .field("root", &self.root)
            .field("cached", &self.caches.lock().len())
            .field("ignores", &self.ignores)
            .field("allows", &self.allows)
            .finish_non_exhaustive()
    }
}

impl TemplateStore {
    /// Creates a store for `root` with the given ignore and allow globs.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if a pattern is not a valid glob.
    pub fn new(
        root: impl Into<PathBuf>,
        ignores: &[String],
        allows: &[String],
    ) -> Result<Self, TplexError> {
        Ok(Self {
            root: root.into(),
            caches: Mutex::new(HashMap::new()),
            ignores: FilePatterns::new(ignores)?,
            allows: FilePatterns::new(allows)?,
            preprocessor: None,
        })
    }

    /// Creates a store for the template directory of `settings`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if a pattern is not a valid glob.
    pub fn from_settings(settings: &TemplateSettings) -> Result<Self, TplexError> {
        Self::new(
            settings.dir.clone(),
            &settings.ignores,
            &settings.allowed_patterns(),
        )
    }

    /// Sets a function applied to text stored by [`cache_template`](Self::cache_template).
    #[must_use]
    pub fn with_preprocessor<F>(mut self, preprocessor: F) -> Self
    where
        F: Fn(String) -> String + Send + Sync + 'static,
    {
        self.preprocessor = Some(Box::new(preprocessor));
        self
    }

    /// The directory templates are read from.
    pub fn root_dir(&self) -> &Path {
        &self.root
    }

    /// The ignore patterns.
    pub fn ignores(&self) -> &FilePatterns {
        &self.ignores
    }

    /// Returns the text of `name`, reading and caching it on a miss.
    ///
    /// # Errors
    ///
    /// Returns `TemplateDoesNotExist` if the file cannot be read.
    pub fn get_template(&self, name: &str) -> Result<String, TplexError> {
        let key = normalize(name);
        let mut caches = self.caches.lock();
        if let Some(content) = caches.get(&key) {
            debug!(template = %key, "load template from cache");
            return Ok(content.clone());
        }

        let path = self.root.join(&key);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            TplexError::TemplateDoesNotExist(format!(
                "Error reading template '{}': {e}",
                path.display()
            ))
        })?;
        debug!(template = %key, "load template from file");
        caches.insert(key, content.clone());
        Ok(content)
    }

    /// Stores `content` under `name`, after the preprocessor if one is set.
    pub fn cache_template(&self, name: &str, content: String) {
        let content = match &self.preprocessor {
            Some(preprocess) => preprocess(content),
            None => content,
        };
        let key = normalize(name);
        debug!(template = %key, "update template on cache");
        self.caches.lock().insert(key, content);
    }

    /// Drops the stored text of `name`.
    pub fn cache_delete(&self, name: &str) {
        let key = normalize(name);
        if self.caches.lock().remove(&key).is_some() {
            info!(template = %key, "delete template from cache");
        }
    }

    /// Drops all stored text.
    pub fn clear_cache(&self) {
        self.caches.lock().clear();
    }

    /// Returns `true` if text for `name` is stored.
    pub fn contains(&self, name: &str) -> bool {
        self.caches.lock().contains_key(&normalize(name))
    }

    /// Number of stored templates.
    pub fn len(&self) -> usize {
        self.caches.lock().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.caches.lock().is_empty()
    }

    /// Returns `true` if changes to `name` should refresh the store.
    pub fn allow_cached(&self, name: &str) -> bool {
        self.allows.matches(name)
    }

    /// Returns `true` if `name` is excluded from watching.
    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignores.matches(name)
    }

    /// Brings the store up to date with one change under the root.
    pub fn apply_event(&self, event: &ChangeEvent) {
        if event.kind != EntryKind::File || !self.allow_cached(&event.name) {
            return;
        }
        match event.op {
            ChangeOp::Create | ChangeOp::Modify => {
                let path = self.root.join(&event.name);
                match std::fs::read_to_string(&path) {
                    Ok(content) => {
                        self.cache_template(&event.name, content);
                        info!(template = %event.name, op = ?event.op, "reloaded template");
                    }
                    Err(e) => {
                        error!(template = %event.name, error = %e, "reloading template failed");
                    }
                }
            }
            ChangeOp::Delete | ChangeOp::Rename => self.cache_delete(&event.name),
        }
    }
}

impl TemplateLoader for TemplateStore {
    fn load(&self, name: &str) -> Result<String, TplexError> {
        self.get_template(name)
    }
}

fn normalize(name: &str) -> String {
    name.replace('\\', "/").trim_start_matches('/').to_string()
}

/// A compiled list of file-name globs.
#[derive(Debug, Clone, Default)]
pub struct FilePatterns {
    patterns: Vec<Pattern>,
}

impl FilePatterns {
    /// Compiles `patterns`.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` naming the first invalid pattern.
    pub fn new<I, S>(patterns: I) -> Result<Self, TplexError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                let p = p.as_ref();
                Pattern::new(p).map_err(|e| {
                    TplexError::ConfigurationError(format!("invalid file pattern '{p}': {e}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Returns `true` if any pattern matches `name`, a `/`-separated path
    /// relative to the template root.
    pub fn matches(&self, name: &str) -> bool {
        let name = normalize(name);
        let file_name = Path::new(&name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&name);
        self.patterns.iter().any(|p| {
            if p.as_str().contains('/') {
                p.matches(&name)
            } else {
                p.matches(file_name)
            }
        })
    }
}
