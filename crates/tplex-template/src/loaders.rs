//! Raw content providers.
//!
//! A [`TemplateLoader`] returns the current text of a template key. The
//! engine never caches raw text itself; providers that want to, such as
//! [`TemplateStore`](crate::store::TemplateStore), do so behind this trait.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::RwLock;
use tplex_core::error::TplexError;

/// Loads raw template text by key.
pub trait TemplateLoader: Send + Sync {
    /// Loads the template text stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns `TemplateDoesNotExist` if the template cannot be found.
    fn load(&self, name: &str) -> Result<String, TplexError>;
}

/// Loads templates from one or more directories on the filesystem.
///
/// Searches each configured directory in order and returns the first match.
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    dirs: Vec<PathBuf>,
}

impl FileSystemLoader {
    /// Creates a loader searching `dirs` in order.
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// The directories searched.
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }
}

impl TemplateLoader for FileSystemLoader {
    fn load(&self, name: &str) -> Result<String, TplexError> {
        let name = name.trim_start_matches('/');
        for dir in &self.dirs {
            let path = dir.join(name);
            if path.is_file() {
                return std::fs::read_to_string(&path).map_err(|e| {
                    TplexError::TemplateDoesNotExist(format!(
                        "Error reading template '{}': {e}",
                        path.display()
                    ))
                });
            }
        }

        Err(TplexError::TemplateDoesNotExist(format!(
            "Template '{name}' not found in directories: {:?}",
            self.dirs
        )))
    }
}

/// Serves templates from an in-memory map.
///
/// Useful for tests and for templates stored outside the filesystem.
#[derive(Debug, Default)]
pub struct StringLoader {
    templates: RwLock<HashMap<String, String>>,
}

impl StringLoader {
    /// Creates an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a loader from a map of keys to template text.
    pub fn from_map(templates: HashMap<String, String>) -> Self {
        Self {
            templates: RwLock::new(templates),
        }
    }

    /// Adds or replaces a template.
    pub fn add(&self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.write().insert(name.into(), source.into());
    }

    /// Removes a template, returning its text.
    pub fn remove(&self, name: &str) -> Option<String> {
        self.templates.write().remove(name)
    }
}

impl TemplateLoader for StringLoader {
    fn load(&self, name: &str) -> Result<String, TplexError> {
        self.templates
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| TplexError::TemplateDoesNotExist(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filesystem_loader_search_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("a.html"), "second").unwrap();
        std::fs::create_dir(first.path().join("sub")).unwrap();
        std::fs::write(first.path().join("sub/b.html"), "nested").unwrap();

        let loader =
            FileSystemLoader::new(vec![first.path().to_path_buf(), second.path().to_path_buf()]);
        assert_eq!(loader.load("a.html").unwrap(), "second");
        assert_eq!(loader.load("/sub/b.html").unwrap(), "nested");
        assert!(loader.load("missing.html").unwrap_err().is_not_found());
    }

    #[test]
    fn test_filesystem_loader_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("x.html")).unwrap();
        let loader = FileSystemLoader::new(vec![dir.path().to_path_buf()]);
        assert!(loader.load("x.html").is_err());
    }

    #[test]
    fn test_string_loader() {
        let loader = StringLoader::new();
        loader.add("a.html", "A");
        assert_eq!(loader.load("a.html").unwrap(), "A");
        loader.add("a.html", "B");
        assert_eq!(loader.load("a.html").unwrap(), "B");
        assert_eq!(loader.remove("a.html").as_deref(), Some("B"));
        assert!(loader.load("a.html").unwrap_err().is_not_found());
    }
}
