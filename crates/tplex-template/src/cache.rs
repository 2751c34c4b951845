//! Compiled template cache and relation graph.
//!
//! Each template key owns a [`CacheRecord`]: the compiled root set (if the
//! key was rendered directly), the compiled fragment (if the key was
//! included as a partial), and the set of keys built using it. Invalidating
//! a key removes its record and, transitively, the record of every key that
//! depends on it.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use tracing::info;

use crate::set::{Fragment, TemplateSet};

/// Everything cached for one template key.
#[derive(Debug, Clone, Default)]
pub struct CacheRecord {
    /// Keys built using this one, the key itself included.
    pub dependents: BTreeSet<String>,
    /// The compiled set, when the key is a root.
    pub standalone: Option<Arc<TemplateSet>>,
    /// The compiled partial, when the key can be attached to other roots.
    pub fragment: Option<Arc<Fragment>>,
}

/// Cache records by template key.
#[derive(Debug, Default)]
pub struct RelationGraph {
    records: HashMap<String, CacheRecord>,
}

impl RelationGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record of `key`, creating it if needed.
    pub fn entry(&mut self, key: &str) -> &mut CacheRecord {
        self.records.entry(key.to_string()).or_insert_with(|| CacheRecord {
            dependents: BTreeSet::from([key.to_string()]),
            ..CacheRecord::default()
        })
    }

    /// Returns the record of `key`.
    pub fn get(&self, key: &str) -> Option<&CacheRecord> {
        self.records.get(key)
    }

    /// Returns the compiled root set of `key`.
    pub fn standalone(&self, key: &str) -> Option<Arc<TemplateSet>> {
        self.records.get(key)?.standalone.clone()
    }

    /// Returns the compiled fragment of `key`.
    pub fn fragment(&self, key: &str) -> Option<Arc<Fragment>> {
        self.records.get(key)?.fragment.clone()
    }

    /// Records that `dependent` was built using `key`.
    pub fn add_dependent(&mut self, key: &str, dependent: &str) {
        self.entry(key).dependents.insert(dependent.to_string());
    }

    /// Stores the compiled root set of `key`.
    pub fn set_standalone(&mut self, key: &str, set: Arc<TemplateSet>) {
        self.entry(key).standalone = Some(set);
    }

    /// Stores the compiled fragment of `key`.
    pub fn set_fragment(&mut self, key: &str, fragment: Arc<Fragment>) {
        self.entry(key).fragment = Some(fragment);
    }

    /// Removes the record of `key` and of every key depending on it,
    /// directly or transitively. Returns the removed keys in removal order.
    pub fn invalidate(&mut self, key: &str) -> Vec<String> {
        let mut removed = Vec::new();
        let mut queue = VecDeque::from([key.to_string()]);

        while let Some(current) = queue.pop_front() {
            let Some(record) = self.records.remove(&current) else {
                continue;
            };
            info!(template = %current, "remove cached template object");
            queue.extend(record.dependents.into_iter().filter(|d| *d != current));
            removed.push(current);
        }
        removed
    }

    /// Removes every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if there are no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns `true` if `key` has a record.
    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }
}
