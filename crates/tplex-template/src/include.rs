//! Include resolution.
//!
//! Replaces every `{{Include "name" [pass]}}` with `{{template "key" pass}}`
//! and records the partial behind each key in a [`SubTemplateTable`], so the
//! engine can register every partial as a named tree of the root. Each
//! partial is resolved once per parse pass. A partial whose compiled
//! fragment is already cached is taken as-is, together with the partials
//! it requires.
//!
//! A key is registered as in progress before its text is resolved. An
//! Include that reaches a key still in progress closes a cycle and is
//! replaced with nothing; every partial on that cycle is marked so its
//! compiled form is not cached for reuse.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tplex_core::error::TplexError;
use tracing::debug;

use crate::directive::{DirectiveMatcher, Syntax};
use crate::set::Fragment;

/// What the resolver needs from the engine.
pub trait ResolveContext {
    /// Maps a logical partial name to its template key.
    fn template_key(&self, name: &str) -> String;

    /// Reads the raw text of a template key.
    ///
    /// # Errors
    ///
    /// Returns the provider's error if the text cannot be read.
    fn raw_content(&self, key: &str) -> Result<String, TplexError>;

    /// Returns the cached fragment of a key, if any.
    fn cached_fragment(&self, key: &str) -> Option<Arc<Fragment>>;
}

/// The state of one partial within a parse pass.
#[derive(Debug, Clone)]
pub enum SubTemplate {
    /// Registered; its text is still being resolved.
    InProgress,
    /// Resolved from text during this pass.
    Resolved {
        /// The partial body with its own Includes rewritten.
        body: String,
        /// `false` if the partial lies on an Include cycle.
        reusable: bool,
        /// Keys this partial invokes directly.
        requires: Vec<String>,
    },
    /// Taken from the fragment cache.
    Cached(Arc<Fragment>),
}

/// Partials encountered during one parse pass, in registration order.
#[derive(Debug, Default)]
pub struct SubTemplateTable {
    order: Vec<String>,
    entries: HashMap<String, SubTemplate>,
}

impl SubTemplateTable {
    /// Returns the entry for `key`.
    pub fn get(&self, key: &str) -> Option<&SubTemplate> {
        self.entries.get(key)
    }

    /// Returns `true` if `key` has been registered.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Registers or updates `key`.
    pub fn set(&mut self, key: &str, entry: SubTemplate) {
        if self.entries.insert(key.to_string(), entry).is_none() {
            self.order.push(key.to_string());
        }
    }

    /// Iterates over the entries in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SubTemplate)> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(key).map(|entry| (key.as_str(), entry)))
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// The text of one resolved input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The input with every Include rewritten.
    pub text: String,
    /// Keys the input invokes directly, in order of first appearance.
    pub requires: Vec<String>,
}

/// Resolves Includes for one parse pass.
pub struct IncludeResolver<'a, C: ResolveContext + ?Sized> {
    ctx: &'a C,
    matcher: &'a DirectiveMatcher,
    syntax: &'a Syntax,
    table: SubTemplateTable,
    stack: Vec<String>,
    cyclic: HashSet<String>,
}

impl<'a, C: ResolveContext + ?Sized> IncludeResolver<'a, C> {
    /// Starts a pass for the root `root_key`. The root is registered as in
    /// progress so that partials including it back do not recurse.
    pub fn new(ctx: &'a C, matcher: &'a DirectiveMatcher, syntax: &'a Syntax, root_key: &str) -> Self {
        let mut table = SubTemplateTable::default();
        table.set(root_key, SubTemplate::InProgress);
        Self {
            ctx,
            matcher,
            syntax,
            table,
            stack: vec![root_key.to_string()],
            cyclic: HashSet::new(),
        }
    }

    /// Rewrites the Includes of `content`, resolving every partial it reaches.
    ///
    /// # Errors
    ///
    /// Returns the provider's error if a partial cannot be read.
    pub fn resolve(&mut self, content: &str) -> Result<Resolution, TplexError> {
        let mut text = String::with_capacity(content.len());
        let mut requires: Vec<String> = Vec::new();
        let mut cursor = 0;

        for directive in self.matcher.includes(content)? {
            text.push_str(&content[cursor..directive.range.start]);
            cursor = directive.range.end;

            let key = self.ctx.template_key(&directive.name);
            if self.enter(&key)? {
                let pass = directive.pass.as_deref().unwrap_or(".");
                text.push_str(&self.syntax.invocation(&key, pass));
                if !requires.contains(&key) {
                    requires.push(key);
                }
            }
        }
        text.push_str(&content[cursor..]);

        Ok(Resolution { text, requires })
    }

    /// Consumes the resolver, returning every partial of the pass.
    pub fn finish(self) -> SubTemplateTable {
        self.table
    }

    /// Makes `key` available to the current root. Returns `false` if the
    /// Include closes a cycle and must be dropped.
    fn enter(&mut self, key: &str) -> Result<bool, TplexError> {
        match self.table.get(key) {
            Some(SubTemplate::InProgress) => {
                self.mark_cycle(key);
                debug!(template = key, "include cycle; dropping re-entrant include");
                return Ok(false);
            }
            Some(_) => return Ok(true),
            None => {}
        }

        self.table.set(key, SubTemplate::InProgress);
        self.stack.push(key.to_string());
        let entry = match self.ctx.cached_fragment(key) {
            Some(fragment) => {
                debug!(template = key, "reusing compiled fragment");
                for required in &fragment.requires {
                    self.enter(required)?;
                }
                SubTemplate::Cached(fragment)
            }
            None => self.resolve_text(key)?,
        };
        self.stack.pop();
        self.table.set(key, entry);
        Ok(true)
    }

    fn resolve_text(&mut self, key: &str) -> Result<SubTemplate, TplexError> {
        debug!(template = key, "reading partial");
        let raw = self.ctx.raw_content(key)?;
        let resolved = self.resolve(&raw)?;
        Ok(SubTemplate::Resolved {
            body: resolved.text,
            reusable: !self.cyclic.contains(key),
            requires: resolved.requires,
        })
    }

    /// Marks every key on the stack from `key` upward as part of a cycle.
    fn mark_cycle(&mut self, key: &str) {
        if let Some(pos) = self.stack.iter().position(|k| k == key) {
            self.cyclic.extend(self.stack[pos..].iter().cloned());
        }
    }
}
