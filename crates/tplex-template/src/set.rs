//! Named collections of parsed template trees.
//!
//! A [`TemplateSet`] is the compiled, renderable form of one root template:
//! its own body plus every named tree it can invoke with `{{template}}`
//! (defines, partials, and blocks). Sets are immutable once shared; the
//! functions used during execution are supplied per call.

use std::collections::HashMap;
use std::sync::Arc;

use tplex_core::error::TplexError;

use crate::context::ContextValue;
use crate::funcs::{builtins, FuncMap, TemplateFn};
use crate::lexer::Delimiters;
use crate::parser::{self, render_tree, TemplateLookup, Tree};

/// A compiled root template and the named trees it can invoke.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    name: String,
    delimiters: Delimiters,
    trees: HashMap<String, Arc<Tree>>,
    funcs: FuncMap,
}

impl TemplateSet {
    /// Creates an empty set whose root template is called `name`.
    pub fn new(name: impl Into<String>, delimiters: Delimiters) -> Self {
        Self {
            name: name.into(),
            delimiters,
            trees: HashMap::new(),
            funcs: FuncMap::new(),
        }
    }

    /// The root template name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The delimiters used when parsing text into this set.
    pub fn delimiters(&self) -> &Delimiters {
        &self.delimiters
    }

    /// Adds functions that every execution of this set can call.
    pub fn set_functions(&mut self, funcs: &FuncMap) {
        self.funcs.merge(funcs);
    }

    /// Parses `text` as the body of the root template.
    ///
    /// Returns the names of the trees added, root first.
    ///
    /// # Errors
    ///
    /// Returns a `TemplateSyntaxError` if the text does not parse.
    pub fn parse(&mut self, text: &str) -> Result<Vec<String>, TplexError> {
        let name = self.name.clone();
        self.parse_named(&name, text)
    }

    /// Parses `text` as the body of a template called `name` in this set.
    ///
    /// Any `{{define}}` inside the text is added as well; a tree with the same
    /// name as an existing one replaces it.
    ///
    /// # Errors
    ///
    /// Returns a `TemplateSyntaxError` if the text does not parse.
    pub fn parse_named(&mut self, name: &str, text: &str) -> Result<Vec<String>, TplexError> {
        let parsed = parser::parse(name, text, &self.delimiters)?;
        let mut added = Vec::with_capacity(parsed.defines.len() + 1);
        for tree in std::iter::once(parsed.root).chain(parsed.defines) {
            added.push(tree.name.clone());
            self.trees.insert(tree.name.clone(), Arc::new(tree));
        }
        Ok(added)
    }

    /// Returns the tree registered under `name`.
    pub fn tree(&self, name: &str) -> Option<&Arc<Tree>> {
        self.trees.get(name)
    }

    /// Registers an already parsed tree under `name` without reparsing.
    pub fn attach_tree(&mut self, name: impl Into<String>, tree: Arc<Tree>) {
        self.trees.insert(name.into(), tree);
    }

    /// Returns `true` if a tree named `name` exists in this set.
    pub fn has_template(&self, name: &str) -> bool {
        self.trees.contains_key(name)
    }

    /// Returns the names of all trees in this set, sorted.
    pub fn template_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.trees.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Renders the root template.
    ///
    /// # Errors
    ///
    /// Returns a `RenderError` if execution fails.
    pub fn execute(&self, data: &ContextValue, funcs: &FuncMap) -> Result<String, TplexError> {
        self.execute_named(&self.name, data, funcs)
    }

    /// Renders the tree called `name`. Functions in `funcs` take precedence
    /// over the set's own functions, which take precedence over built-ins.
    ///
    /// # Errors
    ///
    /// Returns a `RenderError` if there is no such tree or execution fails.
    pub fn execute_named(
        &self,
        name: &str,
        data: &ContextValue,
        funcs: &FuncMap,
    ) -> Result<String, TplexError> {
        let tree = self.trees.get(name).ok_or_else(|| {
            TplexError::RenderError(format!(
                "template \"{name}\" is undefined in set \"{}\"",
                self.name
            ))
        })?;
        let lookup = SetLookup { set: self, funcs };
        render_tree(tree, data, &lookup)
    }
}

struct SetLookup<'a> {
    set: &'a TemplateSet,
    funcs: &'a FuncMap,
}

impl TemplateLookup for SetLookup<'_> {
    fn lookup_tree(&self, name: &str) -> Option<&Tree> {
        self.set.trees.get(name).map(AsRef::as_ref)
    }

    fn lookup_func(&self, name: &str) -> Option<&TemplateFn> {
        self.funcs
            .get(name)
            .or_else(|| self.set.funcs.get(name))
            .or_else(|| builtins().get(name))
    }
}

/// A compiled partial that can be attached to any number of root sets
/// without reparsing its text.
#[derive(Debug)]
pub struct Fragment {
    /// The partial's template key; also the name of its main tree.
    pub name: String,
    /// The main tree followed by any trees it defines.
    pub trees: Vec<Arc<Tree>>,
    /// Keys of the partials this fragment invokes directly.
    pub requires: Vec<String>,
}

impl Fragment {
    /// Parses a resolved partial body into a fragment.
    ///
    /// # Errors
    ///
    /// Returns a `TemplateSyntaxError` if the body does not parse.
    pub fn compile(
        name: &str,
        body: &str,
        delimiters: &Delimiters,
        requires: Vec<String>,
    ) -> Result<Self, TplexError> {
        let parsed = parser::parse(name, body, delimiters)?;
        let trees = std::iter::once(parsed.root)
            .chain(parsed.defines)
            .map(Arc::new)
            .collect();
        Ok(Self {
            name: name.to_string(),
            trees,
            requires,
        })
    }

    /// Attaches every tree of this fragment to `set`.
    pub fn attach_to(&self, set: &mut TemplateSet) {
        for tree in &self.trees {
            set.attach_tree(tree.name.clone(), Arc::clone(tree));
        }
    }
}
