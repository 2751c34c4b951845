//! The template engine.
//!
//! [`Engine`] ties everything together: it maps logical names to template
//! keys, reads raw text through a [`TemplateLoader`], resolves `Extend`,
//! `Block`, and `Include`, compiles the result into a [`TemplateSet`], and
//! caches compiled sets and partial fragments in a [`RelationGraph`].
//! Compilation and invalidation share one lock; execution runs outside it.
//!
//! ```no_run
//! use tplex_core::settings::TemplateSettings;
//! use tplex_template::context::ContextValue;
//! use tplex_template::engine::Engine;
//!
//! let engine = Engine::new(TemplateSettings::default())?;
//! let data = ContextValue::from(serde_json::json!({"title": "Home"}));
//! let html = engine.fetch("index", &data, None);
//! # Ok::<(), tplex_core::error::TplexError>(())
//! ```

use std::collections::HashSet;
use std::io::Write;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tplex_core::error::{TplexError, TplexResult};
use tplex_core::logging::compile_span;
use tplex_core::settings::TemplateSettings;
use tracing::{debug, error, info, warn};

use crate::cache::RelationGraph;
use crate::context::ContextValue;
use crate::directive::{DirectiveMatcher, Syntax};
use crate::funcs::FuncMap;
use crate::include::{IncludeResolver, ResolveContext, SubTemplate};
use crate::inheritance::{apply_layout, BlockTable};
use crate::lexer::Delimiters;
use crate::loaders::{FileSystemLoader, TemplateLoader};
use crate::set::{Fragment, TemplateSet};
use crate::store::{FilePatterns, TemplateStore};
use crate::watcher::{
    ChangeEvent, ChangeOp, EntryKind, TemplateWatcher, TickCallback, WatchConfig, WatchHandle,
};

/// Rewrites a template file name before cache lookup and disk access.
pub type PathParser = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Rewrites raw template text after it is read.
pub type BeforeRender = Arc<dyn Fn(&mut String) + Send + Sync>;

/// Supplies the default functions of every render.
pub type FuncMapFn = Arc<dyn Fn() -> FuncMap + Send + Sync>;

/// Told the name of every template file that changed.
pub type MonitorFn = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct Hooks {
    path_parser: Option<PathParser>,
    before_render: Option<BeforeRender>,
    func_map_fn: Option<FuncMapFn>,
    monitor: Option<MonitorFn>,
    on_tick: Option<TickCallback>,
}

struct EngineState {
    syntax: Syntax,
    matcher: DirectiveMatcher,
    relations: RelationGraph,
}

/// Most reads that may still be running after their deadline passed.
pub const MAX_PENDING_READS: usize = 16;

type PendingSet = Arc<Mutex<HashSet<String>>>;

/// Removes its key from the pending set when the read thread finishes.
struct PendingRead {
    set: PendingSet,
    key: String,
}

impl Drop for PendingRead {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

/// A caching template engine with layout inheritance and partials.
pub struct Engine {
    settings: TemplateSettings,
    loader: Arc<dyn TemplateLoader>,
    store: Option<Arc<TemplateStore>>,
    state: Mutex<EngineState>,
    hooks: RwLock<Hooks>,
    watch: Mutex<Option<WatchHandle>>,
    pending_reads: PendingSet,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("dir", &self.settings.dir)
            .field("extension", &self.settings.extension)
            .field("cached", &self.state.lock().relations.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine reading from `settings.dir`.
    ///
    /// With `cache_raw` set, raw text is served from a [`TemplateStore`]
    /// that the watcher keeps current; otherwise every compile reads the
    /// files directly.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if an ignore or allow pattern is not a
    /// valid glob.
    pub fn new(settings: TemplateSettings) -> TplexResult<Self> {
        if settings.cache_raw {
            let store = Arc::new(TemplateStore::from_settings(&settings)?);
            let loader: Arc<dyn TemplateLoader> = Arc::clone(&store) as _;
            Ok(Self::build(settings, loader, Some(store)))
        } else {
            FilePatterns::new(&settings.ignores)?;
            let loader = Arc::new(FileSystemLoader::new(vec![settings.dir.clone()]));
            Ok(Self::build(settings, loader, None))
        }
    }

    /// Creates an engine reading raw text from `loader`.
    pub fn with_loader(settings: TemplateSettings, loader: Arc<dyn TemplateLoader>) -> Self {
        Self::build(settings, loader, None)
    }

    fn build(
        settings: TemplateSettings,
        loader: Arc<dyn TemplateLoader>,
        store: Option<Arc<TemplateStore>>,
    ) -> Self {
        let syntax = Syntax::from_settings(&settings);
        Self {
            settings,
            loader,
            store,
            state: Mutex::new(EngineState {
                syntax,
                matcher: DirectiveMatcher::default(),
                relations: RelationGraph::new(),
            }),
            hooks: RwLock::new(Hooks::default()),
            watch: Mutex::new(None),
            pending_reads: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// The settings this engine was built with.
    pub fn settings(&self) -> &TemplateSettings {
        &self.settings
    }

    /// The raw store, when the engine caches raw text.
    pub fn store(&self) -> Option<&Arc<TemplateStore>> {
        self.store.as_ref()
    }

    /// The current directive syntax.
    pub fn syntax(&self) -> Syntax {
        self.state.lock().syntax.clone()
    }

    // ── Hooks ───────────────────────────────────────────────────────

    /// Sets the name rewrite applied to `name + extension`.
    pub fn set_path_parser<F>(&self, parser: F)
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.hooks.write().path_parser = Some(Arc::new(parser));
    }

    /// Sets the rewrite applied to raw text of roots, layouts, and partials.
    pub fn set_before_render<F>(&self, hook: F)
    where
        F: Fn(&mut String) + Send + Sync + 'static,
    {
        self.hooks.write().before_render = Some(Arc::new(hook));
    }

    /// Sets the provider of default functions; per-call functions override it.
    pub fn set_func_map_fn<F>(&self, provider: F)
    where
        F: Fn() -> FuncMap + Send + Sync + 'static,
    {
        self.hooks.write().func_map_fn = Some(Arc::new(provider));
    }

    /// Sets a callback told about every template file change.
    pub fn monitor_event<F>(&self, monitor: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.hooks.write().monitor = Some(Arc::new(monitor));
    }

    /// Sets the watcher's tick callback. Takes effect on the next
    /// [`start_watching`](Self::start_watching).
    pub fn set_tick_callback<F>(&self, on_tick: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.hooks.write().on_tick = Some(Arc::new(on_tick));
    }

    // ── Syntax ──────────────────────────────────────────────────────

    /// Changes the action delimiters. Compiled templates are discarded.
    pub fn set_delimiters(&self, left: &str, right: &str) {
        let mut state = self.state.lock();
        state.syntax.delimiters = Delimiters::new(left, right);
        state.relations.clear();
        info!(left, right, "template delimiters changed");
    }

    /// Changes the directive tag names. Compiled templates are discarded.
    pub fn set_tags(&self, include: &str, extend: &str, block: &str, super_tag: &str) {
        let mut state = self.state.lock();
        state.syntax.include_tag = include.to_string();
        state.syntax.extend_tag = extend.to_string();
        state.syntax.block_tag = block.to_string();
        state.syntax.super_tag = super_tag.to_string();
        state.relations.clear();
        info!(include, extend, block, super_tag, "template tags changed");
    }

    // ── Rendering ───────────────────────────────────────────────────

    /// Returns the cache key of a logical template name.
    pub fn template_key(&self, name: &str) -> String {
        let file = format!("{name}{}", self.settings.extension);
        let file = match &self.hooks.read().path_parser {
            Some(parser) => parser(&file),
            None => file,
        };
        match file.strip_prefix('/') {
            Some(stripped) => stripped.to_string(),
            None => file,
        }
    }

    /// Renders `name` and returns the output.
    ///
    /// Never fails: on error the failure is logged and, when the `debug`
    /// setting is on, its text is returned in place of the output.
    pub fn fetch(&self, name: &str, data: &ContextValue, funcs: Option<&FuncMap>) -> String {
        match self.render_to_string(name, data, funcs) {
            Ok(output) => output,
            Err(e) => {
                error!(template = name, error = %e, "rendering template failed");
                if self.settings.debug {
                    e.to_string()
                } else {
                    String::new()
                }
            }
        }
    }

    /// Renders `name` into `writer`.
    ///
    /// # Errors
    ///
    /// Returns [`TplexError::Render`] naming the template if reading,
    /// compiling, executing, or writing fails.
    pub fn render<W: Write>(
        &self,
        writer: &mut W,
        name: &str,
        data: &ContextValue,
        funcs: Option<&FuncMap>,
    ) -> TplexResult<()> {
        let output = self.render_to_string(name, data, funcs)?;
        writer
            .write_all(output.as_bytes())
            .map_err(|e| TplexError::from(e).in_template(self.template_key(name)))
    }

    /// Renders `name` and returns the output.
    ///
    /// # Errors
    ///
    /// Returns [`TplexError::Render`] naming the template if reading,
    /// compiling, or executing fails.
    pub fn render_to_string(
        &self,
        name: &str,
        data: &ContextValue,
        funcs: Option<&FuncMap>,
    ) -> TplexResult<String> {
        let key = self.template_key(name);
        let funcs = self.func_map(funcs);
        let set = self.lookup(&key).map_err(|e| e.in_template(&key))?;
        set.execute(data, &funcs).map_err(|e| e.in_template(&key))
    }

    /// Renders `name` as a safe value for embedding in another template.
    pub fn include(&self, name: &str, data: &ContextValue, funcs: Option<&FuncMap>) -> ContextValue {
        ContextValue::SafeString(self.fetch(name, data, funcs))
    }

    fn func_map(&self, funcs: Option<&FuncMap>) -> FuncMap {
        let provider = self.hooks.read().func_map_fn.clone();
        let mut merged = provider.map(|f| f()).unwrap_or_default();
        if let Some(funcs) = funcs {
            merged.merge(funcs);
        }
        merged
    }

    // ── Raw content ─────────────────────────────────────────────────

    /// Reads the raw text of a template key, bounded by the `read_timeout`
    /// setting.
    ///
    /// A read that misses its deadline keeps its thread until the loader
    /// returns. While it runs, further reads of the same key fail at once,
    /// and at most [`MAX_PENDING_READS`] reads may be outstanding.
    ///
    /// # Errors
    ///
    /// Returns the loader's error, `ReadTimeout` if the deadline passes or
    /// too many reads are stalled, or `RenderError` if the loader panicked.
    pub fn raw_content(&self, key: &str) -> TplexResult<String> {
        let Some(timeout) = self.settings.read_timeout() else {
            return self.loader.load(key);
        };

        let guard = {
            let mut pending = self.pending_reads.lock();
            if pending.contains(key) {
                return Err(TplexError::ReadTimeout(format!(
                    "an earlier read of '{key}' is still running"
                )));
            }
            if pending.len() >= MAX_PENDING_READS {
                warn!(template = %key, stalled = pending.len(), "too many stalled reads");
                return Err(TplexError::ReadTimeout(format!(
                    "reading '{key}' refused: {} reads are still running",
                    pending.len()
                )));
            }
            pending.insert(key.to_string());
            PendingRead {
                set: Arc::clone(&self.pending_reads),
                key: key.to_string(),
            }
        };

        let loader = Arc::clone(&self.loader);
        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("tplex-read".to_string())
            .spawn(move || {
                // The guard drops before the sender, even on panic.
                let tx = tx;
                let guard = guard;
                let _ = tx.send(loader.load(&guard.key));
            })?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(TplexError::ReadTimeout(format!(
                "reading '{key}' took longer than {timeout:?}"
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(TplexError::RenderError(format!(
                "reading '{key}' failed: the loader panicked"
            ))),
        }
    }

    fn read_source(&self, key: &str) -> TplexResult<String> {
        let mut content = self.raw_content(key)?;
        let hook = self.hooks.read().before_render.clone();
        if let Some(hook) = hook {
            hook(&mut content);
        }
        Ok(content)
    }

    // ── Compilation ─────────────────────────────────────────────────

    fn lookup(&self, key: &str) -> TplexResult<Arc<TemplateSet>> {
        let mut state = self.state.lock();
        if let Some(set) = state.relations.standalone(key) {
            debug!(template = key, "using cached template object");
            return Ok(set);
        }
        self.compile_locked(&mut state, key)
    }

    fn compile_locked(&self, state: &mut EngineState, key: &str) -> TplexResult<Arc<TemplateSet>> {
        let span = compile_span(key);
        let _guard = span.enter();
        let EngineState {
            syntax,
            matcher,
            relations,
        } = state;

        debug!("read not cached template content");
        let raw = self.read_source(key)?;
        matcher.ensure(syntax)?;
        let delimiters = syntax.delimiters.clone();

        let (content, blocks, layout_key) = match matcher.find_extend(&raw)? {
            Some(extend) => {
                let layout_key = self.template_key(&extend.layout);
                debug!(layout = %layout_key, "read layout template content");
                let layout = self.read_source(&layout_key)?;
                let overrides = BlockTable::from_child(&raw, matcher)?;
                let merged =
                    apply_layout(&layout, &overrides, extend.pass.as_deref(), matcher, syntax)?;
                (merged.content, merged.blocks, Some(layout_key))
            }
            None => {
                // A layout rendered on its own shows its default block content.
                let plain = apply_layout(&raw, &BlockTable::default(), None, matcher, syntax)?;
                (plain.content, Vec::new(), None)
            }
        };

        let ctx = PassContext {
            engine: self,
            relations,
        };
        let mut resolver = IncludeResolver::new(&ctx, matcher, syntax, key);
        let root = resolver.resolve(&content)?;
        let blocks = blocks
            .into_iter()
            .map(|(name, body)| resolver.resolve(&body).map(|r| (name, r.text)))
            .collect::<TplexResult<Vec<_>>>()?;
        let table = resolver.finish();

        let mut set = TemplateSet::new(key, delimiters.clone());
        set.parse(&root.text)?;

        let mut used: Vec<(String, Arc<Fragment>, bool)> = Vec::new();
        for (name, entry) in table.iter() {
            match entry {
                SubTemplate::InProgress => {}
                SubTemplate::Cached(fragment) => {
                    fragment.attach_to(&mut set);
                    used.push((name.to_string(), Arc::clone(fragment), false));
                }
                SubTemplate::Resolved {
                    body,
                    reusable,
                    requires,
                } => {
                    let fragment = Fragment::compile(name, body, &delimiters, requires.clone())?;
                    fragment.attach_to(&mut set);
                    used.push((name.to_string(), Arc::new(fragment), *reusable));
                }
            }
        }
        for (name, body) in &blocks {
            set.parse_named(name, body)?;
        }

        for (name, fragment, store) in used {
            relations.add_dependent(&name, key);
            for required in &fragment.requires {
                relations.add_dependent(required, &name);
            }
            if store {
                relations.set_fragment(&name, fragment);
            }
        }
        if let Some(layout_key) = &layout_key {
            relations.add_dependent(layout_key, key);
        }

        let set = Arc::new(set);
        relations.set_standalone(key, Arc::clone(&set));
        debug!(trees = set.template_names().len(), "compiled template");
        Ok(set)
    }

    // ── Invalidation ────────────────────────────────────────────────

    /// Returns `true` if `key` has a compiled root set cached.
    pub fn is_cached(&self, key: &str) -> bool {
        self.state.lock().relations.standalone(key).is_some()
    }

    /// Evicts `key` and everything built using it. Returns the evicted keys.
    pub fn invalidate(&self, key: &str) -> Vec<String> {
        self.state.lock().relations.invalidate(key)
    }

    /// Reacts to a change under the template directory.
    ///
    /// Deleted, modified, and renamed template files are invalidated and the
    /// monitor callback is told; creations, directories, and files without
    /// the template extension are ignored.
    pub fn on_change(&self, event: &ChangeEvent) {
        if event.op == ChangeOp::Create
            || event.kind == EntryKind::Dir
            || !event.name.ends_with(&self.settings.extension)
        {
            return;
        }
        let evicted = self.invalidate(&event.name);
        debug!(template = %event.name, evicted = evicted.len(), "template changed");

        let monitor = self.hooks.read().monitor.clone();
        if let Some(monitor) = monitor {
            monitor(&event.name);
        }
    }

    /// Drops every compiled template and all raw text.
    pub fn clear_cache(&self) {
        if let Some(store) = &self.store {
            store.clear_cache();
        }
        self.state.lock().relations.clear();
    }

    // ── Watching ────────────────────────────────────────────────────

    /// Starts watching the template directory when the `reload` setting is
    /// on and the directory exists. Returns `true` if a watcher was started.
    ///
    /// # Errors
    ///
    /// Returns a `WatchError` if there is no tokio runtime or the directory
    /// cannot be watched.
    pub fn start_watching(self: &Arc<Self>) -> TplexResult<bool> {
        if !self.settings.reload || !self.settings.dir.is_dir() {
            return Ok(false);
        }

        let engine = Arc::downgrade(self);
        let config = WatchConfig {
            root: self.settings.dir.clone(),
            tick: self.settings.tick_interval(),
            ignores: match &self.store {
                Some(store) => store.ignores().clone(),
                None => FilePatterns::new(&self.settings.ignores)?,
            },
            store: self.store.clone(),
            on_change: Arc::new(move |event: &ChangeEvent| {
                if let Some(engine) = engine.upgrade() {
                    engine.on_change(event);
                }
            }),
            on_tick: self.hooks.read().on_tick.clone(),
        };

        let handle = TemplateWatcher::start(config)?;
        if let Some(mut previous) = self.watch.lock().replace(handle) {
            previous.stop();
        }
        Ok(true)
    }

    /// Clears all caches and stops the watcher.
    pub fn close(&self) {
        self.clear_cache();
        if let Some(mut handle) = self.watch.lock().take() {
            handle.stop();
        }
    }
}

/// The engine as seen by one Include pass.
struct PassContext<'a> {
    engine: &'a Engine,
    relations: &'a RelationGraph,
}

impl ResolveContext for PassContext<'_> {
    fn template_key(&self, name: &str) -> String {
        self.engine.template_key(name)
    }

    fn raw_content(&self, key: &str) -> TplexResult<String> {
        self.engine.read_source(key)
    }

    fn cached_fragment(&self, key: &str) -> Option<Arc<Fragment>> {
        self.relations.fragment(key)
    }
}
