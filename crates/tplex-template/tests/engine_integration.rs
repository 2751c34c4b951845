//! Integration tests for the Engine -> resolver -> cache pipeline.
//!
//! These tests drive the public engine API with an in-memory provider that
//! counts reads, covering:
//! 1. Cache hits and idempotence
//! 2. Layout inheritance: overrides, Super, repeated and unmatched blocks
//! 3. Includes: cycles, fragment reuse, nested partials
//! 4. Cascading invalidation
//! 5. Error policy and filesystem-backed engines
//! 6. Concurrent fetch and invalidation

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use tplex_core::error::{TplexError, TplexResult};
use tplex_core::settings::TemplateSettings;
use tplex_template::watcher::{ChangeEvent, ChangeOp, EntryKind};
use tplex_template::{ContextValue, Engine, FuncMap, TemplateLoader};

// ============================================================================
// Shared helpers
// ============================================================================

/// An in-memory provider that records how often each key is read.
#[derive(Default)]
struct CountingLoader {
    files: Mutex<HashMap<String, String>>,
    reads: Mutex<HashMap<String, usize>>,
}

impl CountingLoader {
    fn with(files: &[(&str, &str)]) -> Arc<Self> {
        let loader = Self::default();
        for (name, text) in files {
            loader.set(name, text);
        }
        Arc::new(loader)
    }

    fn set(&self, name: &str, text: &str) {
        self.files.lock().insert(name.to_string(), text.to_string());
    }

    fn reads(&self, name: &str) -> usize {
        self.reads.lock().get(name).copied().unwrap_or(0)
    }

    fn total_reads(&self) -> usize {
        self.reads.lock().values().sum()
    }
}

impl TemplateLoader for CountingLoader {
    fn load(&self, name: &str) -> TplexResult<String> {
        *self.reads.lock().entry(name.to_string()).or_insert(0) += 1;
        self.files
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| TplexError::TemplateDoesNotExist(name.to_string()))
    }
}

fn settings() -> TemplateSettings {
    TemplateSettings {
        read_timeout_ms: None,
        reload: false,
        ..TemplateSettings::default()
    }
}

fn engine_with(loader: &Arc<CountingLoader>) -> Engine {
    Engine::with_loader(settings(), Arc::clone(loader) as Arc<dyn TemplateLoader>)
}

fn data(value: serde_json::Value) -> ContextValue {
    ContextValue::from(value)
}

fn render(engine: &Engine, name: &str, value: &ContextValue) -> String {
    engine.render_to_string(name, value, None).unwrap()
}

fn modified(name: &str) -> ChangeEvent {
    ChangeEvent {
        name: name.to_string(),
        kind: EntryKind::File,
        op: ChangeOp::Modify,
    }
}

// ============================================================================
// 1. Cache hits and idempotence
// ============================================================================

#[test]
fn test_second_render_is_identical_and_reads_nothing() {
    let loader = CountingLoader::with(&[
        ("base.html", r#"<body>{{Block "main"}}{{/Block}}</body>"#),
        (
            "page.html",
            r#"{{Extend "base"}}{{Block "main"}}{{.title}} {{Include "nav"}}{{/Block}}"#,
        ),
        ("nav.html", "<nav>{{range .links}}[{{.}}]{{end}}</nav>"),
    ]);
    let engine = engine_with(&loader);
    let value = data(serde_json::json!({"title": "Home", "links": ["a", "b"]}));

    let first = render(&engine, "page", &value);
    let reads = loader.total_reads();
    let second = render(&engine, "page", &value);

    assert_eq!(first, "<body>Home <nav>[a][b]</nav></body>");
    assert_eq!(first, second);
    assert_eq!(loader.total_reads(), reads);
}

#[test]
fn test_fetch_and_render_share_the_cache() {
    let loader = CountingLoader::with(&[("a.html", "A{{.}}")]);
    let engine = engine_with(&loader);

    assert_eq!(engine.fetch("a", &ContextValue::from(1), None), "A1");
    let mut out = Vec::new();
    engine
        .render(&mut out, "a", &ContextValue::from(2), None)
        .unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "A2");
    assert_eq!(loader.reads("a.html"), 1);
}

// ============================================================================
// 2. Layout inheritance
// ============================================================================

#[test]
fn test_override_with_super_appears_once() {
    let loader = CountingLoader::with(&[
        ("layout.html", r#"<main>{{Block "body"}}LAYOUT{{/Block}}</main>"#),
        (
            "child.html",
            r#"{{Extend "layout"}}{{Block "body"}}CHILD-{{Super}}{{/Block}}"#,
        ),
    ]);
    let engine = engine_with(&loader);
    let out = render(&engine, "child", &ContextValue::None);
    assert_eq!(out, "<main>CHILD-LAYOUT</main>");
    assert_eq!(out.matches("CHILD-LAYOUT").count(), 1);
}

#[test]
fn test_unmatched_override_never_rendered() {
    let loader = CountingLoader::with(&[
        ("layout.html", r#"<main>{{Block "body"}}B{{/Block}}</main>"#),
        (
            "child.html",
            r#"{{Extend "layout"}}{{Block "sidebar"}}ORPHAN{{/Block}}"#,
        ),
    ]);
    let engine = engine_with(&loader);
    let out = render(&engine, "child", &ContextValue::None);
    assert_eq!(out, "<main>B</main>");
    assert!(!out.contains("ORPHAN"));
}

#[test]
fn test_layout_renders_on_its_own() {
    let loader = CountingLoader::with(&[(
        "layout.html",
        r#"<main>{{Block "body"}}default {{.x}}{{/Block}}</main>"#,
    )]);
    let engine = engine_with(&loader);
    assert_eq!(
        render(&engine, "layout", &data(serde_json::json!({"x": 1}))),
        "<main>default 1</main>"
    );
}

#[test]
fn test_repeated_block_placeholders_keep_their_own_super() {
    let loader = CountingLoader::with(&[
        (
            "grid.html",
            r#"{{Block "cell"}}north{{/Block}}|{{Block "cell"}}south{{/Block}}"#,
        ),
        (
            "page.html",
            r#"{{Extend "grid"}}{{Block "cell"}}<{{Super}}:{{.v}}>{{/Block}}"#,
        ),
    ]);
    let engine = engine_with(&loader);
    assert_eq!(
        render(&engine, "page", &data(serde_json::json!({"v": 1}))),
        "<north:1>|<south:1>"
    );
}

#[test]
fn test_extend_pass_expression() {
    let loader = CountingLoader::with(&[
        ("layout.html", r#"<h1>{{Block "title"}}{{/Block}}</h1>"#),
        (
            "child.html",
            r#"{{Extend "layout" .page}}{{Block "title"}}{{.name}}{{/Block}}"#,
        ),
    ]);
    let engine = engine_with(&loader);
    assert_eq!(
        render(&engine, "child", &data(serde_json::json!({"page": {"name": "Docs"}}))),
        "<h1>Docs</h1>"
    );
}

#[test]
fn test_includes_inside_blocks_and_super() {
    let loader = CountingLoader::with(&[
        (
            "layout.html",
            r#"{{Block "body"}}{{Include "footer"}}{{/Block}}"#,
        ),
        (
            "child.html",
            r#"{{Extend "layout"}}{{Block "body"}}{{Include "header"}}{{Super}}{{/Block}}"#,
        ),
        ("header.html", "H"),
        ("footer.html", "F"),
    ]);
    let engine = engine_with(&loader);
    assert_eq!(render(&engine, "child", &ContextValue::None), "HF");
}

#[test]
fn test_nested_layout_extend_is_not_followed() {
    let loader = CountingLoader::with(&[
        ("outer.html", "OUTER"),
        (
            "inner.html",
            r#"{{Extend "outer"}}[{{Block "b"}}{{/Block}}]"#,
        ),
        ("page.html", r#"{{Extend "inner"}}{{Block "b"}}P{{/Block}}"#),
    ]);
    let engine = engine_with(&loader);
    assert_eq!(render(&engine, "page", &ContextValue::None), "[P]");
    assert_eq!(loader.reads("outer.html"), 0);
}

// ============================================================================
// 3. Includes
// ============================================================================

#[test]
fn test_include_cycle_terminates() {
    let loader = CountingLoader::with(&[
        ("a.html", r#"A1 {{Include "b"}} A2"#),
        ("b.html", r#"B1 {{Include "a"}} B2"#),
    ]);
    let engine = engine_with(&loader);
    let out = render(&engine, "a", &ContextValue::None);
    assert_eq!(out, "A1 B1  B2 A2");

    let out = render(&engine, "b", &ContextValue::None);
    assert_eq!(out, "B1 A1  A2 B2");
}

#[test]
fn test_self_include_terminates() {
    let loader = CountingLoader::with(&[("loop.html", r#"x{{Include "loop"}}y"#)]);
    let engine = engine_with(&loader);
    assert_eq!(render(&engine, "loop", &ContextValue::None), "xy");
}

#[test]
fn test_fragment_reuse_across_roots() {
    let loader = CountingLoader::with(&[
        ("c1.html", r#"one:{{Include "p" .x}}"#),
        ("c2.html", r#"two:{{Include "p" .y}}"#),
        ("p.html", "<{{.}}>"),
    ]);
    let engine = engine_with(&loader);
    let value = data(serde_json::json!({"x": "X", "y": "Y"}));

    assert_eq!(render(&engine, "c1", &value), "one:<X>");
    assert_eq!(render(&engine, "c2", &value), "two:<Y>");
    assert_eq!(loader.reads("p.html"), 1);
}

#[test]
fn test_reused_fragment_brings_its_nested_partials() {
    let loader = CountingLoader::with(&[
        ("c1.html", r#"{{Include "outer"}}"#),
        ("c2.html", r#"2{{Include "outer"}}"#),
        ("outer.html", r#"O{{Include "inner"}}"#),
        ("inner.html", "I"),
    ]);
    let engine = engine_with(&loader);
    assert_eq!(render(&engine, "c1", &ContextValue::None), "OI");
    assert_eq!(render(&engine, "c2", &ContextValue::None), "2OI");
    assert_eq!(loader.reads("outer.html"), 1);
    assert_eq!(loader.reads("inner.html"), 1);
}

#[test]
fn test_partial_rendered_directly_and_included() {
    let loader = CountingLoader::with(&[
        ("card.html", "[{{.}}]"),
        ("list.html", r#"{{range .}}{{Include "card"}}{{end}}"#),
    ]);
    let engine = engine_with(&loader);
    assert_eq!(render(&engine, "card", &ContextValue::from("solo")), "[solo]");
    assert_eq!(
        render(&engine, "list", &data(serde_json::json!(["a", "b"]))),
        "[a][b]"
    );
}

// ============================================================================
// 4. Cascading invalidation
// ============================================================================

#[test]
fn test_layout_change_recompiles_child() {
    let loader = CountingLoader::with(&[
        ("layout.html", r#"L1[{{Block "b"}}{{/Block}}]"#),
        (
            "child.html",
            r#"{{Extend "layout"}}{{Block "b"}}{{Include "part"}}{{/Block}}"#,
        ),
        ("part.html", "P"),
    ]);
    let engine = engine_with(&loader);
    assert_eq!(render(&engine, "child", &ContextValue::None), "L1[P]");
    assert_eq!(loader.reads("child.html"), 1);

    loader.set("layout.html", r#"L2[{{Block "b"}}{{/Block}}]"#);
    engine.on_change(&modified("layout.html"));

    assert!(!engine.is_cached("child.html"));
    assert_eq!(render(&engine, "child", &ContextValue::None), "L2[P]");
    assert_eq!(loader.reads("child.html"), 2);
}

#[test]
fn test_partial_change_recompiles_every_user() {
    let loader = CountingLoader::with(&[
        ("c1.html", r#"1{{Include "p"}}"#),
        ("c2.html", r#"2{{Include "p"}}"#),
        ("other.html", "O"),
        ("p.html", "old"),
    ]);
    let engine = engine_with(&loader);
    render(&engine, "c1", &ContextValue::None);
    render(&engine, "c2", &ContextValue::None);
    render(&engine, "other", &ContextValue::None);

    loader.set("p.html", "new");
    let evicted = engine.invalidate("p.html");
    assert_eq!(evicted.len(), 3);
    assert!(engine.is_cached("other.html"));

    assert_eq!(render(&engine, "c1", &ContextValue::None), "1new");
    assert_eq!(render(&engine, "c2", &ContextValue::None), "2new");
}

#[test]
fn test_nested_partial_change_reaches_root() {
    let loader = CountingLoader::with(&[
        ("root.html", r#"{{Include "outer"}}"#),
        ("outer.html", r#"<{{Include "inner"}}>"#),
        ("inner.html", "v1"),
    ]);
    let engine = engine_with(&loader);
    assert_eq!(render(&engine, "root", &ContextValue::None), "<v1>");

    loader.set("inner.html", "v2");
    engine.on_change(&modified("inner.html"));
    assert_eq!(render(&engine, "root", &ContextValue::None), "<v2>");
}

#[test]
fn test_monitor_is_told_about_changes() {
    let loader = CountingLoader::with(&[("a.html", "A")]);
    let engine = engine_with(&loader);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    engine.monitor_event(move |name| sink.lock().push(name.to_string()));

    engine.on_change(&modified("a.html"));
    engine.on_change(&ChangeEvent {
        name: "b.html".to_string(),
        kind: EntryKind::File,
        op: ChangeOp::Create,
    });
    assert_eq!(*seen.lock(), vec!["a.html".to_string()]);
}

// ============================================================================
// 5. Error policy and filesystem-backed engines
// ============================================================================

#[test]
fn test_missing_layout_fails_render_and_is_not_cached() {
    let loader = CountingLoader::with(&[("child.html", r#"{{Extend "gone"}}"#)]);
    let engine = engine_with(&loader);
    let err = engine
        .render_to_string("child", &ContextValue::None, None)
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().starts_with("Parse child.html err:"));
    assert!(!engine.is_cached("child.html"));
    assert_eq!(engine.fetch("child", &ContextValue::None, None), "");
}

#[test]
fn test_broken_partial_reports_in_debug_mode() {
    let loader = CountingLoader::with(&[
        ("page.html", r#"{{Include "bad"}}"#),
        ("bad.html", "{{range .}}"),
    ]);
    let engine = Engine::with_loader(
        TemplateSettings {
            debug: true,
            ..settings()
        },
        Arc::clone(&loader) as Arc<dyn TemplateLoader>,
    );
    let text = engine.fetch("page", &ContextValue::None, None);
    assert!(text.starts_with("Parse page.html err:"), "{text}");
    assert!(text.contains("bad.html"), "{text}");
}

#[test]
fn test_per_call_functions() {
    let loader = CountingLoader::with(&[("f.html", "{{shout .}}")]);
    let engine = engine_with(&loader);
    let mut funcs = FuncMap::new();
    funcs.insert("shout", |args: &[ContextValue]| {
        let text = args.last().map(ContextValue::to_display_string).unwrap_or_default();
        Ok(ContextValue::from(format!("{}!", text.to_uppercase())))
    });
    assert_eq!(
        engine
            .render_to_string("f", &ContextValue::from("hi"), Some(&funcs))
            .unwrap(),
        "HI!"
    );
    assert!(engine
        .render_to_string("f", &ContextValue::from("hi"), None)
        .is_err());
}

#[test]
fn test_filesystem_engine_with_raw_store() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("layouts")).unwrap();
    std::fs::write(
        dir.path().join("layouts/base.html"),
        r#"<title>{{Block "title"}}Site{{/Block}}</title>"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("index.html"),
        r#"{{Extend "layouts/base"}}{{Block "title"}}{{.t}} | {{Super}}{{/Block}}"#,
    )
    .unwrap();

    let engine = Engine::new(TemplateSettings {
        dir: dir.path().to_path_buf(),
        cache_raw: true,
        ..settings()
    })
    .unwrap();
    let value = data(serde_json::json!({"t": "Home"}));
    assert_eq!(engine.fetch("index", &value, None), "<title>Home | Site</title>");

    let store = engine.store().unwrap();
    assert!(store.contains("layouts/base.html"));

    std::fs::write(
        dir.path().join("layouts/base.html"),
        r#"<h1>{{Block "title"}}Site{{/Block}}</h1>"#,
    )
    .unwrap();
    let change = modified("layouts/base.html");
    store.apply_event(&change);
    engine.on_change(&change);
    assert_eq!(engine.fetch("index", &value, None), "<h1>Home | Site</h1>");
}

#[tokio::test]
async fn test_watcher_invalidates_on_file_change() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("w.html"), "one").unwrap();

    let engine = Arc::new(Engine::new(TemplateSettings {
        dir: dir.path().to_path_buf(),
        reload: true,
        ..settings()
    })
    .unwrap());
    assert!(engine.start_watching().unwrap());
    assert_eq!(engine.fetch("w", &ContextValue::None, None), "one");

    std::fs::write(dir.path().join("w.html"), "two").unwrap();
    let mut output = String::new();
    for _ in 0..100 {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        output = engine.fetch("w", &ContextValue::None, None);
        if output == "two" {
            break;
        }
    }
    assert_eq!(output, "two");
    engine.close();
}

// ============================================================================
// 6. Concurrent fetch and invalidation
// ============================================================================

#[test]
fn test_concurrent_fetch_and_invalidate() {
    let loader = CountingLoader::with(&[
        ("l.html", r#"<{{Block "b"}}{{/Block}}>"#),
        ("c.html", r#"{{Extend "l"}}{{Block "b"}}{{Include "p"}}:{{.v}}{{/Block}}"#),
        ("p.html", "P"),
    ]);
    let engine = engine_with(&loader);
    let value = data(serde_json::json!({"v": 1}));

    std::thread::scope(|scope| {
        for worker in 0..8 {
            let engine = &engine;
            let value = &value;
            scope.spawn(move || {
                for i in 0..50 {
                    if (worker + i) % 2 == 0 {
                        engine.invalidate("l.html");
                    } else {
                        engine.invalidate("p.html");
                    }
                    let output = engine.render_to_string("c", value, None).unwrap();
                    assert_eq!(output, "<P:1>");
                }
            });
        }
    });

    assert!(loader.reads("c.html") >= 1);
    assert_eq!(engine.fetch("c", &value, None), "<P:1>");
}
