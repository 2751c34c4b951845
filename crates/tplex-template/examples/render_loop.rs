//! Renders one template repeatedly and reports the time each render takes.
//!
//! ```text
//! cargo run -p tplex-template --example render_loop -- crates/tplex-template/examples/templates
//! ```
//!
//! The first render reads and compiles; later renders come from the cache.
//! Edit a file under the directory while the loop sleeps to see it reload.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tplex_core::logging::setup_logging;
use tplex_core::settings_loader::from_env;
use tplex_template::{ContextValue, Engine};

#[tokio::main]
async fn main() {
    let mut settings = from_env();
    if let Some(dir) = std::env::args().nth(1) {
        settings.templates.dir = dir.into();
    }
    setup_logging(&settings);

    let engine = match Engine::new(settings.templates.clone()) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            eprintln!("cannot create engine: {e}");
            return;
        }
    };
    engine.monitor_event(|name| println!("changed: {name}"));
    match engine.start_watching() {
        Ok(true) => println!("watching {}", settings.templates.dir.display()),
        Ok(false) => {}
        Err(e) => eprintln!("watcher not started: {e}"),
    }

    let data = ContextValue::from(serde_json::json!({
        "test": "one---i",
        "r": ["one", "two", "three"],
    }));

    for round in 1..=5 {
        let start = Instant::now();
        let output = engine.fetch("test", &data, None);
        println!("{output}");
        println!("round {round}: {:?}", start.elapsed());
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    engine.close();
}
