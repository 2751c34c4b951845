//! Logging integration for the template engine.
//!
//! Provides a helper for configuring [`tracing`]-based logging from
//! [`Settings`](crate::settings::Settings) and a span constructor for
//! template compilation.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

use crate::settings::Settings;

/// Targets that log below `warn` only when asked for by name.
const QUIET_TARGETS: &[&str] = &["notify", "mio"];

/// Builds the filter directives for `level`.
///
/// A `RUST_LOG` value, when present, is used as is. A bare level such as
/// `debug` keeps the file watcher's own crates at `warn`, so that raising
/// the engine's level does not flood the output with filesystem polling.
/// Directives that already name targets are left untouched.
pub fn filter_directives(level: &str, env: Option<&str>) -> String {
    if let Some(env) = env.map(str::trim).filter(|e| !e.is_empty()) {
        return env.to_string();
    }
    let level = level.trim();
    if level.is_empty() {
        return "info".to_string();
    }
    if level.contains('=') {
        return level.to_string();
    }
    let mut directives = level.to_string();
    for target in QUIET_TARGETS {
        directives.push_str(&format!(",{target}=warn"));
    }
    directives
}

/// Sets up the global tracing subscriber based on the given settings.
///
/// In debug mode events are pretty-printed with their source location and
/// each `compile` span logs its duration when it closes; otherwise one JSON
/// object is written per event, carrying the template being compiled.
/// Installing a subscriber twice is a no-op.
pub fn setup_logging(settings: &Settings) {
    let env = std::env::var("RUST_LOG").ok();
    let directives = filter_directives(&settings.log_level, env.as_deref());
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.debug {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .try_init()
            .ok();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .try_init()
            .ok();
    }
}

/// Creates a tracing span for compiling one template.
///
/// # Examples
///
/// ```
/// use tplex_core::logging::compile_span;
///
/// let span = compile_span("index.html");
/// let _guard = span.enter();
/// tracing::debug!("reading raw content");
/// ```
pub fn compile_span(template: &str) -> tracing::Span {
    tracing::debug_span!("compile", template = template)
}
