//! Logging setup for the covpipe binary.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Directive used when `RUST_LOG` is unset: `level` for covpipe itself,
/// warnings only for the HTTP stack.
fn default_directive(level: Level) -> String {
    format!("covpipe={level},covpipe_core={level},warn", level = level.as_str().to_lowercase())
}

/// Install the global subscriber. Logs go to stderr, as JSON lines when
/// `json` is set. Later calls are ignored.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    if json {
        registry.with(layer.json()).try_init().ok();
    } else {
        registry.with(layer).try_init().ok();
    }
}
