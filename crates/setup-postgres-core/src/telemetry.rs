//! Step logging for `setup-postgres`.
//!
//! Everything is written to stderr. Stdout carries only values a workflow
//! may capture: `name=value` outputs on local runs, `plan` JSON and the
//! `uri` command.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// HTTP client crates pulled in by the signing-key download. Their debug
/// output drowns the stage log, so they stay at `warn` unless `RUST_LOG`
/// says otherwise.
const QUIET_TARGETS: [&str; 3] = ["reqwest", "hyper", "rustls"];

/// Filter directive used when `RUST_LOG` is unset.
pub fn default_directive(level: Level) -> String {
    let mut directive = level.as_str().to_ascii_lowercase();
    for target in QUIET_TARGETS {
        directive.push_str(&format!(",{target}=warn"));
    }
    directive
}

/// Install the global subscriber for a run.
///
/// `RUST_LOG` wins when set; otherwise [`default_directive`] applies.
/// `json` switches to newline-delimited JSON. Only the first call has any
/// effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer.json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer)
            .try_init()
            .ok();
    }
}
