//! Logging setup.
//!
//! The crate only emits `tracing` events; installing a subscriber is left to
//! the application. [`init`] is a convenience that installs a compact stderr
//! formatter filtered by the `NODEGROUP_LOG` environment variable (default
//! `warn`), e.g. `NODEGROUP_LOG=nodegroup=debug`.

use std::sync::Once;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directives.
pub const FILTER_ENV: &str = "NODEGROUP_LOG";

static INIT: Once = Once::new();

/// Install the stderr subscriber. Safe to call more than once; only the first
/// call has an effect, and an already-installed global subscriber is kept.
pub fn init() {
    INIT.call_once(setup_logging);
}

fn setup_logging() {
    let layer = fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_filter(filters());
    // Another subscriber may already be installed by the host application.
    let _ = tracing_subscriber::registry().with(layer).try_init();
}

fn filters() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .with_env_var(FILTER_ENV)
        .from_env_lossy()
}
