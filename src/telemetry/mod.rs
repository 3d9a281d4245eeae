//! Process-wide tracing setup, built on `tracing` + `tracing-subscriber`
//! (`env-filter`, `fmt`, `ansi`). The engine instruments its entry points
//! with `#[instrument]` and emits `tracing::debug!`/`info!`/`warn!` at state
//! transitions, independent of the synchronous Observer bus (spec.md §4.7),
//! which is the engine's public event contract rather than a developer log.

use tracing_subscriber::EnvFilter;

/// Install a global `fmt` subscriber honoring `RUST_LOG` (defaulting to
/// `info` for this crate). Safe to call more than once; later calls are
/// no-ops if a global subscriber is already set.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowgraph=info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
