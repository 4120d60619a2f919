//! Crate-standard `tracing` subscriber setup.
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Default directive used when neither the caller nor `RUST_LOG` supplies a usable filter.
const FALLBACK_FILTER: &str = "info";

/// Build the `EnvFilter` for a run. `RUST_LOG` wins over the caller-provided directive so that
/// individual targets can be turned up without touching the command line.
#[must_use]
pub fn env_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .unwrap_or_else(|_| EnvFilter::new(FALLBACK_FILTER))
}

/// Install the global subscriber. Calling this twice is harmless; the second call is ignored.
pub fn setup(directive: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(directive))
        .with_target(false)
        .with_span_events(FmtSpan::CLOSE)
        .compact()
        .try_init();
}
