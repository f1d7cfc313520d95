//! Tracing subscriber setup for Gatehouse binaries.
//!
//! Logs go to stderr so reports on stdout stay machine-readable. Events
//! emitted inside a run or job span carry that span's fields (`run_id`,
//! `key`, `job`), which keeps interleaved output of concurrent jobs
//! attributable.

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Targets that follow the requested level. Everything else (HTTP client,
/// runtime internals) stays at `warn`.
const GATEHOUSE_TARGETS: [&str; 5] = [
    "gatehouse",
    "gatehouse_core",
    "gatehouse_inventory",
    "gatehouse_ci",
    "toolchain_provisioner",
];

/// Filter directives used when `RUST_LOG` is not set.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(GATEHOUSE_TARGETS.iter().map(|t| format!("{t}={level}")));
    directives.join(",")
}

/// Initialise the global tracing subscriber.
///
/// `json` selects newline-delimited JSON where each line embeds the current
/// run or job span. Text output also logs span closes, which gives run and
/// job timings. Later calls are ignored.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_scope_level_to_gatehouse_crates() {
        let directives = default_directives(Level::DEBUG);
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("gatehouse_ci=debug"));
        assert!(directives.contains("toolchain_provisioner=debug"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::INFO);
        init_tracing(true, Level::DEBUG);
    }
}
