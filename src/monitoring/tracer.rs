/*!
 * Structured Tracing
 * Subscriber setup and job spans using the tracing crate
 *
 * Features:
 * - Env-filtered output (RUST_LOG, default: info)
 * - JSON-formatted logs for structured parsing
 * - One span per daemon job, keyed by a generated job id
 */

use tracing::{info, info_span, Span};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

use crate::core::SessionConfig;

/// Initialize structured tracing once per process
///
/// A second call is ignored, so tests and the binary can both call it.
pub fn init_tracing(config: &SessionConfig) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if config.trace_json {
        // JSON output for production/parsing
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_line_number(true)
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
    };

    if installed.is_ok() {
        info!(json = config.trace_json, "Structured tracing initialized");
    }
}

/// Generate a unique id for one daemon job
pub fn generate_job_id() -> String {
    Uuid::new_v4().to_string()
}

/// Span covering everything a worker does for one job
pub fn job_span(job_id: &str) -> Span {
    info_span!("job", id = %job_id, pid = std::process::id())
}
