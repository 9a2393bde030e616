/*!
 * Monitoring
 * Tracing subscriber and per-job spans
 */

mod tracer;

pub use tracer::{generate_job_id, init_tracing, job_span};
