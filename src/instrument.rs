//! Instrumentation hooks for request lifecycle events.
//!
//! The orchestrator emits `<prefix>.request`, `<prefix>.response`,
//! `<prefix>.retry`, and `<prefix>.error` events when an instrumentor is
//! configured. Setting `WRAITH_DEBUG` or `WRAITH_STANDARD_INSTRUMENTOR`
//! forces [`LogInstrumentor`] on connections that have none.

use crate::error::Error;
use crate::options::Datum;

/// Receiver for request lifecycle events.
pub trait Instrumentor: Send + Sync {
    /// `name` is `<prefix>.<request|response|retry|error>`; `error` is set
    /// for retry and error events.
    fn instrument(&self, name: &str, datum: &Datum, error: Option<&Error>);
}

/// Instrumentor that emits `tracing` debug events.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogInstrumentor;

impl Instrumentor for LogInstrumentor {
    fn instrument(&self, name: &str, datum: &Datum, error: Option<&Error>) {
        match error {
            Some(err) => tracing::debug!(
                target: "wraith",
                event = name,
                method = %datum.method,
                host = %datum.host,
                path = %datum.path,
                error = %err,
            ),
            None => {
                let status = datum.response.as_ref().map(|response| response.status);
                tracing::debug!(
                    target: "wraith",
                    event = name,
                    method = %datum.method,
                    host = %datum.host,
                    path = %datum.path,
                    status,
                );
            }
        }
    }
}

pub(crate) fn forced_by_env() -> bool {
    std::env::var_os("WRAITH_DEBUG").is_some()
        || std::env::var_os("WRAITH_STANDARD_INSTRUMENTOR").is_some()
}
