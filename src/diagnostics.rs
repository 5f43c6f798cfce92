//! The diagnostic path every caught failure is routed through.

use crate::error::Error;

/// Receives failures caught at a dispatch boundary.
///
/// Implementations are invoked on the thread that caught the failure, which
/// for callbacks and tasks is always the privileged thread. They must not
/// panic; the runtime does not guard against a failing sink.
pub trait Diagnostics: Send + Sync {
    /// Records a failure. `context` names the boundary that caught it.
    fn log_exception(&self, context: &str, error: &Error);
}

/// Default sink that forwards failures to the [`log`] facade at error level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn log_exception(&self, context: &str, error: &Error) {
        log::error!(target: "mainloop", "{context}: {error}");
    }
}
