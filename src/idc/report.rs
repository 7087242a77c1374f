//! Error reporting hook

use tracing::error;

/// Receives every client failure before it is returned.
///
/// `status` is negative for failures; `code` is
/// [`ProtocolError::code`](super::ProtocolError::code).
pub trait ErrorReporter: Send + Sync {
    /// Handle one failure
    fn report(&self, status: i32, code: i32, message: &str);
}

impl<F> ErrorReporter for F
where
    F: Fn(i32, i32, &str) + Send + Sync,
{
    fn report(&self, status: i32, code: i32, message: &str) {
        self(status, code, message);
    }
}

/// Default reporter: logs through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, status: i32, code: i32, message: &str) {
        error!(status, code, "{message}");
    }
}
