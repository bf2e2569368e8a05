//! Reporting channel for non-fatal operational issues.

use std::error::Error;

/// Receives errors and warnings the engine handles internally.
///
/// The engine logs every event itself; a sink forwards them somewhere a
/// human will see them. Implementations must not block.
pub trait EventSink: Send + Sync {
    /// A poll or hook invocation failed.
    fn on_error(&self, error: &dyn Error, message: &str);

    /// Something looked wrong but nothing failed.
    fn on_warning(&self, message: &str);
}
