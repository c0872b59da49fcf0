//! Process-wide logging setup shared by the binaries.

/// Initialize process-wide structured logging.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Subscriber configuration (filter, output format).
pub mod tracing;

pub use self::tracing::LogFormat;
