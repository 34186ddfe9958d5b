//! Tracing and logging (shared setup).

pub use crate::tracing::LogFormat;

/// Initialize process-wide tracing, picking the format from `PURSE_LOG_FORMAT`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize process-wide tracing with an explicit output format.
pub fn init_with(format: LogFormat) {
    tracing::init_with(format);
}

/// Tracing configuration (filters, layers).
pub mod tracing;
