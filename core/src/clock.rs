//! Clock abstraction for testable time.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability.
///
/// Production code uses [`SystemClock`]; tests use the fixed clock from
/// `partnerflow-testing` for deterministic timestamps.
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
