//! Environment module - injected dependencies that are not storage or collaborators.
//!
//! Services never read the wall clock directly; they take an `Arc<dyn Clock>` so
//! closeout timestamps and claim expiry are deterministic under test.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```ignore
/// // Production - uses system clock
/// let clock: Arc<dyn Clock> = Arc::new(SystemClock);
///
/// // Test - fixed time for deterministic tests
/// let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(time));
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
