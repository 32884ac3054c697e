// Time Provider Port (for testability)

/// Time provider interface (allows mocking in tests)
pub trait TimeProvider: Send + Sync {
    /// Current time in milliseconds (fractional)
    fn now_millis(&self) -> f64;
}

/// Wall clock (epoch ms), used for report timestamps
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now_millis(&self) -> f64 {
        chrono::Utc::now().timestamp_micros() as f64 / 1000.0
    }
}

/// Monotonic clock anchored at construction
///
/// Backed by `tokio::time::Instant`, so it follows a paused test clock. All
/// timing handshakes between the executor and its workers use this clock.
pub struct MonotonicTimeProvider {
    origin: tokio::time::Instant,
}

impl MonotonicTimeProvider {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for MonotonicTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeProvider for MonotonicTimeProvider {
    fn now_millis(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}
