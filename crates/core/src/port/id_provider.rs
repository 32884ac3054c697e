// ID Provider Port (for deterministic testing)

use std::sync::atomic::{AtomicU64, Ordering};

/// ID provider interface (pass ids in reports and spans)
pub trait IdProvider: Send + Sync {
    fn generate_id(&self) -> String;
}

/// UUID v4 provider (production)
pub struct UuidProvider;

impl IdProvider for UuidProvider {
    fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Counter-based provider: `pass-1`, `pass-2`, ...
#[derive(Default)]
pub struct SequentialIdProvider {
    next: AtomicU64,
}

impl IdProvider for SequentialIdProvider {
    fn generate_id(&self) -> String {
        format!("pass-{}", self.next.fetch_add(1, Ordering::SeqCst) + 1)
    }
}
