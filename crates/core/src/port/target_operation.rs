// Target Operation Port
// The actual work a worker performs against the target once its moment comes

use crate::domain::JobKind;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OperationError {
    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("Operation failed: {0}")]
    Failed(String),
}

/// Performs one stage against the target
///
/// The call takes `duration` of wall time and applies the stage's effect when
/// it returns.
#[async_trait]
pub trait TargetOperation: Send + Sync {
    async fn perform(
        &self,
        kind: JobKind,
        target: &str,
        threads: u32,
        duration: Duration,
    ) -> Result<(), OperationError>;
}

pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every performed stage after sleeping for its duration
    #[derive(Default)]
    pub struct RecordingOperation {
        performed: Arc<Mutex<Vec<(JobKind, String, u32)>>>,
    }

    impl RecordingOperation {
        pub fn performed(&self) -> Vec<(JobKind, String, u32)> {
            self.performed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TargetOperation for RecordingOperation {
        async fn perform(
            &self,
            kind: JobKind,
            target: &str,
            threads: u32,
            duration: Duration,
        ) -> Result<(), OperationError> {
            tokio::time::sleep(duration).await;
            self.performed
                .lock()
                .unwrap()
                .push((kind, target.to_string(), threads));
            Ok(())
        }
    }
}
