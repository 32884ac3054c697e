// Panic isolation for worker tasks
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::error;

use super::WorkerOutcome;

/// Run a worker future, turning a panic into an aborted outcome
///
/// The caller's cleanup (capacity release) runs either way.
pub async fn run_guarded<F>(worker: F) -> WorkerOutcome
where
    F: Future<Output = WorkerOutcome>,
{
    match AssertUnwindSafe(worker).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(panic_msg = %message, "Worker task panicked");
            WorkerOutcome::Aborted(format!("panicked: {}", message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passes_outcome_through() {
        let outcome = run_guarded(async { WorkerOutcome::Completed }).await;
        assert_eq!(outcome, WorkerOutcome::Completed);
    }

    async fn vanish() -> WorkerOutcome {
        tokio::task::yield_now().await;
        panic!("target vanished");
    }

    async fn fail(pid: u32) -> WorkerOutcome {
        panic!("worker {} failed", pid)
    }

    #[tokio::test]
    async fn test_panic_becomes_abort() {
        let outcome = run_guarded(vanish()).await;
        assert_eq!(
            outcome,
            WorkerOutcome::Aborted("panicked: target vanished".to_string())
        );
    }

    #[tokio::test]
    async fn test_formatted_panic_message() {
        let outcome = run_guarded(fail(7)).await;
        assert_eq!(
            outcome,
            WorkerOutcome::Aborted("panicked: worker 7 failed".to_string())
        );
    }
}
