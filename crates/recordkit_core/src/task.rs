//! Scheduling of fire-and-forget work.

use std::future::Future;
use tracing::warn;

/// Spawns `future` on the current tokio runtime and returns immediately.
///
/// Outside a runtime the work cannot run; it is dropped with a warning.
pub(crate) fn spawn_detached<F>(label: &'static str, future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
        }
        Err(_) => warn!(
            operation = label,
            "no async runtime available, background operation dropped"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn runs_on_current_runtime() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        spawn_detached("test", async move {
            flag.store(true, Ordering::SeqCst);
        });

        for _ in 0..10 {
            if ran.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn dropped_without_runtime() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        spawn_detached("test", async move {
            flag.store(true, Ordering::SeqCst);
        });
        assert!(!ran.load(Ordering::SeqCst));
    }
}
