//! Concurrency-bounded, deadline-enforced admission for inference.
//!
//! The detector is typically a single CPU/GPU-bound model; letting every
//! request call it at once oversubscribes the hardware. A counting
//! semaphore bounds how many calls may execute concurrently, and each
//! admitted call races a deadline. There is no "queue full" rejection:
//! backpressure is applied purely through the blocking permit acquire.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::error::DetectError;

/// Gate every blocking inference call through a permit and a deadline.
pub struct InferenceGate {
    permits: Arc<Semaphore>,
    deadline: Duration,
}

impl InferenceGate {
    pub fn new(max_concurrent: usize, deadline: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            deadline,
        }
    }

    /// Run `compute` on the blocking pool while holding one permit.
    ///
    /// When the deadline elapses, the caller gets [`DetectError::Timeout`]
    /// and the permit is released; the in-flight computation keeps running
    /// to completion in the background with its result discarded. The wait
    /// is abandoned, not the work.
    pub async fn run<T, F>(&self, compute: F) -> Result<T, DetectError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, DetectError> + Send + 'static,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| DetectError::Internal("inference gate is closed".to_string()))?;

        let task = tokio::task::spawn_blocking(compute);
        match tokio::time::timeout(self.deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(DetectError::Inference(format!(
                "inference task failed: {join_error}"
            ))),
            Err(_) => Err(DetectError::Timeout(self.deadline.as_secs())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn passes_through_the_compute_result() {
        let gate = InferenceGate::new(2, Duration::from_secs(5));
        let out = gate.run(|| Ok(41 + 1)).await.unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn propagates_compute_errors() {
        let gate = InferenceGate::new(2, Duration::from_secs(5));
        let err = gate
            .run::<(), _>(|| Err(DetectError::Inference("boom".to_string())))
            .await
            .unwrap_err();
        assert!(matches!(err, DetectError::Inference(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn timeout_is_distinguished_and_prompt() {
        let gate = InferenceGate::new(1, Duration::from_millis(50));
        let started = Instant::now();
        let err = gate
            .run(|| {
                std::thread::sleep(Duration::from_millis(500));
                Ok(())
            })
            .await
            .unwrap_err();
        let elapsed = started.elapsed();
        assert!(matches!(err, DetectError::Timeout(_)));
        // The caller is released at the deadline, not when the compute ends.
        assert!(
            elapsed < Duration::from_millis(400),
            "timed-out call took {elapsed:?}"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_never_exceeds_the_permit_count() {
        let gate = Arc::new(InferenceGate::new(2, Duration::from_secs(5)));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                gate.run(move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn permit_is_released_after_timeout() {
        let gate = InferenceGate::new(1, Duration::from_millis(30));
        let _ = gate
            .run(|| {
                std::thread::sleep(Duration::from_millis(200));
                Ok(())
            })
            .await;
        // The abandoned compute still holds a blocking-pool thread, but the
        // permit must be free for the next caller.
        let out = gate.run(|| Ok(7)).await.unwrap();
        assert_eq!(out, 7);
    }
}
