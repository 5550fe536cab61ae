//! Model lifecycle and readiness.
//!
//! [`ModelCoordinator`] owns the single backend handle of the process and the
//! state machine that guards it:
//!
//! ```text
//! Uninitialized --acquire/start_background--> Loading --ok--> Ready
//!       ^                                        |
//!       +-------------- err (Retry) -------------+--err (FailFast)--> Failed
//! ```
//!
//! Lazy, background and blocking startup all enter `Loading` through the
//! same `begin` path. The load itself runs in a spawned task and its outcome
//! is published on a `watch` channel, so callers that joined an in-flight
//! load are woken rather than polling.

use crate::config::LoadRetryPolicy;
use crate::services::backend::{ModelLoader, TextGenerator};
use crate::services::metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;

/// The ready backend handle shared by all requests.
pub type BackendHandle = Arc<dyn TextGenerator>;

type LoadOutcome = Result<BackendHandle, LoadFailure>;

/// Why a load attempt did not produce a handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadFailure {
    pub message: String,
    pub at: DateTime<Utc>,
    pub attempt: u64,
}

impl LoadFailure {
    fn new(attempt: u64, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            at: Utc::now(),
            attempt,
        }
    }
}

impl std::fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "load attempt {} failed: {}", self.attempt, self.message)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// This caller started the load and it failed.
    #[error("model load failed: {0}")]
    LoadFailed(LoadFailure),

    /// A load this caller was waiting on did not produce a handle.
    #[error("model unavailable: the in-flight load did not complete")]
    Unavailable,

    /// Non-waiting acquire while the model is not ready yet.
    #[error("model not loaded")]
    NotReady,
}

/// Coarse phase, as reported by health endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPhase {
    Uninitialized,
    Loading,
    Ready,
    Failed,
}

/// Consistent snapshot of the coordinator, taken under its lock.
#[derive(Debug, Clone, Serialize)]
pub struct LoadStatus {
    pub phase: LoadPhase,
    pub model_loaded: bool,
    pub load_attempts: u64,
    pub last_failure: Option<LoadFailure>,
}

enum LoadState {
    Uninitialized { last_failure: Option<LoadFailure> },
    Loading { outcome: watch::Receiver<Option<LoadOutcome>> },
    Ready(BackendHandle),
    Failed(LoadFailure),
}

/// What `begin` decided for one caller.
enum Entry {
    Ready(BackendHandle),
    Started(watch::Receiver<Option<LoadOutcome>>),
    Joined(watch::Receiver<Option<LoadOutcome>>),
}

pub struct ModelCoordinator {
    loader: Arc<dyn ModelLoader>,
    retry_policy: LoadRetryPolicy,
    load_timeout: Duration,
    attempts: AtomicU64,
    state: Mutex<LoadState>,
}

impl ModelCoordinator {
    pub fn new(
        loader: Arc<dyn ModelLoader>,
        retry_policy: LoadRetryPolicy,
        load_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            loader,
            retry_policy,
            load_timeout,
            attempts: AtomicU64::new(0),
            state: Mutex::new(LoadState::Uninitialized { last_failure: None }),
        })
    }

    /// Return the ready handle, loading it first if nobody has.
    ///
    /// Concurrent callers share one load. The caller that started it gets
    /// the failure detail; callers that joined get [`CoordinatorError::Unavailable`]
    /// and may simply call again.
    pub async fn acquire(self: &Arc<Self>) -> Result<BackendHandle, CoordinatorError> {
        match self.begin()? {
            Entry::Ready(handle) => Ok(handle),
            Entry::Started(rx) => match wait_for_outcome(rx).await {
                Some(Ok(handle)) => Ok(handle),
                Some(Err(failure)) => Err(CoordinatorError::LoadFailed(failure)),
                None => Err(CoordinatorError::Unavailable),
            },
            Entry::Joined(rx) => match wait_for_outcome(rx).await {
                Some(Ok(handle)) => Ok(handle),
                Some(Err(_)) | None => Err(CoordinatorError::Unavailable),
            },
        }
    }

    /// Return the handle only if it is ready now. Never waits; kicks off a
    /// background load if none is running.
    pub fn try_acquire(self: &Arc<Self>) -> Result<BackendHandle, CoordinatorError> {
        match self.begin()? {
            Entry::Ready(handle) => Ok(handle),
            Entry::Started(_) | Entry::Joined(_) => Err(CoordinatorError::NotReady),
        }
    }

    /// Eager start: begin loading now without waiting for the result.
    pub fn start_background(self: &Arc<Self>) {
        match self.begin() {
            Ok(Entry::Started(_)) => tracing::info!("Background model load started"),
            Ok(Entry::Joined(_)) => tracing::debug!("Model load already in flight"),
            Ok(Entry::Ready(_)) => tracing::debug!("Model already loaded"),
            Err(e) => tracing::warn!(error = %e, "Background model load not started"),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.lock_state(), LoadState::Ready(_))
    }

    pub fn status(&self) -> LoadStatus {
        let state = self.lock_state();
        let (phase, last_failure) = match &*state {
            LoadState::Uninitialized { last_failure } => {
                (LoadPhase::Uninitialized, last_failure.clone())
            }
            LoadState::Loading { .. } => (LoadPhase::Loading, None),
            LoadState::Ready(_) => (LoadPhase::Ready, None),
            LoadState::Failed(failure) => (LoadPhase::Failed, Some(failure.clone())),
        };

        LoadStatus {
            phase,
            model_loaded: phase == LoadPhase::Ready,
            load_attempts: self.attempts.load(Ordering::SeqCst),
            last_failure,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LoadState> {
        // The lock is never held across an await or user code, so a poisoned
        // lock still guards a consistent state.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The single transition point out of `Uninitialized`.
    fn begin(self: &Arc<Self>) -> Result<Entry, CoordinatorError> {
        let mut state = self.lock_state();
        match &*state {
            LoadState::Ready(handle) => Ok(Entry::Ready(Arc::clone(handle))),
            LoadState::Loading { outcome } => Ok(Entry::Joined(outcome.clone())),
            LoadState::Failed(failure) => Err(CoordinatorError::LoadFailed(failure.clone())),
            LoadState::Uninitialized { .. } => {
                let (tx, rx) = watch::channel(None);
                // Under the lock: a Loading snapshot always includes its own attempt.
                let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                *state = LoadState::Loading {
                    outcome: rx.clone(),
                };
                drop(state);

                let pending = PendingLoad {
                    coordinator: Arc::clone(self),
                    tx: Some(tx),
                    attempt,
                };
                tokio::spawn(pending.run());

                Ok(Entry::Started(rx))
            }
        }
    }

    /// Commit an outcome to the state, then wake the waiters.
    fn settle(&self, outcome: LoadOutcome, tx: watch::Sender<Option<LoadOutcome>>) {
        {
            let mut state = self.lock_state();
            *state = match &outcome {
                Ok(handle) => LoadState::Ready(Arc::clone(handle)),
                Err(failure) => match self.retry_policy {
                    LoadRetryPolicy::Retry => LoadState::Uninitialized {
                        last_failure: Some(failure.clone()),
                    },
                    LoadRetryPolicy::FailFast => LoadState::Failed(failure.clone()),
                },
            };
        }
        tx.send_replace(Some(outcome));
    }
}

/// One in-flight load. Settles the coordinator exactly once, including when
/// the task is dropped before finishing.
struct PendingLoad {
    coordinator: Arc<ModelCoordinator>,
    tx: Option<watch::Sender<Option<LoadOutcome>>>,
    attempt: u64,
}

impl PendingLoad {
    async fn run(mut self) {
        let coordinator = Arc::clone(&self.coordinator);
        let provider = coordinator.loader.provider();
        let started = Instant::now();

        tracing::info!(provider, attempt = self.attempt, "Loading model");

        // A panicking loader surfaces as a JoinError instead of unwinding this task.
        let loader = Arc::clone(&coordinator.loader);
        let mut load = tokio::spawn(async move { loader.load().await });

        let outcome = match tokio::time::timeout(coordinator.load_timeout, &mut load).await {
            Ok(Ok(Ok(handle))) => Ok(handle),
            Ok(Ok(Err(e))) => Err(LoadFailure::new(self.attempt, e.to_string())),
            Ok(Err(join_error)) => Err(LoadFailure::new(
                self.attempt,
                format!("model loader crashed: {}", join_error),
            )),
            Err(_) => {
                load.abort();
                Err(LoadFailure::new(
                    self.attempt,
                    format!(
                        "model load timed out after {}s",
                        coordinator.load_timeout.as_secs_f64()
                    ),
                ))
            }
        };

        let elapsed = started.elapsed().as_secs_f64();
        metrics::record_model_load(provider, outcome.is_ok(), elapsed);

        match &outcome {
            Ok(handle) => tracing::info!(
                provider,
                model = %handle.model_id(),
                attempt = self.attempt,
                elapsed_secs = elapsed,
                "Model ready"
            ),
            Err(failure) => tracing::error!(
                provider,
                attempt = self.attempt,
                elapsed_secs = elapsed,
                error = %failure.message,
                retry_policy = coordinator.retry_policy.as_str(),
                "Model load failed"
            ),
        }

        if let Some(tx) = self.tx.take() {
            coordinator.settle(outcome, tx);
        }
    }
}

impl Drop for PendingLoad {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tracing::warn!(attempt = self.attempt, "Model load abandoned before completing");
            self.coordinator.settle(
                Err(LoadFailure::new(self.attempt, "model load was abandoned")),
                tx,
            );
        }
    }
}

/// Wait until the load publishes an outcome. `None` if the sender vanished
/// without one.
async fn wait_for_outcome(mut rx: watch::Receiver<Option<LoadOutcome>>) -> Option<LoadOutcome> {
    loop {
        if let Some(outcome) = rx.borrow_and_update().as_ref() {
            return Some(outcome.clone());
        }
        if rx.changed().await.is_err() {
            return rx.borrow().clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::backend::mock::MockModelLoader;
    use crate::services::backend::GenerationParams;

    fn coordinator(
        loader: &Arc<MockModelLoader>,
        policy: LoadRetryPolicy,
        timeout: Duration,
    ) -> Arc<ModelCoordinator> {
        let loader: Arc<dyn ModelLoader> = loader.clone();
        ModelCoordinator::new(loader, policy, timeout)
    }

    fn slow_loader(ms: u64) -> Arc<MockModelLoader> {
        Arc::new(MockModelLoader::new("mock-model").with_load_delay(Duration::from_millis(ms)))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquire_loads_exactly_once() {
        let loader = slow_loader(100);
        let coord = coordinator(&loader, LoadRetryPolicy::Retry, Duration::from_secs(5));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let coord = Arc::clone(&coord);
            tasks.push(tokio::spawn(async move { coord.acquire().await }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }

        assert_eq!(loader.load_count(), 1);
        assert!(handles.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(coord.status().load_attempts, 1);
    }

    #[tokio::test]
    async fn ready_handle_is_returned_without_reloading() {
        let loader = slow_loader(0);
        let coord = coordinator(&loader, LoadRetryPolicy::Retry, Duration::from_secs(5));

        let first = coord.acquire().await.unwrap();
        let second = coord.acquire().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.load_count(), 1);
    }

    #[tokio::test]
    async fn failure_resets_so_next_call_retries() {
        let loader = Arc::new(MockModelLoader::new("mock-model").failing_first(1));
        let coord = coordinator(&loader, LoadRetryPolicy::Retry, Duration::from_secs(5));

        match coord.acquire().await {
            Err(CoordinatorError::LoadFailed(failure)) => {
                assert_eq!(failure.attempt, 1);
                assert!(failure.message.contains("mock artifact fetch failed"));
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }

        let status = coord.status();
        assert_eq!(status.phase, LoadPhase::Uninitialized);
        assert!(!status.model_loaded);
        assert!(status.last_failure.is_some());

        coord.acquire().await.unwrap();
        assert_eq!(loader.load_count(), 2);
        assert_eq!(coord.status().phase, LoadPhase::Ready);
        assert!(coord.status().last_failure.is_none());
    }

    #[tokio::test]
    async fn fail_fast_policy_is_terminal() {
        let loader = Arc::new(MockModelLoader::new("mock-model").failing_first(1));
        let coord = coordinator(&loader, LoadRetryPolicy::FailFast, Duration::from_secs(5));

        assert!(matches!(
            coord.acquire().await,
            Err(CoordinatorError::LoadFailed(_))
        ));
        assert!(matches!(
            coord.acquire().await,
            Err(CoordinatorError::LoadFailed(_))
        ));
        assert!(matches!(
            coord.try_acquire(),
            Err(CoordinatorError::LoadFailed(_))
        ));

        assert_eq!(loader.load_count(), 1);
        assert_eq!(coord.status().phase, LoadPhase::Failed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failure_detail_goes_to_originator_only() {
        let loader = Arc::new(
            MockModelLoader::new("mock-model")
                .with_load_delay(Duration::from_millis(100))
                .failing_first(1),
        );
        let coord = coordinator(&loader, LoadRetryPolicy::Retry, Duration::from_secs(5));

        let originator = {
            let coord = Arc::clone(&coord);
            tokio::spawn(async move { coord.acquire().await })
        };
        // Let the originator enter Loading before the waiter arrives.
        while coord.status().phase != LoadPhase::Loading {
            tokio::task::yield_now().await;
        }
        let waiter = {
            let coord = Arc::clone(&coord);
            tokio::spawn(async move { coord.acquire().await })
        };

        assert!(matches!(
            originator.await.unwrap(),
            Err(CoordinatorError::LoadFailed(_))
        ));
        assert!(matches!(
            waiter.await.unwrap(),
            Err(CoordinatorError::Unavailable)
        ));
        assert_eq!(loader.load_count(), 1);
    }

    #[tokio::test]
    async fn load_timeout_resets_state() {
        let loader = slow_loader(5_000);
        let coord = coordinator(&loader, LoadRetryPolicy::Retry, Duration::from_millis(50));

        match coord.acquire().await {
            Err(CoordinatorError::LoadFailed(failure)) => {
                assert!(failure.message.contains("timed out"))
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }
        assert_eq!(coord.status().phase, LoadPhase::Uninitialized);
    }

    #[tokio::test]
    async fn panicking_loader_does_not_strand_loading() {
        let loader = Arc::new(MockModelLoader::new("mock-model").panicking());
        let coord = coordinator(&loader, LoadRetryPolicy::Retry, Duration::from_secs(5));

        match coord.acquire().await {
            Err(CoordinatorError::LoadFailed(failure)) => {
                assert!(failure.message.contains("crashed"))
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }
        assert_eq!(coord.status().phase, LoadPhase::Uninitialized);
    }

    #[tokio::test]
    async fn dropped_caller_does_not_cancel_load() {
        let loader = slow_loader(50);
        let coord = coordinator(&loader, LoadRetryPolicy::Retry, Duration::from_secs(5));

        // The first caller gives up almost immediately.
        let _ = tokio::time::timeout(Duration::from_millis(5), coord.acquire()).await;

        let handle = coord.acquire().await.unwrap();
        assert_eq!(handle.model_id(), "mock-model");
        assert_eq!(loader.load_count(), 1);
    }

    #[tokio::test]
    async fn background_start_shares_the_same_load() {
        let loader = slow_loader(50);
        let coord = coordinator(&loader, LoadRetryPolicy::Retry, Duration::from_secs(5));

        coord.start_background();
        let status = coord.status();
        assert_eq!(status.phase, LoadPhase::Loading);
        assert_eq!(status.load_attempts, 1);

        coord.acquire().await.unwrap();
        coord.start_background();

        assert_eq!(loader.load_count(), 1);
    }

    #[tokio::test]
    async fn try_acquire_starts_load_and_reports_not_ready() {
        let loader = slow_loader(50);
        let coord = coordinator(&loader, LoadRetryPolicy::Retry, Duration::from_secs(5));

        assert!(matches!(coord.try_acquire(), Err(CoordinatorError::NotReady)));
        assert!(matches!(coord.try_acquire(), Err(CoordinatorError::NotReady)));

        let handle = coord.acquire().await.unwrap();
        let again = coord.try_acquire().unwrap();
        assert!(Arc::ptr_eq(&handle, &again));
        assert_eq!(loader.load_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn status_never_reports_loaded_before_ready() {
        let loader = slow_loader(50);
        let coord = coordinator(&loader, LoadRetryPolicy::Retry, Duration::from_secs(5));

        assert!(!coord.status().model_loaded);

        let observer = {
            let coord = Arc::clone(&coord);
            tokio::spawn(async move {
                loop {
                    let status = coord.status();
                    // A loaded report must always come with a usable handle.
                    if status.model_loaded {
                        assert_eq!(status.phase, LoadPhase::Ready);
                        assert!(coord.try_acquire().is_ok());
                        return;
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        coord.acquire().await.unwrap();
        observer.await.unwrap();
        assert!(coord.is_ready());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn loading_status_always_counts_its_attempt() {
        let loader = slow_loader(20);
        let coord = coordinator(&loader, LoadRetryPolicy::Retry, Duration::from_secs(5));

        let observer = {
            let coord = Arc::clone(&coord);
            tokio::spawn(async move {
                loop {
                    let status = coord.status();
                    if status.phase == LoadPhase::Loading {
                        assert!(status.load_attempts >= 1);
                    }
                    if status.model_loaded {
                        return;
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        coord.acquire().await.unwrap();
        observer.await.unwrap();
    }

    #[tokio::test]
    async fn ready_handle_generates() {
        let loader = slow_loader(0);
        let coord = coordinator(&loader, LoadRetryPolicy::Retry, Duration::from_secs(5));

        let handle = coord.acquire().await.unwrap();
        let text = handle
            .generate("Hello", &GenerationParams::total(100, 0.7))
            .await
            .unwrap();

        assert!(text.starts_with("Hello"));
        assert_eq!(loader.generation_count(), 1);
    }
}
