//! Mock backend for tests and local development.
//!
//! Loads and generations are counted so callers can assert how often the
//! expensive paths actually ran.

use super::{BackendError, GenerationParams, ModelLoader, TextGenerator};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const MOCK_CONTINUATION: &str = "Mock continuation from the writing assistant.";

/// Mock loader. Each successful load yields a fresh [`MockTextGenerator`].
pub struct MockModelLoader {
    model_id: String,
    load_delay: Duration,
    generation_delay: Duration,
    failing_loads: AtomicUsize,
    panic_on_load: bool,
    fail_generation: Arc<AtomicBool>,
    loads: Arc<AtomicUsize>,
    generations: Arc<AtomicUsize>,
}

impl MockModelLoader {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            load_delay: Duration::ZERO,
            generation_delay: Duration::ZERO,
            failing_loads: AtomicUsize::new(0),
            panic_on_load: false,
            fail_generation: Arc::new(AtomicBool::new(false)),
            loads: Arc::new(AtomicUsize::new(0)),
            generations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Simulated time spent fetching and deserializing artifacts.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Simulated CPU time per generation. Spent on a blocking thread.
    pub fn with_generation_delay(mut self, delay: Duration) -> Self {
        self.generation_delay = delay;
        self
    }

    /// Fail the next `n` load attempts, then succeed.
    pub fn failing_first(self, n: usize) -> Self {
        self.failing_loads.store(n, Ordering::SeqCst);
        self
    }

    /// Panic inside the loader, as a crashed initialization would.
    pub fn panicking(mut self) -> Self {
        self.panic_on_load = true;
        self
    }

    /// Toggle generation failures for generators from this loader.
    pub fn set_generation_failure(&self, fail: bool) {
        self.fail_generation.store(fail, Ordering::SeqCst);
    }

    /// Number of load attempts started, successful or not.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Number of generation calls that reached the backend.
    pub fn generation_count(&self) -> usize {
        self.generations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelLoader for MockModelLoader {
    fn provider(&self) -> &'static str {
        "mock"
    }

    async fn load(&self) -> Result<Arc<dyn TextGenerator>, BackendError> {
        let attempt = self.loads.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.load_delay.is_zero() {
            tokio::time::sleep(self.load_delay).await;
        }

        if self.panic_on_load {
            panic!("mock loader crashed on attempt {}", attempt);
        }

        let should_fail = self
            .failing_loads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(BackendError::ArtifactUnavailable(format!(
                "mock artifact fetch failed on attempt {}",
                attempt
            )));
        }

        Ok(Arc::new(MockTextGenerator {
            model_id: self.model_id.clone(),
            generation_delay: self.generation_delay,
            fail_generation: Arc::clone(&self.fail_generation),
            generations: Arc::clone(&self.generations),
        }))
    }
}

/// Deterministic generator: echoes the prompt followed by a fixed continuation.
pub struct MockTextGenerator {
    model_id: String,
    generation_delay: Duration,
    fail_generation: Arc<AtomicBool>,
    generations: Arc<AtomicUsize>,
}

#[async_trait]
impl TextGenerator for MockTextGenerator {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, BackendError> {
        self.generations.fetch_add(1, Ordering::SeqCst);

        if self.fail_generation.load(Ordering::SeqCst) {
            return Err(BackendError::GenerationFailed(
                "mock tensor shape mismatch in layer 7".to_string(),
            ));
        }

        let prompt = prompt.to_string();
        let delay = self.generation_delay;
        let budget = params.max_new_tokens(&prompt) as usize;

        // Same shape as a real CPU-bound model call: off the async workers.
        tokio::task::spawn_blocking(move || {
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            let continuation: String = MOCK_CONTINUATION.chars().take(budget * 4).collect();
            format!("{} {}", prompt, continuation)
        })
        .await
        .map_err(|e| BackendError::GenerationFailed(e.to_string()))
    }
}
