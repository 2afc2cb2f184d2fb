//! Mock provider implementation
//!
//! Ignores the image and picks one label uniformly at random from a fixed
//! table. The random source is injected so tests can pin the output.

use super::InferenceProvider;
use crate::error::Result;
use crate::types::{Image, RawInferenceResult};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Labels the mock can return, each with its fixed confidence.
pub const MOCK_LABELS: [(&str, f32); 5] = [
    ("plastic", 0.87),
    ("paper", 0.83),
    ("glass", 0.85),
    ("organic", 0.79),
    ("styrofoam", 0.92),
];

pub struct MockProvider<R = StdRng> {
    rng: Mutex<R>,
    latency: Duration,
}

impl MockProvider<StdRng> {
    /// Mock seeded from the operating system.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Mock whose label sequence is fully determined by `seed`.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }
}

impl Default for MockProvider<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RngCore + Send> MockProvider<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng: Mutex::new(rng),
            latency: Duration::ZERO,
        }
    }

    /// Simulate inference time before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn pick(&self) -> (&'static str, f32) {
        // Poisoning leaves the RNG state intact.
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        MOCK_LABELS[rng.gen_range(0..MOCK_LABELS.len())]
    }
}

#[async_trait]
impl<R: RngCore + Send + 'static> InferenceProvider for MockProvider<R> {
    async fn infer(&self, image: &Image) -> Result<RawInferenceResult> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let (label, confidence) = self.pick();
        debug!(
            "Mock classified {} byte {} image as {} ({})",
            image.bytes().len(),
            image.mime(),
            label,
            confidence
        );
        RawInferenceResult::new(label, confidence)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
