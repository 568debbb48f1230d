//! In-process NLI backend for tests and offline runs

use async_trait::async_trait;
use sdk::errors::EngineError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{NliBackend, NliLabel, NliPrediction};

/// Returns scripted predictions in call order, then a fixed fallback.
pub struct MockNliBackend {
    fallback: NliPrediction,
    script: Mutex<VecDeque<NliPrediction>>,
    calls: AtomicUsize,
}

impl MockNliBackend {
    /// Always `NEUTRAL` at 0.5
    pub fn new() -> Self {
        Self::fixed(NliPrediction::new(NliLabel::Neutral, 0.5))
    }

    pub fn fixed(prediction: NliPrediction) -> Self {
        Self {
            fallback: prediction,
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn scripted(predictions: Vec<NliPrediction>) -> Self {
        let mock = Self::new();
        if let Ok(mut script) = mock.script.lock() {
            script.extend(predictions);
        }
        mock
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockNliBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NliBackend for MockNliBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn infer(&self, _premise: &str, _hypothesis: &str) -> Result<NliPrediction, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .map_err(|_| EngineError::Backend("mock NLI script poisoned".to_string()))?
            .pop_front();
        Ok(next.unwrap_or(self.fallback))
    }
}
