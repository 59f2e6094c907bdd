use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::ai::TextGenerator;
use crate::models::GenerationResult;

/// Deterministic stand-in for the text service.
///
/// Replays `script` in order, then answers every further call with `then`.
/// Budgets registered through [`ScriptedGenerator::answering`] bypass the
/// script. Records each prompt and budget it was called with.
pub struct ScriptedGenerator {
    script: Mutex<VecDeque<GenerationResult>>,
    by_budget: HashMap<u32, GenerationResult>,
    then: GenerationResult,
    calls: Mutex<Vec<(String, u32)>>,
    delay: Option<Duration>,
    panics: bool,
}

impl ScriptedGenerator {
    pub fn always(result: GenerationResult) -> Self {
        Self::script(Vec::new(), result)
    }

    pub fn script(results: Vec<GenerationResult>, then: GenerationResult) -> Self {
        Self {
            script: Mutex::new(results.into()),
            by_budget: HashMap::new(),
            then,
            calls: Mutex::new(Vec::new()),
            delay: None,
            panics: false,
        }
    }

    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::always(GenerationResult::Success(String::new()))
        }
    }

    /// Fixed answer for every call made with `max_tokens`.
    pub fn answering(mut self, max_tokens: u32, result: GenerationResult) -> Self {
        self.by_budget.insert(max_tokens, result);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str, max_tokens: u32) -> GenerationResult {
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), max_tokens));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panics {
            panic!("scripted generator failure");
        }
        if let Some(result) = self.by_budget.get(&max_tokens) {
            return result.clone();
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.then.clone())
    }

    fn model_version(&self) -> &str {
        "scripted"
    }
}
