//! A scripted `AiFacade` for integration tests. Each call pops the next
//! queued response off its kind's queue; tests push exactly the responses
//! they expect a given scenario to need, in call order.

use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dispatch_core::kernel::ai::{AiFacade, ModelUsage};
use serde_json::Value;

pub struct MockAiFacade {
    text_responses: Mutex<Vec<String>>,
    object_responses: Mutex<Vec<Value>>,
    embedding: Vec<f32>,
}

impl MockAiFacade {
    pub fn new() -> Self {
        Self {
            text_responses: Mutex::new(Vec::new()),
            object_responses: Mutex::new(Vec::new()),
            embedding: vec![0.01_f32; 1536],
        }
    }

    pub fn with_text(self, response: impl Into<String>) -> Self {
        self.text_responses.lock().unwrap().push(response.into());
        self
    }

    pub fn with_object(self, response: Value) -> Self {
        self.object_responses.lock().unwrap().push(response);
        self
    }

    /// Queue another response onto an already-constructed (possibly shared)
    /// facade, e.g. one already wired into a `TestHarness`'s kernel.
    pub fn push_text(&self, response: impl Into<String>) {
        self.text_responses.lock().unwrap().push(response.into());
    }

    pub fn push_object(&self, response: Value) {
        self.object_responses.lock().unwrap().push(response);
    }
}

impl Default for MockAiFacade {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AiFacade for MockAiFacade {
    async fn generate_text(&self, _system: &str, _prompt: &str, _model: Option<&str>) -> Result<(String, ModelUsage)> {
        let mut queue = self.text_responses.lock().unwrap();
        if queue.is_empty() {
            return Err(anyhow!("MockAiFacade: no queued text response"));
        }
        let text = queue.remove(0);
        let usage = ModelUsage { prompt_tokens: 10, completion_tokens: 10, total_tokens: 20 };
        Ok((text, usage))
    }

    async fn generate_object(
        &self,
        _system: &str,
        _prompt: &str,
        _schema: &Value,
        _model: Option<&str>,
    ) -> Result<(Value, ModelUsage)> {
        let mut queue = self.object_responses.lock().unwrap();
        if queue.is_empty() {
            return Err(anyhow!("MockAiFacade: no queued object response"));
        }
        let value = queue.remove(0);
        let usage = ModelUsage { prompt_tokens: 10, completion_tokens: 10, total_tokens: 20 };
        Ok((value, usage))
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(self.embedding.clone())
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| self.embedding.clone()).collect())
    }
}
