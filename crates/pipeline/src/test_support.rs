use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use digest_llm::{GenerateError, Generator};

use crate::prompts;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub system: String,
    pub prompt: String,
}

type Responder = dyn Fn(usize, &str, &str) -> Result<String, GenerateError> + Send + Sync;

/// In-memory generator that answers from a closure and records every call.
/// The closure receives the zero-based call index, the system instruction
/// and the prompt.
pub struct ScriptedGenerator {
    respond: Box<Responder>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
}

impl ScriptedGenerator {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(usize, &str, &str) -> Result<String, GenerateError> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Answers keyword requests with `alpha, beta` and everything else with
    /// `analysis #<call index>`.
    pub fn echo() -> Self {
        Self::new(|call, system, _prompt| {
            if system == prompts::KEYWORD_SYSTEM {
                Ok("alpha, beta".to_string())
            } else {
                Ok(format!("analysis #{call}"))
            }
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Prompts sent with the analysis system instruction.
    pub fn analysis_prompts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.system == prompts::ANALYSIS_SYSTEM)
            .map(|call| call.prompt)
            .collect()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String, GenerateError> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(RecordedCall {
                system: system.to_string(),
                prompt: prompt.to_string(),
            });
            calls.len() - 1
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.respond)(index, system, prompt)
    }
}
