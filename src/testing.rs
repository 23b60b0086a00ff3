//! Shared test doubles

use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::errors::{AppError, AppResult};
use crate::openai::CompletionClient;
use crate::prompt::Prompt;

/// Completion client returning a canned reply and recording every prompt
#[derive(Clone)]
pub struct MockCompletion {
    reply: Result<String, String>,
    prompts: Arc<Mutex<Vec<Prompt>>>,
}

impl MockCompletion {
    pub fn replying(text: impl Into<String>) -> Self {
        Self {
            reply: Ok(text.into()),
            prompts: Arc::default(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            reply: Err(reason.into()),
            prompts: Arc::default(),
        }
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }
}

impl CompletionClient for MockCompletion {
    fn complete(&self, prompt: &Prompt) -> impl Future<Output = AppResult<String>> + Send {
        self.prompts.lock().unwrap().push(prompt.clone());
        let reply = self.reply.clone();
        async move { reply.map_err(AppError::ModelUnavailable) }
    }
}
