//! Shared doubles for knowledge integration tests.

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use holocron_knowledge::chunks::Chunk;
use holocron_knowledge::{JsonCallPolicy, LlmClient, LlmError};

type Responder = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// LLM double answering from a closure over the user prompt; `None` is a
/// transport error.
pub struct ScriptedLlm {
    responder: Responder,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(responder: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always returns the same reply.
    pub fn constant(reply: &str) -> Self {
        let reply = reply.to_string();
        Self::new(move |_| Some(reply.clone()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _system: &str, user: &str, _json_mode: bool) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(user.to_string());
        (self.responder)(user).ok_or(LlmError::NoContent)
    }
}

pub fn fast_policy(max_retries: u32) -> JsonCallPolicy {
    JsonCallPolicy {
        max_retries,
        timeout: Duration::from_secs(5),
    }
}

pub fn chunk(book: &str, chapter: &str, index: i64, text: &str) -> Chunk {
    Chunk {
        chunk_id: format!("{}-{chapter}-{index}", book.to_lowercase().replace(' ', "-")),
        chunk_index: index,
        book_title: book.to_string(),
        chapter_title: Some(chapter.to_string()),
        era: "rebellion".to_string(),
        text: text.to_string(),
        characters: Vec::new(),
    }
}
