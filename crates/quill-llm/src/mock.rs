//! Mock model gateway for deterministic testing.
//!
//! Returns pre-configured responses without making any network calls.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::gateway::*;
use quill_core::{QuillError, Result};

/// A mock gateway that returns pre-configured responses in FIFO order.
///
/// # Example
/// ```
/// use quill_llm::mock::MockGateway;
/// let gateway = MockGateway::new()
///     .with_response("Hello, world!");
/// ```
pub struct MockGateway {
    replies: Arc<Mutex<Vec<MockReply>>>,
    /// Track all requests received (for assertions in tests).
    pub requests: Arc<Mutex<Vec<GatewayRequest>>>,
    /// Characters per streamed content chunk. 0 streams word by word.
    chunk_size: usize,
}

/// A pre-configured reply from the mock gateway.
#[derive(Clone, Default)]
pub struct MockReply {
    pub text: String,
    pub reasoning: Option<String>,
    pub image_urls: Vec<String>,
    /// If set, the gateway returns this error instead.
    pub error: Option<String>,
}

impl MockReply {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn error(msg: &str) -> Self {
        Self {
            error: Some(msg.to_string()),
            ..Default::default()
        }
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            replies: Arc::new(Mutex::new(vec![])),
            requests: Arc::new(Mutex::new(vec![])),
            chunk_size: 0,
        }
    }

    /// Stream content in fixed character chunks instead of word by word.
    pub fn with_chunk_size(mut self, chars: usize) -> Self {
        self.chunk_size = chars;
        self
    }

    /// Queue a simple text reply.
    pub fn with_response(self, text: &str) -> Self {
        self.push(MockReply::text(text));
        self
    }

    /// Queue a reply with separate reasoning.
    pub fn with_reasoned_response(self, reasoning: &str, text: &str) -> Self {
        self.push(MockReply {
            text: text.to_string(),
            reasoning: Some(reasoning.to_string()),
            ..Default::default()
        });
        self
    }

    /// Queue an image-generation reply.
    pub fn with_image(self, url: &str) -> Self {
        self.push(MockReply {
            image_urls: vec![url.to_string()],
            ..Default::default()
        });
        self
    }

    /// Queue an error reply.
    pub fn with_error(self, error: &str) -> Self {
        self.push(MockReply::error(error));
        self
    }

    /// Queue a fully custom reply.
    pub fn with_reply(self, reply: MockReply) -> Self {
        self.push(reply);
        self
    }

    fn push(&self, reply: MockReply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push(reply);
        }
    }

    /// Get all requests that were made to this gateway.
    pub fn recorded_requests(&self) -> Arc<Mutex<Vec<GatewayRequest>>> {
        Arc::clone(&self.requests)
    }

    /// Number of requests made so far, streams and file analyses included.
    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    fn record(&self, request: &GatewayRequest) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
    }

    /// Pop the next queued reply, or a default "no reply queued" message.
    fn next_reply(&self) -> MockReply {
        let mut replies = match self.replies.lock() {
            Ok(replies) => replies,
            Err(_) => return MockReply::text("(mock: poisoned queue)"),
        };
        if replies.is_empty() {
            MockReply::text("(mock: no more queued replies)")
        } else {
            replies.remove(0)
        }
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelGateway for MockGateway {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &GatewayRequest) -> Result<String> {
        self.record(request);
        let reply = self.next_reply();
        match reply.error {
            Some(error) => Err(QuillError::Gateway(error)),
            None => Ok(reply.text),
        }
    }

    async fn complete_with_reasoning(&self, request: &GatewayRequest) -> Result<Reasoned> {
        self.record(request);
        let reply = self.next_reply();
        match reply.error {
            Some(error) => Err(QuillError::Gateway(error)),
            None => Ok(Reasoned {
                reasoning: reply.reasoning,
                text: reply.text,
            }),
        }
    }

    async fn stream(&self, request: &GatewayRequest) -> Result<mpsc::Receiver<StreamChunk>> {
        self.record(request);
        let reply = self.next_reply();
        let chunk_size = self.chunk_size;

        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            if let Some(error) = reply.error {
                let _ = tx.send(StreamChunk::Error(error)).await;
                return;
            }

            if let Some(reasoning) = reply.reasoning {
                for piece in chop(&reasoning, chunk_size) {
                    let _ = tx.send(StreamChunk::Thinking(piece)).await;
                }
            }

            for piece in chop(&reply.text, chunk_size) {
                let _ = tx.send(StreamChunk::Content(piece)).await;
            }

            let _ = tx.send(StreamChunk::Done).await;
        });

        Ok(rx)
    }

    async fn generate_image(&self, _model: &str, prompt: &str) -> Result<Vec<String>> {
        self.record(&GatewayRequest::new(
            "mock/image",
            vec![quill_core::ChatMessage::user(prompt)],
        ));
        let reply = self.next_reply();
        match reply.error {
            Some(error) => Err(QuillError::Gateway(error)),
            None => Ok(reply.image_urls),
        }
    }

    async fn analyze_file(&self, _model: &str, file_ref: &str, prompt: &str) -> Result<String> {
        self.record(&GatewayRequest::new(
            "mock/analyze",
            vec![
                quill_core::ChatMessage::system(file_ref),
                quill_core::ChatMessage::user(prompt),
            ],
        ));
        let reply = self.next_reply();
        match reply.error {
            Some(error) => Err(QuillError::Gateway(error)),
            None => Ok(reply.text),
        }
    }
}

/// Split text into streaming pieces: fixed char counts, or words when size is 0.
fn chop(text: &str, chunk_size: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![];
    }
    if chunk_size == 0 {
        return text
            .split_inclusive(char::is_whitespace)
            .map(str::to_owned)
            .collect();
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|c| c.iter().collect())
        .collect()
}
