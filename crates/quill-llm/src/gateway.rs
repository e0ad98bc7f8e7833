use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use quill_core::{ChatMessage, Result};

/// A request to the model gateway.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    /// The model to use, interpreted by the gateway implementation.
    pub model: String,
    /// Conversation history, system prompt included as the first message.
    pub messages: Vec<ChatMessage>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Temperature.
    pub temperature: f32,
    /// Extended reasoning budget.
    pub thinking: Thinking,
    /// Whether the model may use web search.
    pub search: bool,
}

impl GatewayRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: 16384,
            temperature: 0.7,
            thinking: Thinking::Off,
            search: false,
        }
    }

    pub fn with_thinking(mut self, budget: u32) -> Self {
        self.thinking = if budget == 0 {
            Thinking::Off
        } else {
            Thinking::Budget(budget)
        };
        self
    }

    pub fn with_search(mut self) -> Self {
        self.search = true;
        self
    }

    pub fn with_limits(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Thinking {
    Off,
    Budget(u32),
}

/// A completion that separates the model's reasoning from its answer.
#[derive(Debug, Clone)]
pub struct Reasoned {
    pub reasoning: Option<String>,
    pub text: String,
}

/// A chunk of a streaming response.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// Reasoning text (surfaced to observers as a capped preview).
    Thinking(String),
    /// Content text delta.
    Content(String),
    /// A structured tool invocation the model decided on.
    ToolCall(Value),
    /// An error occurred mid-stream.
    Error(String),
    /// Stream is done.
    Done,
}

/// The seam between the pipeline and any model vendor.
///
/// No vendor protocol, model naming scheme, or token format leaks past this
/// trait; steps speak only in [`GatewayRequest`] and [`StreamChunk`].
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Human-readable gateway name.
    fn name(&self) -> &str;

    /// Send a non-streaming request, returning the full text.
    async fn complete(&self, request: &GatewayRequest) -> Result<String>;

    /// Send a non-streaming request, keeping reasoning separate from the answer.
    async fn complete_with_reasoning(&self, request: &GatewayRequest) -> Result<Reasoned>;

    /// Send a streaming request. Returns a receiver for chunks.
    async fn stream(
        &self,
        request: &GatewayRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<StreamChunk>>;

    /// Generate one or more images for a prompt, returning their URLs.
    async fn generate_image(&self, model: &str, prompt: &str) -> Result<Vec<String>>;

    /// Analyze an uploaded file, returning the model's raw text response.
    async fn analyze_file(&self, model: &str, file_ref: &str, prompt: &str) -> Result<String>;
}
