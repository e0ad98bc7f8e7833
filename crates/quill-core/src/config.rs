use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{QuillError, Result};

/// Root configuration — maps to `quill.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuillConfig {
    pub models: ModelsConfig,
    pub generation: GenerationConfig,
    pub pipeline: PipelineConfig,
    pub markers: MarkerConfig,
}

// ── Models ─────────────────────────────────────────────────────

/// Model identifier per step. No provider protocol is assumed; the
/// gateway interprets the names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub controller: String,
    pub attachment: String,
    pub writer: String,
    pub diagram: String,
    pub guard: String,
    pub assembler: String,
    pub image: String,
    pub skill_planner: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            controller: "default/reasoning".into(),
            attachment: "default/fast".into(),
            writer: "default/long-form".into(),
            diagram: "default/fast".into(),
            guard: "default/fast".into(),
            assembler: "default/fast".into(),
            image: "default/image".into(),
            skill_planner: "default/fast".into(),
        }
    }
}

// ── Generation ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Maximum tokens per completion.
    pub max_tokens: u32,
    /// Temperature (0.0 - 2.0).
    pub temperature: f32,
    /// Thinking token budget for reasoning-capable models. 0 disables thinking.
    pub thinking_budget: u32,
    /// Cap on the thinking characters streamed to observers per run.
    pub thinking_preview_chars: usize,
    /// Tail of the prior draft passed to the next chapter for style continuity.
    pub draft_tail_chars: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 16384,
            temperature: 0.7,
            thinking_budget: 4096,
            thinking_preview_chars: 1000,
            draft_tail_chars: 2000,
        }
    }
}

// ── Pipeline ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Retry budget per step instance. A step is attempted at most
    /// `max_retries + 1` times before the router terminates.
    pub max_retries: u32,
    /// Capacity of the per-run progress channel.
    pub event_buffer: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            event_buffer: 256,
        }
    }
}

// ── Markers ────────────────────────────────────────────────────

/// In-band channel-switch markers the controller model emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerConfig {
    pub chat: String,
    pub plan: String,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            chat: "[REPLY]".into(),
            plan: "[PLAN]".into(),
        }
    }
}

// ── Loading ────────────────────────────────────────────────────

impl QuillConfig {
    /// Load from a TOML file, falling back to defaults when absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| QuillError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.generation.temperature) {
            return Err(QuillError::Config(format!(
                "temperature {} is out of range",
                self.generation.temperature
            )));
        }
        if self.generation.max_tokens == 0 {
            return Err(QuillError::Config("max_tokens must be positive".into()));
        }
        if self.markers.chat.is_empty() || self.markers.plan.is_empty() {
            return Err(QuillError::Config("markers must be non-empty".into()));
        }
        if self.markers.chat == self.markers.plan {
            return Err(QuillError::Config("chat and plan markers must differ".into()));
        }
        Ok(())
    }
}
