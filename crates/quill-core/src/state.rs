use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use std::collections::BTreeMap;
use std::fmt;

use crate::message::ChatMessage;
use crate::skill::Skill;

/// The pipeline steps. Also used as routing targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    Controller,
    Attachment,
    Writer,
    Diagram,
    Guard,
    Assembler,
    Image,
    SkillExecutor,
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepId::Controller => "controller",
            StepId::Attachment => "attachment",
            StepId::Writer => "writer",
            StepId::Diagram => "diagram",
            StepId::Guard => "guard",
            StepId::Assembler => "assembler",
            StepId::Image => "image",
            StepId::SkillExecutor => "skill_executor",
        };
        f.write_str(name)
    }
}

/// Outcome of a step's latest attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Fail,
    /// Some items succeeded, some failed (itemized in `ErrorInfo.failed_items`).
    Partial,
}

/// Machine-readable failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Preconditions not met. Never retried.
    ValidationFailed,
    /// The model misbehaved (bad output, refusal). Retryable.
    ModelError,
    /// An item-level generation failed (diagram, image).
    GenerationFailed,
    /// Assembly found unresolved placeholders or failed checks.
    AssemblyFailed,
    /// The run was cancelled mid-step. Never retried.
    Cancelled,
}

/// A single item that failed inside a batch step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemError {
    pub id: String,
    pub description: String,
    pub detail: String,
}

/// Workflow-level failure attached to the run state.
///
/// This is data, not an `Err`: the router reads it to decide retry vs
/// terminate, and `retry_guidance` is fed back into the next attempt's prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_guidance: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_items: Vec<ItemError>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_guidance: None,
            failed_items: Vec::new(),
        }
    }

    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.retry_guidance = Some(guidance.into());
        self
    }

    pub fn with_items(mut self, items: Vec<ItemError>) -> Self {
        self.failed_items = items;
        self
    }
}

/// A user-supplied file riding along with the run.
///
/// `summary == None` marks the attachment as not yet analyzed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    /// Opaque reference understood by the gateway (path, upload id, URL).
    pub file_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Value>,
}

/// A structured-content slot the writer left in the draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placeholder {
    pub id: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Mermaid,
    Html,
}

impl ArtifactKind {
    /// The fence language tag used when the artifact is embedded in the draft.
    pub fn fence_tag(&self) -> &'static str {
        match self {
            ArtifactKind::Mermaid => "mermaid",
            ArtifactKind::Html => "html",
        }
    }
}

/// Generated code destined for a placeholder slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub code: String,
    pub kind: ArtifactKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A resolved `{{image+...}}` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub placeholder: String,
    pub prompt: String,
    pub url: String,
}

/// The prompt contract a step committed to before calling the gateway.
///
/// Computed before the first call so the audit trail captures intent even
/// when the call itself fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptSpec {
    pub goal: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub materials: Vec<String>,
    pub output_format: String,
}

/// One entry in the append-only audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub step: StepId,
    pub spec: PromptSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Value>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(step: StepId, spec: PromptSpec, status: StepStatus) -> Self {
        Self {
            step,
            spec,
            outcome: None,
            status,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_outcome(mut self, outcome: Value) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// The document's accumulated variables: type, audience, outline, plan text
/// and anything else the controller or analyzers extract.
///
/// A thin wrapper over a JSON object so steps can merge arbitrary patches
/// without the core enumerating every key a prompt might produce.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocVariables(pub Map<String, Value>);

impl DocVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Shallow-merges a patch. Keys the patch does not mention survive.
    pub fn merge(&mut self, patch: Map<String, Value>) {
        for (key, value) in patch {
            self.0.insert(key, value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn doc_type(&self) -> Option<&str> {
        self.get_str("doc_type")
    }

    pub fn audience(&self) -> Option<&str> {
        self.get_str("audience")
    }

    pub fn plan_text(&self) -> Option<&str> {
        self.get_str("plan_text")
    }

    /// "chapter" (the default) or "full".
    pub fn write_mode(&self) -> &str {
        self.get_str("write_mode").unwrap_or("chapter")
    }

    pub fn outline(&self) -> Vec<String> {
        self.get("outline")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_outline(&mut self, outline: &[String]) {
        let items = outline.iter().cloned().map(Value::String).collect();
        self.set("outline", Value::Array(items));
    }

    pub fn key_points(&self) -> Vec<String> {
        self.get("key_points")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_generated_images(&mut self, images: &[GeneratedImage]) {
        let items = images
            .iter()
            .filter_map(|img| serde_json::to_value(img).ok())
            .collect();
        self.set("generated_images", Value::Array(items));
    }
}

/// The full state of a document-production run, threaded through every step.
///
/// Every field is optional or defaulted so any step tolerates a state a
/// previous step has not populated. Steps take the state by value and return
/// it with their owned fields updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    pub doc_id: Uuid,

    #[serde(default)]
    pub variables: DocVariables,
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,

    #[serde(default)]
    pub draft: String,
    #[serde(default)]
    pub diagram_placeholders: Vec<Placeholder>,
    #[serde(default)]
    pub prototype_placeholders: Vec<Placeholder>,
    #[serde(default)]
    pub artifacts: BTreeMap<String, Artifact>,
    #[serde(default)]
    pub images: Vec<GeneratedImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_output: Option<String>,

    pub current_step: StepId,
    pub step_status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub audit_log: Vec<AuditRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<Skill>>,
    #[serde(default)]
    pub ready_to_write: bool,
}

fn default_max_retries() -> u32 {
    3
}

impl RunState {
    /// A fresh state for a new run, positioned at the controller.
    pub fn new(doc_id: Uuid) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            doc_id,
            variables: DocVariables::default(),
            chat_history: Vec::new(),
            attachments: Vec::new(),
            draft: String::new(),
            diagram_placeholders: Vec::new(),
            prototype_placeholders: Vec::new(),
            artifacts: BTreeMap::new(),
            images: Vec::new(),
            final_output: None,
            current_step: StepId::Controller,
            step_status: StepStatus::Pending,
            error: None,
            retry_count: 0,
            max_retries: default_max_retries(),
            audit_log: Vec::new(),
            skills: None,
            ready_to_write: false,
        }
    }

    /// Attachments the analyzer has not processed yet.
    pub fn pending_attachments(&self) -> impl Iterator<Item = &Attachment> {
        self.attachments.iter().filter(|a| a.summary.is_none())
    }

    pub fn has_pending_attachments(&self) -> bool {
        self.pending_attachments().next().is_some()
    }

    /// Diagram and prototype placeholders with no artifact yet.
    pub fn pending_placeholders(&self) -> Vec<&Placeholder> {
        self.diagram_placeholders
            .iter()
            .chain(self.prototype_placeholders.iter())
            .filter(|p| !self.artifacts.contains_key(&p.id))
            .collect()
    }

    /// Marks a step outcome: status, error, and the audit record in one go.
    pub fn record_step(
        &mut self,
        step: StepId,
        status: StepStatus,
        spec: PromptSpec,
        outcome: Option<Value>,
        error: Option<ErrorInfo>,
    ) {
        self.current_step = step;
        self.step_status = status;
        let mut record = AuditRecord::new(step, spec, status);
        record.outcome = outcome;
        if let Some(info) = &error {
            record.error = Some(info.message.clone());
        }
        self.audit_log.push(record);
        self.error = error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn variables_merge_keeps_unmentioned_keys() {
        let mut vars = DocVariables::new();
        vars.set("doc_type", json!("report"));
        vars.set("audience", json!("executives"));

        let patch = json!({ "audience": "engineers", "tone": "formal" });
        vars.merge(patch.as_object().cloned().unwrap_or_default());

        assert_eq!(vars.doc_type(), Some("report"));
        assert_eq!(vars.audience(), Some("engineers"));
        assert_eq!(vars.get_str("tone"), Some("formal"));
    }

    #[test]
    fn write_mode_defaults_to_chapter() {
        let vars = DocVariables::new();
        assert_eq!(vars.write_mode(), "chapter");
    }

    #[test]
    fn pending_placeholders_skips_resolved() {
        let mut state = RunState::new(Uuid::new_v4());
        state.diagram_placeholders = vec![
            Placeholder {
                id: "mermaid_1".into(),
                description: "flow".into(),
            },
            Placeholder {
                id: "mermaid_2".into(),
                description: "sequence".into(),
            },
        ];
        state.artifacts.insert(
            "mermaid_1".into(),
            Artifact {
                code: "graph TD".into(),
                kind: ArtifactKind::Mermaid,
                notes: None,
            },
        );

        let pending = state.pending_placeholders();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "mermaid_2");
    }

    #[test]
    fn record_step_appends_audit_and_sets_error() {
        let mut state = RunState::new(Uuid::new_v4());
        let spec = PromptSpec {
            goal: "write the draft".into(),
            constraints: vec![],
            materials: vec![],
            output_format: "markdown".into(),
        };
        state.record_step(
            StepId::Writer,
            StepStatus::Fail,
            spec,
            None,
            Some(ErrorInfo::new(ErrorKind::ValidationFailed, "no inputs")),
        );

        assert_eq!(state.audit_log.len(), 1);
        assert_eq!(state.audit_log[0].step, StepId::Writer);
        assert_eq!(state.audit_log[0].error.as_deref(), Some("no inputs"));
        assert_eq!(state.step_status, StepStatus::Fail);
        assert!(matches!(
            state.error.as_ref().map(|e| e.kind),
            Some(ErrorKind::ValidationFailed)
        ));
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = RunState::new(Uuid::new_v4());
        state.draft = "# Title".into();
        state.chat_history.push(ChatMessage::user("hello"));

        let text = serde_json::to_string(&state).unwrap();
        let back: RunState = serde_json::from_str(&text).unwrap();
        assert_eq!(back.draft, "# Title");
        assert_eq!(back.chat_history.len(), 1);
        assert_eq!(back.max_retries, 3);
    }
}
