//! The attachment analyzer: summarizes user uploads into writing material
//! and variable patches.

use serde_json::{json, Map, Value};
use tracing::{info, warn};

use quill_core::{ErrorInfo, ErrorKind, PromptSpec, RunState, StepId, StepStatus};

use crate::context::StepContext;
use crate::parse::{extract_json, str_field};

const ANALYSIS_PROMPT: &str = "Analyze the attached file and extract what is useful for \
writing a document about it.\n\
\n\
Output JSON:\n\
{\n\
  \"summary\": \"a writing-oriented summary, bulleted key points\",\n\
  \"variable_patch\": { \"...\": \"facts usable as document variables\" },\n\
  \"citations\": [ \"page/section references where applicable\" ]\n\
}\n\
\n\
Rules: only extract what is actually in the file, never invent; keep the \
output structured.";

pub async fn run(ctx: &StepContext, mut state: RunState) -> RunState {
    let pending: Vec<String> = state.pending_attachments().map(|a| a.id.clone()).collect();

    let spec = PromptSpec {
        goal: format!("analyze {} pending attachment(s)", pending.len()),
        constraints: vec![
            "only extract information actually present in the file".into(),
            "structured output, usable as variables".into(),
        ],
        materials: Vec::new(),
        output_format: "JSON: summary + variable_patch + citations".into(),
    };

    if pending.is_empty() {
        state.record_step(
            StepId::Attachment,
            StepStatus::Success,
            spec,
            Some(json!({"message": "no pending attachments"})),
            None,
        );
        return state;
    }

    let mut merged_patch = Map::new();
    let mut analyzed = 0usize;

    for index in 0..state.attachments.len() {
        if state.attachments[index].summary.is_some() {
            continue;
        }
        if ctx.cancelled() {
            let error = ErrorInfo::new(ErrorKind::Cancelled, "run cancelled");
            state.record_step(StepId::Attachment, StepStatus::Fail, spec, None, Some(error));
            return state;
        }

        let attachment = &state.attachments[index];
        let prompt = format!("{}\n\nFile: {}", ANALYSIS_PROMPT, attachment.filename);
        let response = ctx
            .gateway
            .analyze_file(&ctx.config.models.attachment, &attachment.file_ref, &prompt)
            .await;

        let raw = match response {
            Ok(raw) => raw,
            Err(e) => {
                warn!(attachment = %attachment.id, error = %e, "attachment analysis failed");
                let error = ErrorInfo::new(ErrorKind::ModelError, e.to_string())
                    .with_guidance("retry the file analysis call");
                state.record_step(StepId::Attachment, StepStatus::Fail, spec, None, Some(error));
                return state;
            }
        };

        // Unparsable output degrades to a plain-text summary.
        let (summary, analysis, patch) = match extract_json(&raw) {
            Some(envelope) => {
                let summary = str_field(&envelope, "summary").unwrap_or_else(|| raw.clone());
                let patch = envelope
                    .get("variable_patch")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                (summary, Some(envelope), patch)
            }
            None => (raw, None, Map::new()),
        };

        let attachment = &mut state.attachments[index];
        attachment.summary = Some(summary);
        attachment.analysis = analysis;
        merged_patch.extend(patch);
        analyzed += 1;
    }

    state.variables.merge(merged_patch.clone());
    info!(analyzed, "attachment analysis finished");

    let outcome = json!({
        "analyzed": analyzed,
        "variable_patch": Value::Object(merged_patch),
    });
    state.record_step(
        StepId::Attachment,
        StepStatus::Success,
        spec,
        Some(outcome),
        None,
    );
    state
}
