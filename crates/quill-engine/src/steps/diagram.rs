//! The diagram/prototype generator: turns placeholder descriptions into
//! renderable mermaid or html code, one call per pending placeholder.

use serde_json::json;
use tracing::{info, warn};

use quill_core::{
    Artifact, ArtifactKind, ChatMessage, ErrorInfo, ErrorKind, ItemError, Placeholder, PromptSpec,
    QuillError, RunState, StepId, StepStatus,
};
use quill_llm::GatewayRequest;

use crate::context::StepContext;
use crate::parse::{extract_fence, extract_json, str_field};

const MERMAID_PROMPT: &str = "You are a Mermaid diagram expert.\n\
\n\
Generate Mermaid code for the description. Standard syntax, clear and \
concise, short node labels. Output only the final code.\n\
\n\
Output JSON:\n\
{ \"code\": \"the complete Mermaid code\", \"notes\": \"optional\" }";

const HTML_PROMPT: &str = "You are an HTML prototype expert.\n\
\n\
Generate a minimal HTML prototype for the description: inline CSS only, \
layout and structure over looks, width under 800px, simple color blocks \
with text labels for each region.\n\
\n\
Output JSON:\n\
{ \"code\": \"the complete HTML, inline CSS included\", \"notes\": \"optional\" }";

pub async fn run(ctx: &StepContext, mut state: RunState) -> RunState {
    // Pending set re-derived each run: a Partial retry only redoes the
    // placeholders that still have no artifact.
    let pending: Vec<(Placeholder, ArtifactKind)> = state
        .diagram_placeholders
        .iter()
        .map(|p| (p.clone(), ArtifactKind::Mermaid))
        .chain(
            state
                .prototype_placeholders
                .iter()
                .map(|p| (p.clone(), ArtifactKind::Html)),
        )
        .filter(|(p, _)| !state.artifacts.contains_key(&p.id))
        .collect();

    let spec = PromptSpec {
        goal: format!("generate code for {} pending placeholder(s)", pending.len()),
        constraints: vec![
            "mermaid: standard syntax, clear and concise".into(),
            "html: width under 800px, layout concept only".into(),
            "failures are redone, never papered over".into(),
        ],
        materials: Vec::new(),
        output_format: "JSON: code per placeholder".into(),
    };

    if pending.is_empty() {
        state.record_step(
            StepId::Diagram,
            StepStatus::Success,
            spec,
            Some(json!({"message": "no pending placeholders"})),
            None,
        );
        return state;
    }

    let mut failed = Vec::new();
    let mut generated = 0usize;

    for (placeholder, kind) in pending {
        if ctx.cancelled() {
            let error = ErrorInfo::new(ErrorKind::Cancelled, "run cancelled");
            state.record_step(StepId::Diagram, StepStatus::Fail, spec, None, Some(error));
            return state;
        }

        match generate(ctx, &placeholder, kind).await {
            Ok(artifact) => {
                state.artifacts.insert(placeholder.id.clone(), artifact);
                generated += 1;
            }
            Err(GenerateError::Item(detail)) => {
                warn!(placeholder = %placeholder.id, %detail, "placeholder generation failed");
                failed.push(ItemError {
                    id: placeholder.id.clone(),
                    description: placeholder.description.clone(),
                    detail,
                });
            }
            Err(GenerateError::Infra(e)) => {
                warn!(error = %e, "diagram gateway call failed");
                let error = ErrorInfo::new(ErrorKind::ModelError, e.to_string())
                    .with_guidance("retry the diagram model call");
                state.record_step(StepId::Diagram, StepStatus::Fail, spec, None, Some(error));
                return state;
            }
        }
    }

    info!(generated, failed = failed.len(), "diagram generation finished");

    if failed.is_empty() {
        let outcome = json!({"generated": generated});
        state.record_step(StepId::Diagram, StepStatus::Success, spec, Some(outcome), None);
        state
    } else {
        // Generated artifacts are kept; only the failed items are redone.
        let outcome = json!({"generated": generated, "failed": failed.len()});
        let error = ErrorInfo::new(
            ErrorKind::GenerationFailed,
            format!("{} placeholder(s) failed to generate", failed.len()),
        )
        .with_guidance("regenerate the failed placeholders")
        .with_items(failed);
        state.record_step(
            StepId::Diagram,
            StepStatus::Partial,
            spec,
            Some(outcome),
            Some(error),
        );
        state
    }
}

enum GenerateError {
    /// This placeholder failed; others may still succeed.
    Item(String),
    /// The gateway itself failed; the whole step fails.
    Infra(QuillError),
}

async fn generate(
    ctx: &StepContext,
    placeholder: &Placeholder,
    kind: ArtifactKind,
) -> Result<Artifact, GenerateError> {
    let (system, task) = match kind {
        ArtifactKind::Mermaid => (MERMAID_PROMPT, "Generate the diagram"),
        ArtifactKind::Html => (HTML_PROMPT, "Generate the prototype"),
    };
    let messages = vec![
        ChatMessage::system(system),
        ChatMessage::user(format!("{}: {}", task, placeholder.description)),
    ];
    let request = GatewayRequest::new(&ctx.config.models.diagram, messages).with_limits(
        ctx.config.generation.max_tokens,
        ctx.config.generation.temperature,
    );

    let response = ctx
        .gateway
        .complete(&request)
        .await
        .map_err(GenerateError::Infra)?;

    // JSON envelope first, then a direct code fence.
    if let Some(envelope) = extract_json(&response) {
        if let Some(code) = str_field(&envelope, "code") {
            return Ok(Artifact {
                code,
                kind,
                notes: str_field(&envelope, "notes"),
            });
        }
    }
    let fence = match kind {
        ArtifactKind::Mermaid => extract_fence(&response, "mermaid"),
        ArtifactKind::Html => extract_fence(&response, "html"),
    };
    match fence {
        Some(code) => Ok(Artifact {
            code,
            kind,
            notes: None,
        }),
        None => Err(GenerateError::Item("unparsable model output".into())),
    }
}
