//! The writer: produces the Markdown draft, one streaming call per chapter
//! when an outline exists, and extracts the structured-content placeholders
//! the later steps resolve.

use serde_json::json;
use tracing::{info, warn};

use quill_core::{
    ChatMessage, ErrorInfo, ErrorKind, PromptSpec, RunEvent, RunState, StepId, StepStatus,
};
use quill_llm::{GatewayRequest, StreamChunk};

use crate::context::StepContext;
use crate::placeholder::extract_placeholders;

const SYSTEM_PROMPT: &str = "You are a document writing assistant.\n\
\n\
Write the Markdown body directly from the document variables and reference \
material. No JSON, no wrapping the output in a code fence.\n\
\n\
You may mark structured content:\n\
- a diagram slot: `{{MERMAID:description}}`\n\
- a prototype slot: `{{HTML:description}}`\n\
- an illustration: `{{image+prompt}}` with a prompt an image model can use directly\n\
\n\
Rules:\n\
1. Clear structure, rigorous logic; the goal is to explain one thing well.\n\
2. You may fill in unspecified details, but mark them as assumptions in the text.\n\
3. Write only from the provided information.";

pub async fn run(ctx: &StepContext, mut state: RunState) -> RunState {
    let vars = &state.variables;
    let has_inputs = vars.doc_type().is_some()
        || !vars.outline().is_empty()
        || vars.plan_text().map(|p| !p.trim().is_empty()).unwrap_or(false);

    let spec = prompt_spec(&state);

    // Precondition: something to write from. Zero gateway calls otherwise.
    if !has_inputs {
        let error = ErrorInfo::new(
            ErrorKind::ValidationFailed,
            "not enough to write from: need a document type, an outline, or a plan",
        )
        .with_guidance("go back to the conversation and pin down the document first");
        state.record_step(StepId::Writer, StepStatus::Fail, spec, None, Some(error));
        return state;
    }

    let outline = state.variables.outline();
    let chapter_mode = !outline.is_empty() && state.variables.write_mode() != "full";
    info!(
        mode = if chapter_mode { "chapter" } else { "full" },
        chapters = outline.len(),
        "writer starting"
    );

    let draft = if chapter_mode {
        match write_chapters(ctx, &state, &outline).await {
            Ok(draft) => draft,
            Err(error) => {
                state.record_step(StepId::Writer, StepStatus::Fail, spec, None, Some(error));
                return state;
            }
        }
    } else {
        match write_full(ctx, &state).await {
            Ok(draft) => draft,
            Err(error) => {
                state.record_step(StepId::Writer, StepStatus::Fail, spec, None, Some(error));
                return state;
            }
        }
    };

    // Placeholders are regenerated wholesale; artifacts and images from a
    // previous draft no longer correspond to anything.
    let (mermaid, html) = extract_placeholders(&draft);
    state.draft = draft;
    state.diagram_placeholders = mermaid;
    state.prototype_placeholders = html;
    state.artifacts.clear();
    state.images.clear();
    state.final_output = None;

    let outcome = json!({
        "draft_chars": state.draft.chars().count(),
        "diagram_placeholders": state.diagram_placeholders.len(),
        "prototype_placeholders": state.prototype_placeholders.len(),
    });
    state.record_step(StepId::Writer, StepStatus::Success, spec, Some(outcome), None);
    state
}

fn prompt_spec(state: &RunState) -> PromptSpec {
    PromptSpec {
        goal: format!(
            "write the draft: {}",
            state.variables.doc_type().unwrap_or("untitled document")
        ),
        constraints: vec![
            format!(
                "audience: {}",
                state.variables.audience().unwrap_or("unspecified")
            ),
            "write only from the provided information".into(),
            "structured content goes in placeholders".into(),
        ],
        materials: state
            .attachments
            .iter()
            .filter_map(|a| a.summary.clone())
            .collect(),
        output_format: "Markdown draft with placeholders".into(),
    }
}

async fn write_chapters(
    ctx: &StepContext,
    state: &RunState,
    outline: &[String],
) -> Result<String, ErrorInfo> {
    let plan = state.variables.plan_text().unwrap_or_default().to_string();
    let mut draft = String::new();

    for (index, title) in outline.iter().enumerate() {
        if ctx.cancelled() {
            return Err(ErrorInfo::new(ErrorKind::Cancelled, "run cancelled"));
        }
        ctx.emit(RunEvent::ChapterUpdate {
            index,
            title: title.clone(),
        })
        .await;

        let tail = draft_tail(&draft, ctx.config.generation.draft_tail_chars);
        let user = format!(
            "Write only chapter {n}, \"{title}\" (Markdown).\n\
             \n\
             Requirements:\n\
             - open with a second-level heading: ## {title}\n\
             - write this chapter only, no other chapters\n\
             - diagrams as mermaid code blocks, illustrations as {{{{image+prompt}}}} if needed\n\
             \n\
             Plan (for constraints and key points):\n{plan}\n\
             \n\
             Already written (for style continuity only, do not repeat):\n{tail}",
            n = index + 1,
        );
        let messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)];
        let chapter = stream_draft(ctx, messages).await?;
        draft.push_str(&chapter);

        // Blank line between chapters.
        draft.push_str("\n\n");
        ctx.emit(RunEvent::StreamContent {
            content: "\n\n".into(),
        })
        .await;
    }
    Ok(draft)
}

async fn write_full(ctx: &StepContext, state: &RunState) -> Result<String, ErrorInfo> {
    let variables =
        serde_json::to_string_pretty(&state.variables).unwrap_or_else(|_| "{}".into());
    let materials: Vec<String> = state
        .attachments
        .iter()
        .filter_map(|a| a.summary.clone())
        .collect();
    let user = format!(
        "Write the document draft from this information.\n\
         \n\
         Document variables:\n```json\n{variables}\n```\n\
         \n\
         {materials}\
         Plan:\n{plan}\n\
         \n\
         Output the Markdown draft directly.",
        materials = if materials.is_empty() {
            String::new()
        } else {
            format!("Reference material:\n{}\n\n", materials.join("\n---\n"))
        },
        plan = state.variables.plan_text().unwrap_or_default(),
    );
    let messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)];
    stream_draft(ctx, messages).await
}

/// One streaming call; content chunks are forwarded to observers and
/// accumulated. Thinking is discarded for the writer.
async fn stream_draft(ctx: &StepContext, messages: Vec<ChatMessage>) -> Result<String, ErrorInfo> {
    let request = GatewayRequest::new(&ctx.config.models.writer, messages).with_limits(
        ctx.config.generation.max_tokens,
        ctx.config.generation.temperature,
    );

    if ctx.cancelled() {
        return Err(ErrorInfo::new(ErrorKind::Cancelled, "run cancelled"));
    }
    let mut rx = ctx.gateway.stream(&request).await.map_err(|e| {
        warn!(error = %e, "writer stream request failed");
        ErrorInfo::new(ErrorKind::ModelError, e.to_string())
            .with_guidance("retry the writer model call")
    })?;

    let mut text = String::new();
    while let Some(chunk) = rx.recv().await {
        if ctx.cancelled() {
            return Err(ErrorInfo::new(ErrorKind::Cancelled, "run cancelled"));
        }
        match chunk {
            StreamChunk::Thinking(_) => {}
            StreamChunk::Content(content) => {
                text.push_str(&content);
                ctx.emit(RunEvent::StreamContent { content }).await;
            }
            StreamChunk::ToolCall(_) => {}
            StreamChunk::Error(message) => {
                return Err(ErrorInfo::new(ErrorKind::ModelError, message)
                    .with_guidance("retry the writer model call"));
            }
            StreamChunk::Done => break,
        }
    }
    Ok(text)
}

/// The last `chars` characters of the draft, on a char boundary.
fn draft_tail(draft: &str, chars: usize) -> &str {
    let total = draft.chars().count();
    if total <= chars {
        return draft;
    }
    let skip = total - chars;
    match draft.char_indices().nth(skip) {
        Some((i, _)) => &draft[i..],
        None => draft,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_is_char_safe() {
        assert_eq!(draft_tail("hello", 10), "hello");
        assert_eq!(draft_tail("hello", 3), "llo");
        assert_eq!(draft_tail("中文内容测试", 2), "测试");
    }
}
