//! The skill executor: runs the planned skills strictly in order, streaming
//! writing output and accumulating everything into the draft. The first
//! failure aborts the remaining skills.

use serde_json::json;
use tracing::{info, warn};

use quill_core::{
    ChatMessage, ErrorInfo, ErrorKind, PromptSpec, RunEvent, RunState, Skill, SkillKind,
    SkillStatus, StepId, StepStatus,
};
use quill_engine::parse::{extract_fence, extract_json, str_field};
use quill_engine::StepContext;
use quill_llm::{GatewayRequest, StreamChunk};

use crate::planner::plan_skills;

const WRITE_SYSTEM_PROMPT: &str = "You are a document writing assistant.\n\
\n\
Execute the given writing instruction and output the Markdown text directly. \
No JSON, no wrapping the output in a code fence. Write only what the \
instruction asks for.";

pub async fn run(ctx: &StepContext, mut state: RunState) -> RunState {
    if state.skills.is_none() {
        state.skills = Some(plan_skills(ctx, &state).await);
    }
    let mut skills = state.skills.take().unwrap_or_default();

    let spec = PromptSpec {
        goal: format!("execute {} skill(s) in order", skills.len()),
        constraints: vec![
            "skills run strictly sequentially".into(),
            "the first failure aborts the remaining skills".into(),
        ],
        materials: Vec::new(),
        output_format: "Markdown draft accumulated across skills".into(),
    };

    let mut search_context: Vec<String> = Vec::new();
    let mut completed = 0usize;

    for index in 0..skills.len() {
        if skills[index].status == SkillStatus::Completed {
            completed += 1;
            continue;
        }
        if ctx.cancelled() {
            state.skills = Some(skills);
            let error = ErrorInfo::new(ErrorKind::Cancelled, "run cancelled");
            state.record_step(StepId::SkillExecutor, StepStatus::Fail, spec, None, Some(error));
            return state;
        }

        skills[index].status = SkillStatus::Running;
        let skill = skills[index].clone();
        ctx.emit(RunEvent::SkillUpdate {
            skill_id: skill.id.clone(),
            status: "running".into(),
        })
        .await;

        match execute(ctx, &skill, &mut state, &search_context).await {
            Ok(result) => {
                if let SkillResult::Search(text) = &result {
                    search_context.push(text.clone());
                }
                skills[index].result = Some(result.into_value());
                skills[index].status = SkillStatus::Completed;
                completed += 1;
                ctx.emit(RunEvent::SkillUpdate {
                    skill_id: skill.id,
                    status: "completed".into(),
                })
                .await;
            }
            Err(error) => {
                warn!(skill = %skill.id, error = %error.message, "skill failed, aborting");
                state.skills = Some(skills);
                let outcome = json!({"completed": completed, "failed_skill": skill.id});
                state.record_step(
                    StepId::SkillExecutor,
                    StepStatus::Fail,
                    spec,
                    Some(outcome),
                    Some(error),
                );
                return state;
            }
        }
    }

    info!(completed, "skill execution finished");
    state.skills = Some(skills);
    if !state.draft.trim().is_empty() {
        state.final_output = Some(state.draft.clone());
    }
    let outcome = json!({
        "completed": completed,
        "draft_chars": state.draft.chars().count(),
    });
    state.record_step(
        StepId::SkillExecutor,
        StepStatus::Success,
        spec,
        Some(outcome),
        None,
    );
    state
}

enum SkillResult {
    Search(String),
    Written { chars: usize },
    Marker(String),
    Block { lang: &'static str, chars: usize },
}

impl SkillResult {
    fn into_value(self) -> serde_json::Value {
        match self {
            SkillResult::Search(text) => json!({"findings": text}),
            SkillResult::Written { chars } => json!({"written_chars": chars}),
            SkillResult::Marker(marker) => json!({"placeholder": marker}),
            SkillResult::Block { lang, chars } => json!({"block": lang, "chars": chars}),
        }
    }
}

async fn execute(
    ctx: &StepContext,
    skill: &Skill,
    state: &mut RunState,
    search_context: &[String],
) -> Result<SkillResult, ErrorInfo> {
    match &skill.kind {
        SkillKind::SearchWeb { query, purpose } => {
            let user = format!("Research this and report the findings concisely.\n\nQuery: {query}\nPurpose: {purpose}");
            let request = GatewayRequest::new(
                &ctx.config.models.skill_planner,
                vec![ChatMessage::user(user)],
            )
            .with_limits(ctx.config.generation.max_tokens, ctx.config.generation.temperature)
            .with_search();
            let findings = ctx.gateway.complete(&request).await.map_err(|e| {
                ErrorInfo::new(ErrorKind::ModelError, e.to_string())
                    .with_guidance("retry the search call")
            })?;
            Ok(SkillResult::Search(findings))
        }

        SkillKind::WriteText { instruction } => {
            let text = write_text(ctx, instruction, &state.draft, search_context).await?;
            let chars = text.chars().count();
            append(&mut state.draft, &text);
            Ok(SkillResult::Written { chars })
        }

        SkillKind::GenerateImage { prompt, placement } => {
            // Only the marker goes in; the image step resolves it later.
            let marker = format!("{{{{image+{}}}}}", prompt);
            let line = if placement.trim().is_empty() {
                marker.clone()
            } else {
                format!("<!-- {} -->\n{}", placement.trim(), marker)
            };
            append(&mut state.draft, &line);
            Ok(SkillResult::Marker(marker))
        }

        SkillKind::CreateChart {
            chart_type,
            instruction,
        } => {
            let code = generate_code(
                ctx,
                "mermaid",
                &format!("Produce a {chart_type} chart in mermaid syntax.\n\n{instruction}"),
            )
            .await?;
            let chars = code.chars().count();
            append(&mut state.draft, &format!("```mermaid\n{code}\n```"));
            Ok(SkillResult::Block {
                lang: "mermaid",
                chars,
            })
        }

        SkillKind::CreateUi { instruction } => {
            let code = generate_code(
                ctx,
                "html",
                &format!("Produce a self-contained HTML fragment.\n\n{instruction}"),
            )
            .await?;
            let chars = code.chars().count();
            append(&mut state.draft, &format!("```html\n{code}\n```"));
            Ok(SkillResult::Block {
                lang: "html",
                chars,
            })
        }
    }
}

/// One streaming writing call; content is forwarded to observers.
async fn write_text(
    ctx: &StepContext,
    instruction: &str,
    draft: &str,
    search_context: &[String],
) -> Result<String, ErrorInfo> {
    let tail = draft_tail(draft, ctx.config.generation.draft_tail_chars);
    let context = if search_context.is_empty() {
        String::new()
    } else {
        format!(
            "Research findings:\n{}\n\n",
            search_context.join("\n---\n")
        )
    };
    let user = format!(
        "{instruction}\n\n{context}Already written (for continuity only, do not repeat):\n{tail}"
    );
    let messages = vec![
        ChatMessage::system(WRITE_SYSTEM_PROMPT),
        ChatMessage::user(user),
    ];
    let request = GatewayRequest::new(&ctx.config.models.writer, messages).with_limits(
        ctx.config.generation.max_tokens,
        ctx.config.generation.temperature,
    );

    let mut rx = ctx.gateway.stream(&request).await.map_err(|e| {
        ErrorInfo::new(ErrorKind::ModelError, e.to_string())
            .with_guidance("retry the writing call")
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
                    .with_guidance("retry the writing call"));
            }
            StreamChunk::Done => break,
        }
    }
    Ok(text)
}

/// One completion call for a code artifact; accepts a JSON `{code}` envelope
/// or a fenced block.
async fn generate_code(ctx: &StepContext, lang: &str, prompt: &str) -> Result<String, ErrorInfo> {
    let user = format!(
        "{prompt}\n\nOutput strict JSON: {{ \"code\": \"the {lang} code, no fence\" }}"
    );
    let request = GatewayRequest::new(
        &ctx.config.models.diagram,
        vec![ChatMessage::user(user)],
    )
    .with_limits(ctx.config.generation.max_tokens, ctx.config.generation.temperature);

    let response = ctx.gateway.complete(&request).await.map_err(|e| {
        ErrorInfo::new(ErrorKind::ModelError, e.to_string())
            .with_guidance("retry the generation call")
    })?;

    extract_json(&response)
        .and_then(|v| str_field(&v, "code"))
        .or_else(|| extract_fence(&response, lang))
        .ok_or_else(|| {
            ErrorInfo::new(
                ErrorKind::ModelError,
                format!("no usable {lang} code in the model output"),
            )
            .with_guidance("retry the generation call")
        })
}

/// Blank line between accumulated pieces.
fn append(draft: &mut String, piece: &str) {
    if !draft.is_empty() {
        draft.push_str("\n\n");
    }
    draft.push_str(piece);
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
    fn append_separates_with_a_blank_line() {
        let mut draft = String::new();
        append(&mut draft, "first");
        append(&mut draft, "second");
        assert_eq!(draft, "first\n\nsecond");
    }

    #[test]
    fn tail_is_char_safe() {
        assert_eq!(draft_tail("hello", 3), "llo");
        assert_eq!(draft_tail("中文内容", 2), "内容");
    }
}
