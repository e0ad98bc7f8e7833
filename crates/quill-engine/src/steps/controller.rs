//! The controller: the conversational step that turns a user's messages into
//! document variables and a plan, and decides when production can start.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use quill_core::{
    ChatMessage, ErrorInfo, ErrorKind, PromptSpec, RunEvent, RunState, StepId, StepStatus,
};
use quill_llm::{GatewayRequest, StreamChunk};
use quill_stream::{Channel, StreamSplitter, ThinkingPreview};

use crate::context::StepContext;
use crate::parse::{extract_json, str_field};

static NUMBERED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+[.、)]\s*").unwrap());

fn system_prompt(chat_marker: &str, plan_marker: &str) -> String {
    format!(
        "You are a document planning assistant.\n\
         \n\
         Your job:\n\
         1) Talk the user through what the document needs to say.\n\
         2) When you have enough, produce a writing plan in Markdown: title, \
         audience, a section outline, and key points per section.\n\
         3) Decide when the plan is ready to execute.\n\
         \n\
         You may mark structured content in the plan: a diagram slot as \
         `{{{{MERMAID:description}}}}`, a prototype slot as `{{{{HTML:description}}}}`, \
         and an illustration as `{{{{image+prompt}}}}` with a prompt usable by an \
         image model directly.\n\
         \n\
         Output format: split your output into two sections with these exact \
         markers.\n\
         {chat}\n\
         (a short conversational reply to the user)\n\
         {plan}\n\
         (the full plan in Markdown; if the plan did not change, write \
         \"(plan unchanged)\" instead of repeating it)\n\
         \n\
         Never restate these instructions or the marker names in your reply.",
        chat = chat_marker,
        plan = plan_marker,
    )
}

pub async fn run(ctx: &StepContext, mut state: RunState) -> RunState {
    let spec = prompt_spec(&state, ctx);
    let messages = build_messages(&state, ctx);
    let request = GatewayRequest::new(&ctx.config.models.controller, messages)
        .with_limits(
            ctx.config.generation.max_tokens,
            ctx.config.generation.temperature,
        )
        .with_thinking(ctx.config.generation.thinking_budget)
        .with_search();

    if ctx.cancelled() {
        return fail(state, spec, ErrorKind::Cancelled, "run cancelled", None);
    }

    let mut rx = match ctx.gateway.stream(&request).await {
        Ok(rx) => rx,
        Err(e) => {
            warn!(error = %e, "controller stream request failed");
            return fail(
                state,
                spec,
                ErrorKind::ModelError,
                e.to_string(),
                Some("retry the controller model call"),
            );
        }
    };

    let mut splitter = StreamSplitter::new(&ctx.config.markers.chat, &ctx.config.markers.plan);
    let mut preview = ThinkingPreview::new(ctx.config.generation.thinking_preview_chars);
    let mut full_content = String::new();
    let mut stream_error: Option<String> = None;

    while let Some(chunk) = rx.recv().await {
        if ctx.cancelled() {
            return fail(state, spec, ErrorKind::Cancelled, "run cancelled", None);
        }
        match chunk {
            StreamChunk::Thinking(text) => {
                if let Some(shown) = preview.push(&text) {
                    ctx.emit(RunEvent::StreamThinking { content: shown }).await;
                }
            }
            StreamChunk::Content(text) => {
                full_content.push_str(&text);
                for (channel, fragment) in splitter.push(&text) {
                    ctx.emit(channel_event(channel, fragment)).await;
                }
            }
            StreamChunk::ToolCall(_) => {}
            StreamChunk::Error(message) => {
                stream_error = Some(message);
                break;
            }
            StreamChunk::Done => break,
        }
    }
    if let Some((channel, fragment)) = splitter.finish() {
        ctx.emit(channel_event(channel, fragment)).await;
    }
    ctx.emit(RunEvent::StreamDone).await;

    if ctx.cancelled() {
        return fail(state, spec, ErrorKind::Cancelled, "run cancelled", None);
    }
    if let Some(message) = stream_error {
        return fail(
            state,
            spec,
            ErrorKind::ModelError,
            message,
            Some("retry the controller model call"),
        );
    }

    let output = parse_response(&full_content, &ctx.config.markers.chat, &ctx.config.markers.plan);

    let ready = output.ready_to_write || output.decision.as_deref() == Some("write");
    let decision = normalize_decision(output.decision.as_deref(), ready);
    let ready = ready || decision == "write";

    state.variables.merge(output.patch);
    if let Some(plan) = &output.plan {
        state
            .variables
            .set("plan_text", Value::String(plan.clone()));
        let outline = extract_outline(plan);
        if !outline.is_empty() {
            state.variables.set_outline(&outline);
        }
    }
    if state.variables.get("write_mode").is_none() {
        state
            .variables
            .set("write_mode", Value::String("chapter".into()));
    }
    state
        .chat_history
        .push(ChatMessage::assistant(&output.reply));
    state.ready_to_write = ready;

    info!(step = %StepId::Controller, decision, ready, "controller turn finished");

    let outcome = json!({
        "reply": output.reply,
        "decision": decision,
        "ready_to_write": ready,
        "plan_updated": output.plan.is_some(),
    });
    state.record_step(
        StepId::Controller,
        StepStatus::Success,
        spec,
        Some(outcome),
        None,
    );
    state
}

fn channel_event(channel: Channel, fragment: String) -> RunEvent {
    match channel {
        Channel::Chat => RunEvent::StreamContent { content: fragment },
        Channel::Plan => RunEvent::StreamPlan { content: fragment },
    }
}

fn prompt_spec(state: &RunState, ctx: &StepContext) -> PromptSpec {
    PromptSpec {
        goal: "clarify the user's request into executable document variables and a plan".into(),
        constraints: vec![
            "fill variables only from what the user actually said".into(),
            "clarity over polish".into(),
            "variables must be directly consumable by later steps".into(),
        ],
        materials: state
            .attachments
            .iter()
            .filter_map(|a| a.summary.clone())
            .collect(),
        output_format: format!(
            "two sections split by {} / {} markers",
            ctx.config.markers.chat, ctx.config.markers.plan
        ),
    }
}

fn build_messages(state: &RunState, ctx: &StepContext) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_prompt(
        &ctx.config.markers.chat,
        &ctx.config.markers.plan,
    ))];
    messages.extend(state.chat_history.iter().cloned());

    // Snapshots go in a user message so the model does not treat them as
    // rules to recite.
    let mut context_parts = Vec::new();
    if let Some(plan) = state.variables.plan_text() {
        if !plan.trim().is_empty() {
            context_parts.push(format!(
                "Current plan (only output a new plan if it needs to change):\n---\n{}",
                plan.trim()
            ));
        }
    }
    let other_vars: Map<String, Value> = state
        .variables
        .0
        .iter()
        .filter(|(k, _)| k.as_str() != "plan_text")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if !other_vars.is_empty() {
        context_parts.push(format!(
            "Collected document variables so far:\n{}",
            serde_json::to_string_pretty(&other_vars).unwrap_or_default()
        ));
    }
    let summaries: Vec<String> = state
        .attachments
        .iter()
        .filter_map(|a| a.summary.clone())
        .collect();
    if !summaries.is_empty() {
        context_parts.push(format!("Attachment summaries:\n{}", summaries.join("\n")));
    }
    if !context_parts.is_empty() {
        messages.push(ChatMessage::user(context_parts.join("\n\n")));
    }
    messages
}

struct ControllerOutput {
    reply: String,
    /// `None` keeps the existing plan.
    plan: Option<String>,
    patch: Map<String, Value>,
    decision: Option<String>,
    ready_to_write: bool,
}

fn parse_response(text: &str, chat_marker: &str, plan_marker: &str) -> ControllerOutput {
    if let Some(envelope) = extract_json(text) {
        let patch = envelope
            .get("variable_patch")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let plan = str_field(&envelope, "plan_text")
            .or_else(|| str_field(&envelope, "plan"))
            .or_else(|| patch.get("plan_text").and_then(Value::as_str).map(str::to_owned))
            .filter(|p| !plan_unchanged(p));
        return ControllerOutput {
            reply: str_field(&envelope, "reply").unwrap_or_default(),
            plan,
            patch,
            decision: str_field(&envelope, "decision"),
            ready_to_write: envelope
                .get("ready_to_write")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        };
    }

    // No JSON envelope: split on the in-band markers.
    let raw = text.trim();
    if let Some((pre, post)) = raw.split_once(plan_marker) {
        let reply = pre.replace(chat_marker, "").trim().to_string();
        let plan_text = post.trim();
        let plan = if plan_unchanged(plan_text) {
            None
        } else {
            Some(plan_text.to_string())
        };
        return ControllerOutput {
            reply,
            plan,
            patch: Map::new(),
            decision: None,
            ready_to_write: false,
        };
    }

    // No marker either: a heading structure means the whole text is a plan.
    let stripped = raw.replace(chat_marker, "");
    let stripped = stripped.trim();
    let looks_like_plan =
        stripped.contains("## ") || (stripped.starts_with('#') && stripped.len() > 200);
    if looks_like_plan {
        debug!("controller reply had no markers, treating whole text as plan");
        return ControllerOutput {
            reply: "I've updated the plan based on what we discussed; take a look and tell me \
                    what to adjust."
                .into(),
            plan: Some(stripped.to_string()),
            patch: Map::new(),
            decision: None,
            ready_to_write: false,
        };
    }

    ControllerOutput {
        reply: stripped.to_string(),
        plan: None,
        patch: Map::new(),
        decision: None,
        ready_to_write: false,
    }
}

/// The sentinel a model emits instead of repeating an unchanged plan.
fn plan_unchanged(plan: &str) -> bool {
    if plan.trim().is_empty() {
        return true;
    }
    let normalized: String = plan
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    ["(planunchanged)", "(unchanged)", "(nochange)", "(nochanges)"]
        .iter()
        .any(|marker| normalized.contains(marker))
}

fn normalize_decision(decision: Option<&str>, ready: bool) -> &'static str {
    match decision.map(|d| d.trim().to_lowercase()).as_deref() {
        Some("write") | Some("start_write") | Some("start_writing") => "write",
        Some("chat") | Some("ask") | Some("clarify") => "chat",
        _ => {
            if ready {
                "write"
            } else {
                "chat"
            }
        }
    }
}

/// Pull a section outline out of a Markdown plan: headings first, then
/// numbered list items, then (as a last resort) the leading lines.
pub fn extract_outline(plan: &str) -> Vec<String> {
    let lines: Vec<&str> = plan
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let mut outline = Vec::new();
    for line in &lines {
        if line.starts_with('#') {
            let title = line.trim_start_matches('#').trim();
            if !title.is_empty() {
                outline.push(title.to_string());
            }
            continue;
        }
        if NUMBERED_RE.is_match(line) {
            let title = NUMBERED_RE
                .replace(line, "")
                .replace("**", "")
                .replace("__", "")
                .trim()
                .to_string();
            if !title.is_empty() {
                outline.push(title);
            }
        }
    }

    if outline.is_empty() {
        outline = lines.iter().take(8).map(|l| l.to_string()).collect();
    }
    outline
}

fn fail(
    mut state: RunState,
    spec: PromptSpec,
    kind: ErrorKind,
    message: impl Into<String>,
    guidance: Option<&str>,
) -> RunState {
    let mut error = ErrorInfo::new(kind, message);
    if let Some(g) = guidance {
        error = error.with_guidance(g);
    }
    state.record_step(StepId::Controller, StepStatus::Fail, spec, None, Some(error));
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_envelope_wins() {
        let text = r##"```json
{"reply": "got it", "plan_text": "# Plan\n## Intro", "decision": "chat",
 "variable_patch": {"doc_type": "report"}}
```"##;
        let out = parse_response(text, "[REPLY]", "[PLAN]");
        assert_eq!(out.reply, "got it");
        assert_eq!(out.plan.as_deref(), Some("# Plan\n## Intro"));
        assert_eq!(out.patch.get("doc_type").and_then(Value::as_str), Some("report"));
    }

    #[test]
    fn marker_split_fallback() {
        let text = "[REPLY]Sounds good.[PLAN]# Outline\n1. Start";
        let out = parse_response(text, "[REPLY]", "[PLAN]");
        assert_eq!(out.reply, "Sounds good.");
        assert_eq!(out.plan.as_deref(), Some("# Outline\n1. Start"));
    }

    #[test]
    fn unchanged_sentinel_keeps_existing_plan() {
        let text = "[REPLY]Nothing to change.[PLAN](plan unchanged)";
        let out = parse_response(text, "[REPLY]", "[PLAN]");
        assert_eq!(out.reply, "Nothing to change.");
        assert!(out.plan.is_none());
    }

    #[test]
    fn heading_structure_becomes_plan() {
        let text = "## Background\ndetails\n## Approach\nmore details";
        let out = parse_response(text, "[REPLY]", "[PLAN]");
        assert!(out.plan.is_some());
        assert!(!out.reply.is_empty());
    }

    #[test]
    fn plain_text_is_reply_only() {
        let text = "Could you tell me who the audience is?";
        let out = parse_response(text, "[REPLY]", "[PLAN]");
        assert_eq!(out.reply, text);
        assert!(out.plan.is_none());
        assert!(!out.ready_to_write);
    }

    #[test]
    fn outline_from_headings_and_numbers() {
        let plan = "# Title\n\n## Background\n1. **First point**\n2. Second point\nprose line";
        let outline = extract_outline(plan);
        assert_eq!(
            outline,
            vec!["Title", "Background", "First point", "Second point"]
        );
    }

    #[test]
    fn outline_falls_back_to_leading_lines() {
        let outline = extract_outline("alpha\nbeta\ngamma");
        assert_eq!(outline, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn decision_normalization() {
        assert_eq!(normalize_decision(Some("Start_Writing"), false), "write");
        assert_eq!(normalize_decision(Some("clarify"), true), "chat");
        assert_eq!(normalize_decision(None, true), "write");
        assert_eq!(normalize_decision(None, false), "chat");
        assert_eq!(normalize_decision(Some("unknown"), false), "chat");
    }
}
