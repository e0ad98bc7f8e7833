//! The code-block guard: one batched check over every fenced mermaid/html
//! block in the draft, applying positional fixes to block bodies only.

use serde_json::{json, Value};
use tracing::{info, warn};

use quill_core::{
    ChatMessage, ErrorInfo, ErrorKind, PromptSpec, RunState, StepId, StepStatus,
};
use quill_llm::GatewayRequest;

use crate::context::StepContext;
use crate::parse::extract_json;
use crate::placeholder::{html_blocks, mermaid_blocks, replace_block_body, BlockKind};

const SYSTEM_PROMPT: &str = "You are a code-block proofreader for documents.\n\
\n\
Check the given mermaid and html code blocks for renderability. Touch \
nothing but the code blocks.\n\
\n\
Output strict JSON, no Markdown, no explanation. Either:\n\
{ \"ok\": true }\n\
or:\n\
{ \"ok\": false,\n\
  \"mermaid_fixes\": [ { \"index\": 0, \"code\": \"fixed code, no fence\" } ],\n\
  \"html_fixes\":    [ { \"index\": 0, \"code\": \"fixed code, no fence\" } ] }\n\
\n\
Indices refer to the block order you were given.";

pub async fn run(ctx: &StepContext, mut state: RunState) -> RunState {
    // After assembly the artifacts live in the final output; before it (or
    // on the skill path) they live in the draft.
    let text = state
        .final_output
        .clone()
        .unwrap_or_else(|| state.draft.clone());
    let mermaid = mermaid_blocks(&text);
    let html = html_blocks(&text);

    let spec = PromptSpec {
        goal: format!(
            "proofread {} mermaid and {} html block(s)",
            mermaid.len(),
            html.len()
        ),
        constraints: vec![
            "only code blocks may change".into(),
            "skip entirely when there is nothing to check".into(),
        ],
        materials: Vec::new(),
        output_format: "JSON: ok / mermaid_fixes / html_fixes".into(),
    };

    // Nothing to check: success without a gateway call.
    if mermaid.is_empty() && html.is_empty() {
        state.record_step(
            StepId::Guard,
            StepStatus::Success,
            spec,
            Some(json!({"ok": true, "message": "no code blocks"})),
            None,
        );
        return state;
    }

    if ctx.cancelled() {
        let error = ErrorInfo::new(ErrorKind::Cancelled, "run cancelled");
        state.record_step(StepId::Guard, StepStatus::Fail, spec, None, Some(error));
        return state;
    }

    let payload = json!({
        "mermaid_blocks": mermaid
            .iter()
            .enumerate()
            .map(|(i, code)| json!({"index": i, "code": code}))
            .collect::<Vec<_>>(),
        "html_blocks": html
            .iter()
            .enumerate()
            .map(|(i, code)| json!({"index": i, "code": code}))
            .collect::<Vec<_>>(),
    });
    let messages = vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(payload.to_string()),
    ];
    let request = GatewayRequest::new(&ctx.config.models.guard, messages).with_limits(
        ctx.config.generation.max_tokens,
        ctx.config.generation.temperature,
    );

    let response = match ctx.gateway.complete(&request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "guard gateway call failed");
            let error = ErrorInfo::new(ErrorKind::ModelError, e.to_string())
                .with_guidance("retry the guard model call");
            state.record_step(StepId::Guard, StepStatus::Fail, spec, None, Some(error));
            return state;
        }
    };

    let verdict = match extract_json(&response) {
        Some(verdict) => verdict,
        None => {
            let error = ErrorInfo::new(ErrorKind::ModelError, "guard output was not JSON")
                .with_guidance("retry the guard model call");
            state.record_step(StepId::Guard, StepStatus::Fail, spec, None, Some(error));
            return state;
        }
    };

    if verdict.get("ok").and_then(Value::as_bool) == Some(true) {
        state.record_step(
            StepId::Guard,
            StepStatus::Success,
            spec,
            Some(json!({"ok": true})),
            None,
        );
        return state;
    }

    let mermaid_fixes = fix_list(&verdict, "mermaid_fixes", mermaid.len());
    let html_fixes = fix_list(&verdict, "html_fixes", html.len());

    // A "not ok" verdict that fixes nothing is a malformed answer.
    if mermaid_fixes.is_empty() && html_fixes.is_empty() {
        let error = ErrorInfo::new(
            ErrorKind::ModelError,
            "guard reported problems but offered no fixes",
        )
        .with_guidance("retry the guard model call");
        state.record_step(StepId::Guard, StepStatus::Fail, spec, None, Some(error));
        return state;
    }

    let mut fixed = text;
    for (index, code) in &mermaid_fixes {
        fixed = replace_block_body(&fixed, BlockKind::Mermaid, *index, code);
    }
    for (index, code) in &html_fixes {
        fixed = replace_block_body(&fixed, BlockKind::Html, *index, code);
    }
    if state.final_output.is_some() {
        state.final_output = Some(fixed);
    } else {
        state.draft = fixed;
    }

    info!(
        mermaid_fixed = mermaid_fixes.len(),
        html_fixed = html_fixes.len(),
        "guard applied fixes"
    );
    let outcome = json!({
        "ok": false,
        "mermaid_fixed": mermaid_fixes.len(),
        "html_fixed": html_fixes.len(),
    });
    state.record_step(StepId::Guard, StepStatus::Success, spec, Some(outcome), None);
    state
}

/// Valid (index, code) pairs from a fix list; out-of-range indices and empty
/// code are dropped.
fn fix_list(verdict: &Value, key: &str, block_count: usize) -> Vec<(usize, String)> {
    verdict
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let index = item.get("index").and_then(Value::as_u64)? as usize;
                    let code = item.get("code").and_then(Value::as_str)?.trim();
                    if index < block_count && !code.is_empty() {
                        Some((index, code.to_string()))
                    } else {
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}
