//! The assembler: substitutes every placeholder with its generated artifact,
//! verifies nothing is left unresolved, and runs the consistency checks.

use serde_json::json;
use tracing::{info, warn};

use quill_core::{
    ErrorInfo, ErrorKind, ItemError, PromptSpec, RunState, StepId, StepStatus,
};

use crate::context::StepContext;
use crate::placeholder::{HTML_RE, MERMAID_RE};

pub async fn run(_ctx: &StepContext, mut state: RunState) -> RunState {
    let spec = PromptSpec {
        goal: "assemble the final document: substitute placeholders, check consistency".into(),
        constraints: vec![
            "every placeholder must be resolved".into(),
            "unresolved placeholders are redone, never papered over".into(),
        ],
        materials: Vec::new(),
        output_format: "final Markdown + validation report".into(),
    };

    if state.draft.trim().is_empty() {
        let error = ErrorInfo::new(ErrorKind::ValidationFailed, "no draft to assemble")
            .with_guidance("run the writer first");
        state.record_step(StepId::Assembler, StepStatus::Fail, spec, None, Some(error));
        return state;
    }

    let mut final_output = state.draft.clone();
    let mut errors: Vec<ItemError> = Vec::new();
    let mut replaced = 0usize;

    for placeholder in state
        .diagram_placeholders
        .iter()
        .chain(state.prototype_placeholders.iter())
    {
        let (marker_kind, token) = if placeholder.id.starts_with("mermaid_") {
            ("MERMAID", format!("{{{{MERMAID:{}}}}}", placeholder.description))
        } else {
            ("HTML", format!("{{{{HTML:{}}}}}", placeholder.description))
        };
        match state.artifacts.get(&placeholder.id) {
            Some(artifact) => {
                let block = format!("```{}\n{}\n```", artifact.kind.fence_tag(), artifact.code);
                final_output = final_output.replacen(&token, &block, 1);
                replaced += 1;
            }
            None => {
                errors.push(ItemError {
                    id: placeholder.id.clone(),
                    description: placeholder.description.clone(),
                    detail: format!("no generated {} code for this placeholder", marker_kind),
                });
            }
        }
    }

    // Anything the substitution pass missed (descriptions that drifted,
    // placeholders the writer never registered).
    for cap in MERMAID_RE.captures_iter(&final_output) {
        errors.push(ItemError {
            id: "unknown".into(),
            description: cap[1].trim().to_string(),
            detail: "placeholder was not substituted".into(),
        });
    }
    for cap in HTML_RE.captures_iter(&final_output) {
        errors.push(ItemError {
            id: "unknown".into(),
            description: cap[1].trim().to_string(),
            detail: "placeholder was not substituted".into(),
        });
    }

    let issues = consistency_issues(&final_output, &state);

    if !errors.is_empty() {
        warn!(unresolved = errors.len(), "assembly failed");
        let outcome = json!({
            "replaced": replaced,
            "unresolved": errors.len(),
            "consistency_issues": issues,
        });
        let error = ErrorInfo::new(
            ErrorKind::AssemblyFailed,
            format!("{} placeholder(s) could not be substituted", errors.len()),
        )
        .with_guidance("regenerate the missing placeholder code")
        .with_items(errors);
        state.record_step(
            StepId::Assembler,
            StepStatus::Fail,
            spec,
            Some(outcome),
            Some(error),
        );
        return state;
    }

    info!(replaced, issues = issues.len(), "assembly finished");
    let outcome = json!({
        "replaced": replaced,
        "consistency_issues": issues,
    });
    state.final_output = Some(final_output);
    state.record_step(
        StepId::Assembler,
        StepStatus::Success,
        spec,
        Some(outcome),
        None,
    );
    state
}

/// Advisory checks recorded in the audit trail; they warn, they do not fail
/// the assembly.
fn consistency_issues(final_output: &str, state: &RunState) -> Vec<serde_json::Value> {
    let mut issues = Vec::new();
    let lowered = final_output.to_lowercase();

    for point in state.variables.key_points() {
        if !point.is_empty() && !lowered.contains(&point.to_lowercase()) {
            issues.push(json!({
                "kind": "missing_key_point",
                "detail": format!("key point '{}' may not be covered", point),
            }));
        }
    }

    for section in state.variables.outline() {
        if section.is_empty() {
            continue;
        }
        let h1 = format!("# {}", section);
        let h2 = format!("## {}", section);
        if !final_output.contains(&h1) && !final_output.contains(&h2) {
            issues.push(json!({
                "kind": "missing_section",
                "detail": format!("outline section '{}' may be missing", section),
            }));
        }
    }

    if final_output.contains("```mermaid\n\n```") || final_output.contains("```html\n\n```") {
        issues.push(json!({
            "kind": "empty_code_block",
            "detail": "found an empty code block",
        }));
    }

    issues
}
