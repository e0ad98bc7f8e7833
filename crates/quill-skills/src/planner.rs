//! The skill planner: decomposes a plan into an ordered list of skills the
//! executor can run one by one. Planning never fails a run; when the model
//! output is unusable the planner degrades to writing skills derived from
//! the outline.

use serde_json::Value;
use tracing::{debug, info, warn};

use quill_core::{ChatMessage, RunState, Skill, SkillKind, SkillStatus};
use quill_engine::parse::extract_json;
use quill_engine::StepContext;
use quill_llm::GatewayRequest;

const SYSTEM_PROMPT: &str = "You are a task planner for document production.\n\
\n\
Decompose the writing plan into an ordered list of atomic skills. Available \
skill kinds and their arguments:\n\
- search_web: { query, purpose }\n\
- write_text: { instruction }\n\
- generate_image: { prompt, placement }\n\
- create_chart: { chart_type, instruction }\n\
- create_ui: { instruction }\n\
\n\
Output strict JSON, no Markdown:\n\
{ \"skills\": [ { \"kind\": \"write_text\", \"instruction\": \"...\", \
\"desc\": \"short label\" } ] }\n\
\n\
Rules:\n\
1. Skills run strictly in order; put research before the writing that needs it.\n\
2. Every section of the plan must be covered by some skill.\n\
3. Keep the list short; one skill per distinct piece of work.";

/// Produce the ordered skill list for a run. Ids and statuses are always
/// backfilled here so callers can rely on them.
pub async fn plan_skills(ctx: &StepContext, state: &RunState) -> Vec<Skill> {
    let plan = state.variables.plan_text().unwrap_or_default().trim().to_string();
    let outline = state.variables.outline();

    // Nothing to decompose: a single whole-draft writing skill, no model call.
    if plan.is_empty() && outline.is_empty() {
        debug!("no plan or outline, defaulting to a single writing skill");
        return number(vec![Skill::new(
            "",
            SkillKind::WriteText {
                instruction: "Write the full document draft from the collected variables.".into(),
            },
            "write the document",
        )]);
    }

    let user = format!(
        "Writing plan:\n{plan}\n\nSection outline:\n{}",
        outline
            .iter()
            .map(|s| format!("- {s}"))
            .collect::<Vec<_>>()
            .join("\n"),
    );
    let messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)];
    let request = GatewayRequest::new(&ctx.config.models.skill_planner, messages).with_limits(
        ctx.config.generation.max_tokens,
        ctx.config.generation.temperature,
    );

    let skills = match ctx.gateway.complete(&request).await {
        Ok(response) => parse_skills(&response),
        Err(e) => {
            warn!(error = %e, "skill planner call failed, degrading");
            Vec::new()
        }
    };

    if skills.is_empty() {
        return number(fallback_skills(&plan, &outline));
    }
    info!(count = skills.len(), "skill plan ready");
    number(skills)
}

fn parse_skills(response: &str) -> Vec<Skill> {
    let Some(envelope) = extract_json(response) else {
        return Vec::new();
    };
    let Some(items) = envelope.get("skills").and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| serde_json::from_value::<Skill>(with_defaults(item)).ok())
        .collect()
}

/// Tolerate planner output that omits `id` or `desc`.
fn with_defaults(item: &Value) -> Value {
    let mut item = item.clone();
    if let Some(map) = item.as_object_mut() {
        map.entry("id").or_insert_with(|| Value::String(String::new()));
        if !map.contains_key("desc") {
            let desc = map
                .get("kind")
                .and_then(Value::as_str)
                .unwrap_or("skill")
                .replace('_', " ");
            map.insert("desc".into(), Value::String(desc));
        }
    }
    item
}

/// One writing skill per outline section, or a single skill over the plan.
fn fallback_skills(plan: &str, outline: &[String]) -> Vec<Skill> {
    if outline.is_empty() {
        return vec![Skill::new(
            "",
            SkillKind::WriteText {
                instruction: format!("Write the full document draft following this plan:\n{plan}"),
            },
            "write the document",
        )];
    }
    outline
        .iter()
        .map(|section| {
            Skill::new(
                "",
                SkillKind::WriteText {
                    instruction: format!("Write the section \"{section}\" of the document."),
                },
                format!("write section: {section}"),
            )
        })
        .collect()
}

/// Assign sequential ids and reset statuses to pending.
fn number(mut skills: Vec<Skill>) -> Vec<Skill> {
    for (i, skill) in skills.iter_mut().enumerate() {
        skill.id = format!("s{}", i + 1);
        skill.status = SkillStatus::Pending;
        skill.result = None;
    }
    skills
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_skill_list() {
        let response = r#"{"skills": [
            {"kind": "search_web", "query": "rust adoption 2026", "purpose": "background",
             "desc": "research"},
            {"kind": "write_text", "instruction": "write the intro"}
        ]}"#;
        let skills = number(parse_skills(response));
        assert_eq!(skills.len(), 2);
        assert_eq!(skills[0].id, "s1");
        assert!(matches!(skills[0].kind, SkillKind::SearchWeb { .. }));
        assert_eq!(skills[1].id, "s2");
        assert_eq!(skills[1].desc, "write text");
        assert_eq!(skills[1].status, SkillStatus::Pending);
    }

    #[test]
    fn malformed_items_are_dropped() {
        let response = r#"{"skills": [
            {"kind": "no_such_skill", "x": 1},
            {"kind": "write_text", "instruction": "ok", "desc": "write"}
        ]}"#;
        let skills = parse_skills(response);
        assert_eq!(skills.len(), 1);
    }

    #[test]
    fn prose_response_yields_nothing() {
        assert!(parse_skills("I would suggest starting with research.").is_empty());
    }

    #[test]
    fn fallback_covers_every_outline_section() {
        let outline = vec!["Background".to_string(), "Approach".to_string()];
        let skills = number(fallback_skills("# Plan", &outline));
        assert_eq!(skills.len(), 2);
        assert!(skills
            .iter()
            .all(|s| matches!(s.kind, SkillKind::WriteText { .. })));
        assert_eq!(skills[1].desc, "write section: Approach");
    }

    #[test]
    fn fallback_without_outline_is_a_single_skill() {
        let skills = fallback_skills("# Plan\nsome prose", &[]);
        assert_eq!(skills.len(), 1);
    }
}
