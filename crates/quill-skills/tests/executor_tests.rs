//! Skill execution against the mock gateway.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use quill_core::{
    ErrorKind, QuillConfig, RunEvent, RunState, Skill, SkillKind, SkillStatus, StepId, StepStatus,
};
use quill_engine::StepContext;
use quill_llm::MockGateway;
use quill_skills::executor;

fn context(gateway: MockGateway) -> (StepContext, mpsc::Receiver<RunEvent>) {
    let (tx, rx) = mpsc::channel(1024);
    let ctx = StepContext::new(
        Arc::new(gateway),
        QuillConfig::default(),
        tx,
        CancellationToken::new(),
    );
    (ctx, rx)
}

fn state_with_skills(skills: Vec<Skill>) -> RunState {
    let mut state = RunState::new(Uuid::new_v4());
    state.current_step = StepId::SkillExecutor;
    state.skills = Some(skills);
    state
}

fn drain(rx: &mut mpsc::Receiver<RunEvent>) -> Vec<RunEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn runs_skills_in_order_and_accumulates_the_draft() {
    let gateway = MockGateway::new()
        .with_response("Rust adoption keeps growing.")
        .with_response("# Report\n\nGrounded in the research findings.");
    let (ctx, mut rx) = context(gateway);

    let skills = vec![
        Skill::new(
            "s1",
            SkillKind::SearchWeb {
                query: "rust adoption 2026".into(),
                purpose: "background".into(),
            },
            "research",
        ),
        Skill::new(
            "s2",
            SkillKind::WriteText {
                instruction: "write the report".into(),
            },
            "write",
        ),
    ];

    let state = executor::run(&ctx, state_with_skills(skills)).await;

    assert_eq!(state.step_status, StepStatus::Success);
    assert_eq!(state.draft, "# Report\n\nGrounded in the research findings.");
    assert_eq!(state.final_output.as_deref(), Some(state.draft.as_str()));

    let skills = state.skills.as_ref().unwrap();
    assert!(skills.iter().all(|s| s.status == SkillStatus::Completed));
    assert_eq!(skills[0].result.as_ref().unwrap()["findings"], "Rust adoption keeps growing.");

    let updates: Vec<String> = drain(&mut rx)
        .iter()
        .filter_map(|e| match e {
            RunEvent::SkillUpdate { skill_id, status } => Some(format!("{skill_id}:{status}")),
            _ => None,
        })
        .collect();
    assert_eq!(
        updates,
        vec!["s1:running", "s1:completed", "s2:running", "s2:completed"]
    );
}

#[tokio::test]
async fn search_findings_feed_the_writing_prompt() {
    let gateway = MockGateway::new()
        .with_response("finding: 42% growth")
        .with_response("body text");
    let requests = gateway.recorded_requests();
    let (ctx, _rx) = context(gateway);

    let skills = vec![
        Skill::new(
            "s1",
            SkillKind::SearchWeb {
                query: "q".into(),
                purpose: "p".into(),
            },
            "research",
        ),
        Skill::new(
            "s2",
            SkillKind::WriteText {
                instruction: "write".into(),
            },
            "write",
        ),
    ];
    let _ = executor::run(&ctx, state_with_skills(skills)).await;

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    let write_prompt = &requests[1].messages.last().unwrap().content;
    assert!(write_prompt.contains("finding: 42% growth"));
}

#[tokio::test]
async fn image_skill_places_a_marker_without_a_model_call() {
    let gateway = MockGateway::new();
    let requests = gateway.recorded_requests();
    let (ctx, _rx) = context(gateway);

    let skills = vec![Skill::new(
        "s1",
        SkillKind::GenerateImage {
            prompt: "a lighthouse at dusk".into(),
            placement: "after the intro".into(),
        },
        "illustrate",
    )];
    let state = executor::run(&ctx, state_with_skills(skills)).await;

    assert_eq!(state.step_status, StepStatus::Success);
    assert!(state.draft.contains("{{image+a lighthouse at dusk}}"));
    assert_eq!(requests.lock().unwrap().len(), 0);
}

#[tokio::test]
async fn chart_skill_embeds_a_fenced_block() {
    let gateway = MockGateway::new().with_response(r#"{"code": "pie\n  \"a\": 60\n  \"b\": 40"}"#);
    let (ctx, _rx) = context(gateway);

    let skills = vec![Skill::new(
        "s1",
        SkillKind::CreateChart {
            chart_type: "pie".into(),
            instruction: "split of a vs b".into(),
        },
        "chart",
    )];
    let state = executor::run(&ctx, state_with_skills(skills)).await;

    assert_eq!(state.step_status, StepStatus::Success);
    assert!(state.draft.starts_with("```mermaid\npie\n"));
    assert!(state.draft.ends_with("\n```"));
}

#[tokio::test]
async fn first_failure_aborts_the_remaining_skills() {
    let gateway = MockGateway::new()
        .with_response("first section text")
        .with_error("HTTP 500");
    let requests = gateway.recorded_requests();
    let (ctx, _rx) = context(gateway);

    let skills = vec![
        Skill::new("s1", SkillKind::WriteText { instruction: "one".into() }, "one"),
        Skill::new("s2", SkillKind::WriteText { instruction: "two".into() }, "two"),
        Skill::new("s3", SkillKind::WriteText { instruction: "three".into() }, "three"),
    ];
    let state = executor::run(&ctx, state_with_skills(skills)).await;

    assert_eq!(state.step_status, StepStatus::Fail);
    assert_eq!(state.error.as_ref().unwrap().kind, ErrorKind::ModelError);
    // The third skill was never attempted.
    assert_eq!(requests.lock().unwrap().len(), 2);

    let skills = state.skills.as_ref().unwrap();
    assert_eq!(skills[0].status, SkillStatus::Completed);
    assert_eq!(skills[2].status, SkillStatus::Pending);
    // The successful skill's output survives for a resume.
    assert_eq!(state.draft, "first section text");
}

#[tokio::test]
async fn resume_skips_completed_skills() {
    let gateway = MockGateway::new().with_response("second section text");
    let requests = gateway.recorded_requests();
    let (ctx, _rx) = context(gateway);

    let mut done = Skill::new("s1", SkillKind::WriteText { instruction: "one".into() }, "one");
    done.status = SkillStatus::Completed;
    let skills = vec![
        done,
        Skill::new("s2", SkillKind::WriteText { instruction: "two".into() }, "two"),
    ];

    let mut state = state_with_skills(skills);
    state.draft = "first section text".into();
    let state = executor::run(&ctx, state).await;

    assert_eq!(state.step_status, StepStatus::Success);
    assert_eq!(requests.lock().unwrap().len(), 1);
    assert_eq!(state.draft, "first section text\n\nsecond section text");
}

#[tokio::test]
async fn missing_skills_are_planned_first() {
    let gateway = MockGateway::new()
        .with_response(r#"{"skills": [{"kind": "write_text", "instruction": "write it", "desc": "write"}]}"#)
        .with_response("the draft");
    let (ctx, _rx) = context(gateway);

    let mut state = RunState::new(Uuid::new_v4());
    state.current_step = StepId::SkillExecutor;
    state.variables.set("plan_text", serde_json::json!("# Plan\n## Section"));

    let state = executor::run(&ctx, state).await;
    assert_eq!(state.step_status, StepStatus::Success);
    assert_eq!(state.skills.as_ref().unwrap().len(), 1);
    assert_eq!(state.draft, "the draft");
}

#[tokio::test]
async fn cancellation_stops_between_skills() {
    let gateway = MockGateway::new();
    let requests = gateway.recorded_requests();
    let (tx, _rx) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let ctx = StepContext::new(Arc::new(gateway), QuillConfig::default(), tx, cancel);

    let skills = vec![Skill::new(
        "s1",
        SkillKind::WriteText { instruction: "one".into() },
        "one",
    )];
    let state = executor::run(&ctx, state_with_skills(skills)).await;

    assert_eq!(state.step_status, StepStatus::Fail);
    assert_eq!(state.error.as_ref().unwrap().kind, ErrorKind::Cancelled);
    assert_eq!(requests.lock().unwrap().len(), 0);
}
