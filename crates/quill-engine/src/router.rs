//! The closed transition table of the pipeline.
//!
//! `route` is pure: it inspects the run state and returns what should happen
//! next. The supervisor applies the decision and owns the retry bookkeeping
//! (`Retry` increments `retry_count`, advancing to a different step resets
//! it), so a step that always fails is attempted `max_retries + 1` times.

use quill_core::{ErrorKind, RunState, StepId, StepStatus};

use crate::placeholder::has_image_placeholders;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Completed,
    Failed,
    NeedsUserInput,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Re-run the same step.
    Retry(StepId),
    /// Run a different step next (or the current one when state is fresh).
    Advance(StepId),
    /// The run is over.
    Terminate(Terminal),
}

pub fn route(state: &RunState) -> Decision {
    match state.step_status {
        // A fresh or mid-flight state: run the current step.
        StepStatus::Pending | StepStatus::Running => Decision::Advance(state.current_step),

        StepStatus::Fail | StepStatus::Partial => route_failure(state),

        StepStatus::Success => route_success(state),
    }
}

fn route_failure(state: &RunState) -> Decision {
    if let Some(error) = &state.error {
        match error.kind {
            ErrorKind::Cancelled => return Decision::Terminate(Terminal::Cancelled),
            // Preconditions won't improve by retrying the same inputs.
            ErrorKind::ValidationFailed => {
                return match state.current_step {
                    StepId::Controller | StepId::Writer => {
                        Decision::Terminate(Terminal::NeedsUserInput)
                    }
                    _ => Decision::Terminate(Terminal::Failed),
                };
            }
            _ => {}
        }
    }

    if state.retry_count < state.max_retries {
        return Decision::Retry(state.current_step);
    }

    // Retry budget exhausted. The controller is the interactive boundary and
    // must never hard-fail the conversation.
    match state.current_step {
        StepId::Controller => Decision::Terminate(Terminal::NeedsUserInput),
        _ => Decision::Terminate(Terminal::Failed),
    }
}

fn route_success(state: &RunState) -> Decision {
    match state.current_step {
        StepId::Controller => {
            if state.has_pending_attachments() {
                Decision::Advance(StepId::Attachment)
            } else if state.ready_to_write {
                Decision::Advance(StepId::Writer)
            } else {
                // A pure chat turn: reply delivered, nothing to produce.
                Decision::Terminate(Terminal::Completed)
            }
        }
        StepId::Attachment => Decision::Advance(StepId::Controller),
        // The assembler always runs; it is what produces the final output,
        // even when there was nothing to substitute.
        StepId::Writer => {
            if !state.diagram_placeholders.is_empty() || !state.prototype_placeholders.is_empty() {
                Decision::Advance(StepId::Diagram)
            } else {
                Decision::Advance(StepId::Assembler)
            }
        }
        StepId::Diagram => Decision::Advance(StepId::Assembler),
        StepId::Assembler => {
            if has_image_placeholders(&state.draft) {
                Decision::Advance(StepId::Image)
            } else {
                Decision::Advance(StepId::Guard)
            }
        }
        StepId::Image => Decision::Advance(StepId::Guard),
        StepId::Guard => Decision::Terminate(Terminal::Completed),
        // The skill path joins the tail of the main pipeline so its image
        // markers and code blocks get the same treatment.
        StepId::SkillExecutor => {
            if has_image_placeholders(&state.draft) {
                Decision::Advance(StepId::Image)
            } else {
                Decision::Advance(StepId::Guard)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::{Attachment, ErrorInfo, Placeholder};
    use uuid::Uuid;

    fn state_at(step: StepId, status: StepStatus) -> RunState {
        let mut state = RunState::new(Uuid::new_v4());
        state.current_step = step;
        state.step_status = status;
        state
    }

    #[test]
    fn fresh_state_runs_current_step() {
        let state = state_at(StepId::Writer, StepStatus::Pending);
        assert_eq!(route(&state), Decision::Advance(StepId::Writer));
    }

    #[test]
    fn chat_turn_completes() {
        let state = state_at(StepId::Controller, StepStatus::Success);
        assert_eq!(route(&state), Decision::Terminate(Terminal::Completed));
    }

    #[test]
    fn pending_attachments_run_before_writing() {
        let mut state = state_at(StepId::Controller, StepStatus::Success);
        state.ready_to_write = true;
        state.attachments.push(Attachment {
            id: "a1".into(),
            filename: "spec.pdf".into(),
            file_ref: "uploads/spec.pdf".into(),
            summary: None,
            analysis: None,
        });
        assert_eq!(route(&state), Decision::Advance(StepId::Attachment));

        state.attachments[0].summary = Some("summarized".into());
        assert_eq!(route(&state), Decision::Advance(StepId::Writer));
    }

    #[test]
    fn attachment_returns_to_controller() {
        let state = state_at(StepId::Attachment, StepStatus::Success);
        assert_eq!(route(&state), Decision::Advance(StepId::Controller));
    }

    #[test]
    fn writer_branches_on_placeholders() {
        let mut state = state_at(StepId::Writer, StepStatus::Success);
        assert_eq!(route(&state), Decision::Advance(StepId::Assembler));

        state.diagram_placeholders.push(Placeholder {
            id: "mermaid_1".into(),
            description: "flow".into(),
        });
        assert_eq!(route(&state), Decision::Advance(StepId::Diagram));
    }

    #[test]
    fn assembler_branches_on_image_placeholders() {
        let mut state = state_at(StepId::Assembler, StepStatus::Success);
        assert_eq!(route(&state), Decision::Advance(StepId::Guard));

        state.draft = "{{image+cover art}}".into();
        assert_eq!(route(&state), Decision::Advance(StepId::Image));
    }

    #[test]
    fn guard_success_completes_the_run() {
        let state = state_at(StepId::Guard, StepStatus::Success);
        assert_eq!(route(&state), Decision::Terminate(Terminal::Completed));
    }

    #[test]
    fn skill_executor_joins_the_pipeline_tail() {
        let mut state = state_at(StepId::SkillExecutor, StepStatus::Success);
        assert_eq!(route(&state), Decision::Advance(StepId::Guard));

        state.draft = "{{image+cover art}}".into();
        assert_eq!(route(&state), Decision::Advance(StepId::Image));
    }

    #[test]
    fn failure_retries_until_budget_exhausted() {
        let mut state = state_at(StepId::Diagram, StepStatus::Fail);
        state.error = Some(ErrorInfo::new(ErrorKind::ModelError, "boom"));
        state.max_retries = 2;

        state.retry_count = 0;
        assert_eq!(route(&state), Decision::Retry(StepId::Diagram));
        state.retry_count = 1;
        assert_eq!(route(&state), Decision::Retry(StepId::Diagram));
        state.retry_count = 2;
        assert_eq!(route(&state), Decision::Terminate(Terminal::Failed));
    }

    #[test]
    fn exhausted_controller_asks_the_user() {
        let mut state = state_at(StepId::Controller, StepStatus::Fail);
        state.error = Some(ErrorInfo::new(ErrorKind::ModelError, "boom"));
        state.retry_count = state.max_retries;
        assert_eq!(route(&state), Decision::Terminate(Terminal::NeedsUserInput));
    }

    #[test]
    fn validation_failure_is_never_retried() {
        let mut state = state_at(StepId::Writer, StepStatus::Fail);
        state.error = Some(ErrorInfo::new(ErrorKind::ValidationFailed, "no inputs"));
        state.retry_count = 0;
        assert_eq!(route(&state), Decision::Terminate(Terminal::NeedsUserInput));

        state.current_step = StepId::Assembler;
        assert_eq!(route(&state), Decision::Terminate(Terminal::Failed));
    }

    #[test]
    fn cancellation_terminates_immediately() {
        let mut state = state_at(StepId::Writer, StepStatus::Fail);
        state.error = Some(ErrorInfo::new(ErrorKind::Cancelled, "stopped"));
        assert_eq!(route(&state), Decision::Terminate(Terminal::Cancelled));
    }

    #[test]
    fn partial_outcome_is_retryable() {
        let mut state = state_at(StepId::Diagram, StepStatus::Partial);
        state.error = Some(ErrorInfo::new(ErrorKind::GenerationFailed, "2 items failed"));
        assert_eq!(route(&state), Decision::Retry(StepId::Diagram));
    }
}
