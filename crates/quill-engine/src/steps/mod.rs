//! The pipeline steps. Each step takes the full run state by value and
//! returns it with its owned fields updated, exactly one audit record
//! appended, and `step_status` set. Model and validation failures are data
//! on the state, never `Err`.

pub mod assembler;
pub mod attachment;
pub mod controller;
pub mod diagram;
pub mod guard;
pub mod image;
pub mod writer;

use quill_core::{RunState, StepId};

use crate::context::StepContext;

/// Dispatch one step. `SkillExecutor` lives in its own crate and is
/// dispatched by the supervisor, not here.
pub async fn run_step(step: StepId, ctx: &StepContext, state: RunState) -> RunState {
    match step {
        StepId::Controller => controller::run(ctx, state).await,
        StepId::Attachment => attachment::run(ctx, state).await,
        StepId::Writer => writer::run(ctx, state).await,
        StepId::Diagram => diagram::run(ctx, state).await,
        StepId::Guard => guard::run(ctx, state).await,
        StepId::Assembler => assembler::run(ctx, state).await,
        StepId::Image => image::run(ctx, state).await,
        StepId::SkillExecutor => state,
    }
}
