//! The run supervisor: one task per run, driving the step/route loop,
//! persisting the audit trail, and fanning events out to subscribers.
//!
//! Retry bookkeeping lives here, not in the steps: a `Retry` decision
//! increments `retry_count`, advancing to a different step resets it. With
//! the router's budget check this gives a persistently failing step exactly
//! `max_retries + 1` attempts.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use quill_core::{
    ChatMessage, EventBus, QuillConfig, QuillError, Result, RunEvent, RunState, StepId, StepStatus,
};
use quill_engine::{route, run_step, Decision, StepContext, Terminal};
use quill_llm::ModelGateway;

use crate::persist::Persistence;

pub struct RunSupervisor {
    gateway: Arc<dyn ModelGateway>,
    persistence: Arc<dyn Persistence>,
    config: QuillConfig,
}

/// A live run: subscribe to its events, stop it, or wait for the final state.
pub struct RunHandle {
    pub run_id: Uuid,
    /// Subscribed before the run task starts, so no event is missed.
    pub events: broadcast::Receiver<RunEvent>,
    bus: EventBus,
    cancel: CancellationToken,
    task: JoinHandle<RunState>,
    forwarder: JoinHandle<()>,
}

impl RunHandle {
    /// An additional event subscription. Late subscribers only see events
    /// published after they subscribe; use the `events` field for the full
    /// stream.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.bus.subscribe()
    }

    /// Request cancellation. The run stops at its next suspension point.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run task. Returns the final state together with the
    /// pre-subscribed receiver, which holds every event of the run.
    pub async fn wait(self) -> Result<(RunState, broadcast::Receiver<RunEvent>)> {
        let state = self
            .task
            .await
            .map_err(|e| QuillError::Other(anyhow::anyhow!("run task panicked: {e}")))?;
        // The run task dropped its sender; the forwarder drains what is left
        // and exits, so the receiver now holds the complete stream.
        let _ = self.forwarder.await;
        Ok((state, self.events))
    }
}

impl RunSupervisor {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        persistence: Arc<dyn Persistence>,
        config: QuillConfig,
    ) -> Self {
        Self {
            gateway,
            persistence,
            config,
        }
    }

    /// A conversational turn: the user's message goes into the history and
    /// the run starts at the controller. Variables from the document's last
    /// run are loaded underneath whatever the state already carries.
    pub async fn start_planning(&self, doc_id: Uuid, user_message: &str) -> RunHandle {
        let mut state = RunState::new(doc_id);
        state.max_retries = self.config.pipeline.max_retries;
        if let Ok(Some(previous)) = self.persistence.load_latest_variables(doc_id).await {
            state.variables = previous;
        }
        state.chat_history.push(ChatMessage::user(user_message));
        self.start(state)
    }

    /// Produce the document from an already-agreed plan, skipping the
    /// conversation. A state carrying a skill list goes down the skill path;
    /// anything else starts at the writer.
    pub fn start_production(&self, mut state: RunState) -> RunHandle {
        state.ready_to_write = true;
        state.current_step = if state.skills.is_some() {
            StepId::SkillExecutor
        } else {
            StepId::Writer
        };
        state.step_status = StepStatus::Pending;
        self.start(state)
    }

    /// Produce the document through the skill path: plan skills from the
    /// current variables, then run them in order.
    pub fn start_skill_run(&self, mut state: RunState) -> RunHandle {
        state.current_step = StepId::SkillExecutor;
        state.step_status = StepStatus::Pending;
        self.start(state)
    }

    /// Spawn the run task for a prepared state.
    pub fn start(&self, mut state: RunState) -> RunHandle {
        state.max_retries = self.config.pipeline.max_retries;
        let run_id = state.run_id;
        let bus = EventBus::new(self.config.pipeline.event_buffer);
        let events = bus.subscribe();
        let cancel = CancellationToken::new();

        // The run task and its steps publish through one mpsc, so every
        // event reaches subscribers in the order it was produced. A forwarder
        // task fans out to the broadcast bus so slow subscribers never block
        // a step.
        let (tx, mut rx) = mpsc::channel::<RunEvent>(self.config.pipeline.event_buffer);
        let forward_bus = bus.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                forward_bus.publish(event);
            }
        });

        let ctx = StepContext::new(
            Arc::clone(&self.gateway),
            self.config.clone(),
            tx,
            cancel.clone(),
        );
        let persistence = Arc::clone(&self.persistence);
        let task = tokio::spawn(async move { drive(ctx, persistence, state).await });

        RunHandle {
            run_id,
            events,
            bus,
            cancel,
            task,
            forwarder,
        }
    }
}

async fn drive(
    ctx: StepContext,
    persistence: Arc<dyn Persistence>,
    mut state: RunState,
) -> RunState {
    let run_id = state.run_id;
    info!(run_id = %run_id, step = %state.current_step, "run starting");
    ctx.emit(RunEvent::RunStart { run_id }).await;

    let terminal = loop {
        if ctx.cancelled() {
            break Terminal::Cancelled;
        }

        let step = match route(&state) {
            Decision::Terminate(terminal) => break terminal,
            Decision::Retry(step) => {
                state.retry_count += 1;
                info!(run_id = %run_id, step = %step, attempt = state.retry_count + 1, "retrying step");
                step
            }
            Decision::Advance(step) => {
                if step != state.current_step {
                    state.retry_count = 0;
                }
                step
            }
        };

        state.current_step = step;
        state.step_status = StepStatus::Running;
        ctx.emit(RunEvent::NodeUpdate {
            step,
            status: StepStatus::Running,
        })
        .await;

        let audit_before = state.audit_log.len();
        state = match step {
            StepId::SkillExecutor => quill_skills::executor::run(&ctx, state).await,
            _ => run_step(step, &ctx, state).await,
        };

        for record in &state.audit_log[audit_before..] {
            if let Err(e) = persistence.append_audit_record(run_id, record).await {
                warn!(run_id = %run_id, error = %e, "failed to persist audit record");
            }
        }
        ctx.emit(RunEvent::NodeUpdate {
            step,
            status: state.step_status,
        })
        .await;
    };

    finish(&ctx, &persistence, &mut state, terminal).await;
    state
}

async fn finish(
    ctx: &StepContext,
    persistence: &Arc<dyn Persistence>,
    state: &mut RunState,
    terminal: Terminal,
) {
    let run_id = state.run_id;
    let status = match terminal {
        Terminal::Completed => "completed",
        Terminal::Failed => "failed",
        Terminal::NeedsUserInput => "needs_user_input",
        Terminal::Cancelled => "cancelled",
    };
    info!(run_id = %run_id, status, "run finished");

    if terminal == Terminal::Completed {
        if let Some(text) = &state.final_output {
            if let Err(e) = persistence
                .save_final_output(run_id, state.doc_id, text, &state.variables)
                .await
            {
                warn!(run_id = %run_id, error = %e, "failed to persist final output");
            }
        }
    }
    if let Err(e) = persistence.save_run_status(run_id, status).await {
        warn!(run_id = %run_id, error = %e, "failed to persist run status");
    }

    match terminal {
        // A chat turn and a finished production both end the run cleanly;
        // `needs_user_input` hands the conversation back without output.
        Terminal::Completed | Terminal::NeedsUserInput => {
            ctx.emit(RunEvent::RunComplete {
                run_id,
                final_output: state.final_output.clone(),
                variables: serde_json::to_value(&state.variables)
                    .unwrap_or(serde_json::Value::Null),
            })
            .await;
        }
        Terminal::Failed => {
            let message = state
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "run failed".into());
            ctx.emit(RunEvent::RunError { run_id, message }).await;
        }
        Terminal::Cancelled => {
            ctx.emit(RunEvent::RunCancelled { run_id }).await;
        }
    }
}
