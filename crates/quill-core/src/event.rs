use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::state::{StepId, StepStatus};

/// Events emitted while a run executes — the observer surface of Quill.
///
/// Steps publish these through the supervisor, which fans them out to every
/// subscriber of the run. The serialized form is what a frontend would render
/// as live progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunEvent {
    // ── Run lifecycle ──────────────────────────────────────────
    RunStart {
        run_id: Uuid,
    },
    RunComplete {
        run_id: Uuid,
        final_output: Option<String>,
        variables: Value,
    },
    RunError {
        run_id: Uuid,
        message: String,
    },
    RunCancelled {
        run_id: Uuid,
    },

    // ── Step lifecycle ─────────────────────────────────────────
    NodeUpdate {
        step: StepId,
        status: StepStatus,
    },

    // ── Streaming output ───────────────────────────────────────
    StreamThinking {
        content: String,
    },
    StreamContent {
        content: String,
    },
    StreamPlan {
        content: String,
    },
    StreamDone,

    // ── Writer progress ────────────────────────────────────────
    ChapterUpdate {
        index: usize,
        title: String,
    },

    // ── Skill progress ─────────────────────────────────────────
    SkillUpdate {
        skill_id: String,
        status: String,
    },
}

/// A broadcast-based event bus for per-run pub/sub.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<RunEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: RunEvent) {
        // Ignore send errors (no subscribers).
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(4096)
    }
}
