use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use quill_core::{QuillConfig, RunEvent};
use quill_llm::ModelGateway;

/// Everything a step needs besides the run state itself.
///
/// Steps write progress to `events`; the run task that drives the steps
/// shares the same sender, so observers see the whole run in production
/// order. `cancel` is checked before every gateway call and after every
/// streamed chunk.
#[derive(Clone)]
pub struct StepContext {
    pub gateway: Arc<dyn ModelGateway>,
    pub config: QuillConfig,
    pub events: mpsc::Sender<RunEvent>,
    pub cancel: CancellationToken,
}

impl StepContext {
    pub fn new(
        gateway: Arc<dyn ModelGateway>,
        config: QuillConfig,
        events: mpsc::Sender<RunEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            config,
            events,
            cancel,
        }
    }

    /// Publish a progress event. A closed channel means the run is being
    /// torn down; the event is dropped.
    pub async fn emit(&self, event: RunEvent) {
        let _ = self.events.send(event).await;
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
