//! Persistence seam for runs: the audit trail, the latest document variables,
//! and the finished output. The supervisor writes through this trait; the
//! in-memory implementation backs tests and embedded use.

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use std::collections::HashMap;

use quill_core::{AuditRecord, DocVariables, Result};

#[async_trait]
pub trait Persistence: Send + Sync {
    /// Append one audit record to the run's trail.
    async fn append_audit_record(&self, run_id: Uuid, record: &AuditRecord) -> Result<()>;

    /// The variables of the most recent run for this document, if any.
    async fn load_latest_variables(&self, doc_id: Uuid) -> Result<Option<DocVariables>>;

    /// Store the finished document and, per document, the variables that
    /// produced it (the next run's `load_latest_variables`).
    async fn save_final_output(
        &self,
        run_id: Uuid,
        doc_id: Uuid,
        text: &str,
        variables: &DocVariables,
    ) -> Result<()>;

    /// Record the run's terminal status ("completed", "failed", "cancelled",
    /// "needs_user_input").
    async fn save_run_status(&self, run_id: Uuid, status: &str) -> Result<()>;
}

/// In-memory persistence. Everything is lost on drop; the accessors exist so
/// tests can assert on what the supervisor wrote.
#[derive(Default)]
pub struct InMemoryPersistence {
    audit: Mutex<HashMap<Uuid, Vec<AuditRecord>>>,
    variables: Mutex<HashMap<Uuid, DocVariables>>,
    outputs: Mutex<HashMap<Uuid, String>>,
    statuses: Mutex<HashMap<Uuid, String>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audit_trail(&self, run_id: Uuid) -> Vec<AuditRecord> {
        self.audit.lock().get(&run_id).cloned().unwrap_or_default()
    }

    pub fn final_output(&self, run_id: Uuid) -> Option<String> {
        self.outputs.lock().get(&run_id).cloned()
    }

    pub fn run_status(&self, run_id: Uuid) -> Option<String> {
        self.statuses.lock().get(&run_id).cloned()
    }

    /// Seed variables for a document, as a previous run would have left them.
    pub fn seed_variables(&self, doc_id: Uuid, variables: DocVariables) {
        self.variables.lock().insert(doc_id, variables);
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn append_audit_record(&self, run_id: Uuid, record: &AuditRecord) -> Result<()> {
        self.audit
            .lock()
            .entry(run_id)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn load_latest_variables(&self, doc_id: Uuid) -> Result<Option<DocVariables>> {
        Ok(self.variables.lock().get(&doc_id).cloned())
    }

    async fn save_final_output(
        &self,
        run_id: Uuid,
        doc_id: Uuid,
        text: &str,
        variables: &DocVariables,
    ) -> Result<()> {
        self.outputs.lock().insert(run_id, text.to_string());
        self.variables.lock().insert(doc_id, variables.clone());
        Ok(())
    }

    async fn save_run_status(&self, run_id: Uuid, status: &str) -> Result<()> {
        self.statuses.lock().insert(run_id, status.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::{PromptSpec, StepId, StepStatus};

    #[tokio::test]
    async fn audit_records_accumulate_per_run() {
        let persistence = InMemoryPersistence::new();
        let run_id = Uuid::new_v4();
        let spec = PromptSpec {
            goal: "test".into(),
            constraints: vec![],
            materials: vec![],
            output_format: "none".into(),
        };
        let record = AuditRecord::new(StepId::Controller, spec, StepStatus::Success);
        persistence
            .append_audit_record(run_id, &record)
            .await
            .unwrap();
        persistence
            .append_audit_record(run_id, &record)
            .await
            .unwrap();

        assert_eq!(persistence.audit_trail(run_id).len(), 2);
        assert!(persistence.audit_trail(Uuid::new_v4()).is_empty());
    }

    #[tokio::test]
    async fn seeded_variables_come_back() {
        let persistence = InMemoryPersistence::new();
        let doc_id = Uuid::new_v4();
        let mut vars = DocVariables::new();
        vars.set("doc_type", serde_json::json!("report"));
        persistence.seed_variables(doc_id, vars);

        let loaded = persistence.load_latest_variables(doc_id).await.unwrap();
        assert_eq!(loaded.unwrap().doc_type(), Some("report"));
        assert!(persistence
            .load_latest_variables(Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }
}
