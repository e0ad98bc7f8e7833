//! # quill-core
//!
//! Core types for the Quill document-production pipeline. This crate defines
//! the shared vocabulary used by every other crate in the workspace: the run
//! state threaded through pipeline steps, the audit trail, the observer event
//! stream, configuration, and the unified error type.

pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod skill;
pub mod state;

pub use config::QuillConfig;
pub use error::{QuillError, Result};
pub use event::{EventBus, RunEvent};
pub use message::{ChatMessage, Role};
pub use skill::{Skill, SkillKind, SkillStatus};
pub use state::{
    Artifact, ArtifactKind, Attachment, AuditRecord, DocVariables, ErrorInfo, ErrorKind,
    GeneratedImage, ItemError, Placeholder, PromptSpec, RunState, StepId, StepStatus,
};
