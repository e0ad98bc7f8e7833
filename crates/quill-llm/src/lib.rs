//! # quill-llm
//!
//! The model gateway seam for the Quill pipeline. Defines the
//! [`ModelGateway`] trait every vendor adapter implements, the request and
//! stream-chunk types the steps speak, and a [`mock::MockGateway`] for
//! deterministic tests.

pub mod gateway;
pub mod mock;

pub use gateway::{GatewayRequest, ModelGateway, Reasoned, StreamChunk, Thinking};
pub use mock::MockGateway;
