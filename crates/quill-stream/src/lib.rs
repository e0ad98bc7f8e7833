//! # quill-stream
//!
//! Stream shaping for the Quill pipeline: the chat/plan demultiplexer that
//! splits one model stream on in-band markers, and the capped thinking
//! preview surfaced to observers.

pub mod splitter;
pub mod thinking;

pub use splitter::{Channel, StreamSplitter};
pub use thinking::ThinkingPreview;
