//! Real-time pipeline: control surface, worker task, events and status.

pub mod coordinator;
pub mod messages;
pub mod status;

pub use coordinator::VadPipeline;
pub use messages::{EventRecord, SpeechSegment, VadEvent};
pub use status::{PipelineStatus, StatusSnapshot};
