//! Process-level infrastructure: the job subsystem, stage tracking, and
//! the in-process event hub.

pub mod jobs;
pub mod stages;
pub mod stream_hub;

pub use stream_hub::StreamHub;
