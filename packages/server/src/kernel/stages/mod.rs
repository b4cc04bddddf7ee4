//! Stage tracking for multi-stage asset processing.
//!
//! A job declares its stage list up front, a processor drives the stages
//! sequentially, and one mid-flight extension lets an early stage pick the
//! downstream branch. Transitions fan out live through the stream hub and
//! mirror onto the asset record.

mod reporter;
mod stage;
mod status_store;

pub use reporter::{ProcessingReporter, ReporterError};
pub use stage::{Stage, StageEvent, StageStatus};
pub use status_store::{AssetStatusStore, MemoryAssetStatusStore, StatusUpdate};
