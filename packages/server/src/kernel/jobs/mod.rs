//! Background job subsystem: acquisition, leases, dispatch, and retries.
//!
//! Long-lived multi-stage jobs run against user-submitted assets under one
//! of two interchangeable dispatch backends. Pipeline code never knows
//! which one is active.
//!
//! # Architecture
//!
//! ```text
//! Worker (one loop per asset type)
//!     │
//!     ├─► DispatchBackend.claim()
//!     │       ├─ BrokerQueue  — in-memory queues, per-job locks,
//!     │       │                 stall detector for crash recovery
//!     │       └─ PollQueue    — long-poll over a JobStore row lease
//!     │                         (MemoryJobStore / PostgresJobStore)
//!     ├─► AssetProcessor.process()  — drives the stage reporter,
//!     │                               admission-gated outbound fetches
//!     └─► ack / nack / reschedule   — RetryPolicy decides disposition
//! ```
//!
//! Crash recovery is symmetric: a broker lock that is never renewed stalls
//! and re-queues, a job-table lease that expires makes the row claimable
//! again. Either way at most one worker holds a job at any instant.

mod broker;
mod dispatch;
mod error;
mod job;
mod poll;
mod postgres;
mod registry;
mod retry;
mod store;
mod worker;

pub use broker::{BrokerConfig, BrokerQueue};
pub use dispatch::{BackendKind, DispatchBackend, QueueStats};
pub use error::ProcessingError;
pub use job::{AssetType, Job, JobStatus, TaskClass};
pub use poll::{PollConfig, PollQueue};
pub use postgres::PostgresJobStore;
pub use registry::{ProcessorRegistry, WorkerPool};
pub use retry::{Disposition, RetryPolicy};
pub use store::{HeartbeatOutcome, JobStore, MemoryJobStore, QueueCounts};
pub use worker::{AssetProcessor, JobContext, Worker, WorkerConfig};
