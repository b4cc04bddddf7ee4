//! Stage records and the events their transitions emit.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle of a single stage: `pending → processing → {completed|failed}`.
/// Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Failed)
    }
}

/// One named unit of work in a job's pipeline.
///
/// Stage order in the owning job reflects execution order. `progress` is
/// monotone within the processing state; `artifacts` accumulate on
/// completion.
#[derive(Debug, Clone, Serialize)]
pub struct Stage {
    pub name: String,
    pub status: StageStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub artifacts: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Stage {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StageStatus::Pending,
            progress: 0,
            artifacts: Map::new(),
            error: None,
        }
    }
}

/// Live progress event, published per asset topic.
///
/// Consumers (the SSE route, a UI) reflect progress without polling the
/// job store. Failure events carry a human-readable message only.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageEvent {
    JobInitialized {
        stages: Vec<String>,
    },
    StagesAdded {
        stages: Vec<String>,
    },
    StageChanged {
        stage: String,
        status: StageStatus,
        progress: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        artifacts: Option<Map<String, Value>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    JobCompleted {
        artifacts: Map<String, Value>,
    },
    JobFailed {
        message: String,
    },
}
