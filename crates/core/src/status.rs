// Task status
//
// Derived view of a task's lifecycle stage. Status is never stored:
// the queue computes it from the active registry and the persisted record.

use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Lifecycle stage of a submitted task.
/// - `In Queue`: persisted, not yet picked up by a worker
/// - `Run`: occupying a registry slot on a worker
/// - `Completed`: finished, final timing persisted
/// - `Failed`: the work returned an error or panicked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub enum TaskStatus {
    #[serde(rename = "In Queue")]
    InQueue,
    #[serde(rename = "Run")]
    Running,
    #[serde(rename = "Completed")]
    Completed,
    #[serde(rename = "Failed")]
    Failed,
}

impl TaskStatus {
    /// Returns true once no further transition can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Position in the lifecycle, used to check that observed
    /// transitions only move forward.
    pub fn rank(&self) -> u8 {
        match self {
            Self::InQueue => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed => 2,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::InQueue => write!(f, "In Queue"),
            TaskStatus::Running => write!(f, "Run"),
            TaskStatus::Completed => write!(f, "Completed"),
            TaskStatus::Failed => write!(f, "Failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::InQueue).unwrap(),
            "\"In Queue\""
        );
        assert_eq!(
            serde_json::to_string(&TaskStatus::Running).unwrap(),
            "\"Run\""
        );
        assert_eq!(TaskStatus::Completed.to_string(), "Completed");
    }

    #[test]
    fn test_rank_orders_lifecycle() {
        assert!(TaskStatus::InQueue.rank() < TaskStatus::Running.rank());
        assert!(TaskStatus::Running.rank() < TaskStatus::Completed.rank());
        assert_eq!(TaskStatus::Completed.rank(), TaskStatus::Failed.rank());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }
}
