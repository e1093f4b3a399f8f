//! Pipeline state machine
//!
//! `Pending -> Chunking -> Extracting(i/N) -> Resolving -> Assembling -> Completed`,
//! with `Failed` reachable from any step on a fatal error and `Cancelled`
//! ending a run whose cancellation token fired.

use serde::{Deserialize, Serialize};

/// Where a run currently is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Pending,
    Chunking,
    Extracting {
        completed: usize,
        total: usize,
    },
    Resolving,
    Assembling,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineState {
    /// Progress from 0 to 100.
    ///
    /// Extraction spans 10 to 80 in proportion to finished chunks.
    pub fn progress_percent(&self) -> u8 {
        match *self {
            Self::Pending => 0,
            Self::Chunking => 5,
            Self::Extracting { completed, total } => {
                if total == 0 {
                    80
                } else {
                    (10 + 70 * completed.min(total) / total) as u8
                }
            }
            Self::Resolving => 85,
            Self::Assembling => 95,
            Self::Completed | Self::Failed | Self::Cancelled => 100,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Chunking => write!(f, "chunking"),
            Self::Extracting { completed, total } => write!(f, "extracting ({completed}/{total})"),
            Self::Resolving => write!(f, "resolving"),
            Self::Assembling => write!(f, "assembling"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        assert_eq!(PipelineState::Pending.progress_percent(), 0);
        assert_eq!(
            PipelineState::Extracting {
                completed: 0,
                total: 4
            }
            .progress_percent(),
            10
        );
        assert_eq!(
            PipelineState::Extracting {
                completed: 2,
                total: 4
            }
            .progress_percent(),
            45
        );
        assert_eq!(
            PipelineState::Extracting {
                completed: 4,
                total: 4
            }
            .progress_percent(),
            80
        );
        assert_eq!(PipelineState::Cancelled.progress_percent(), 100);
    }

    #[test]
    fn test_state_serialization() {
        let value = serde_json::to_value(PipelineState::Extracting {
            completed: 1,
            total: 3,
        })
        .unwrap();
        assert_eq!(value["phase"], "extracting");
        assert_eq!(value["completed"], 1);

        assert_eq!(PipelineState::Resolving.to_string(), "resolving");
        assert!(PipelineState::Failed.is_terminal());
        assert!(!PipelineState::Assembling.is_terminal());
    }
}
