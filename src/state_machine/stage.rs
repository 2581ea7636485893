use std::fmt;

use serde::{Deserialize, Serialize};

/// The stages of a video generation job.
///
/// Each job flows through: CREATED → PROCESSING_TEXT → GENERATING_AUDIO →
/// GENERATING_VIDEO → CONCATENATING → COMPLETED. `Failed` is reachable from
/// every non-terminal stage. No stage is ever revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Created,
    ProcessingText,
    GeneratingAudio,
    GeneratingVideo,
    Concatenating,
    Completed,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }

    /// The successor on the success path, `None` for terminal stages.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Created => Some(Stage::ProcessingText),
            Stage::ProcessingText => Some(Stage::GeneratingAudio),
            Stage::GeneratingAudio => Some(Stage::GeneratingVideo),
            Stage::GeneratingVideo => Some(Stage::Concatenating),
            Stage::Concatenating => Some(Stage::Completed),
            Stage::Completed | Stage::Failed => None,
        }
    }

    pub fn can_transition_to(self, to: Stage) -> bool {
        match to {
            Stage::Failed => !self.is_terminal(),
            _ => self.next() == Some(to),
        }
    }

    /// Checkpoint reported when the stage is entered.
    pub fn entry_percent(self) -> u8 {
        match self {
            Stage::Created => 0,
            Stage::ProcessingText => 5,
            Stage::GeneratingAudio => 25,
            Stage::GeneratingVideo => 55,
            Stage::Concatenating => 90,
            Stage::Completed => 100,
            Stage::Failed => 0,
        }
    }

    /// Checkpoint reported when the stage's work is done.
    pub fn exit_percent(self) -> u8 {
        match self {
            Stage::ProcessingText => 20,
            Stage::GeneratingAudio => 50,
            Stage::GeneratingVideo => 85,
            Stage::Concatenating => 95,
            other => other.entry_percent(),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Created => "CREATED",
            Stage::ProcessingText => "PROCESSING_TEXT",
            Stage::GeneratingAudio => "GENERATING_AUDIO",
            Stage::GeneratingVideo => "GENERATING_VIDEO",
            Stage::Concatenating => "CONCATENATING",
            Stage::Completed => "COMPLETED",
            Stage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}
