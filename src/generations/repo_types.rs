use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "generation_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GenerationKind {
    TextToVideo,
    ImageToVideo,
}

impl GenerationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextToVideo => "text_to_video",
            Self::ImageToVideo => "image_to_video",
        }
    }
}

impl FromStr for GenerationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text_to_video" => Ok(Self::TextToVideo),
            "image_to_video" => Ok(Self::ImageToVideo),
            other => Err(format!("unknown generation type: {other}")),
        }
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job status. Moves forward only; `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "generation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl GenerationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(self, next: GenerationStatus) -> bool {
        use GenerationStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Failed) | (Processing, Completed) | (Processing, Failed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row from the `generations` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Generation {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: GenerationKind,
    pub prompt: String,
    pub status: GenerationStatus,
    pub video_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub credits_used: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Insert shape: id and timestamps are assigned by the database.
#[derive(Debug, Clone)]
pub struct NewGeneration {
    pub user_id: Uuid,
    pub kind: GenerationKind,
    pub prompt: String,
    pub metadata: serde_json::Value,
    pub credits_used: i32,
}

/// Fields written alongside a status change. `None` leaves a column as is.
#[derive(Debug, Clone, Default)]
pub struct GenerationUpdate {
    pub video_url: Option<String>,
    pub thumbnail_url: Option<String>,
    /// Merged into the existing metadata object.
    pub metadata: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use GenerationStatus::*;

    #[test]
    fn only_forward_transitions_are_allowed() {
        let all = [Pending, Processing, Completed, Failed];
        let allowed = [
            (Pending, Processing),
            (Pending, Failed),
            (Processing, Completed),
            (Processing, Failed),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for s in [Completed, Failed] {
            assert!(s.is_terminal());
            for to in [Pending, Processing, Completed, Failed] {
                assert!(!s.can_transition_to(to));
            }
        }
    }

    #[test]
    fn kind_parses_wire_literals() {
        assert_eq!("text_to_video".parse::<GenerationKind>(), Ok(GenerationKind::TextToVideo));
        assert_eq!("image_to_video".parse::<GenerationKind>(), Ok(GenerationKind::ImageToVideo));
        assert!("video".parse::<GenerationKind>().is_err());
    }
}
