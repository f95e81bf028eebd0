//! Attempt lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a transaction attempt, as stored in its transaction record.
///
/// ```text
/// NotStarted -> Pending -> Committed -> Completed
///                  \-> Aborted -> RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    /// No mutation staged yet.
    NotStarted,
    /// Mutations are staged; the record exists.
    Pending,
    /// Rollback has begun.
    Aborted,
    /// The commit point has passed; unstaging may still be running.
    Committed,
    /// Every mutation has been unstaged.
    Completed,
    /// Every staging has been removed.
    RolledBack,
}

impl AttemptState {
    /// Whether the attempt can still read and stage.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::NotStarted | Self::Pending)
    }

    /// Whether the attempt's changes are (or will be) visible.
    #[must_use]
    pub const fn is_committed(self) -> bool {
        matches!(self, Self::Committed | Self::Completed)
    }

    /// Canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Pending => "pending",
            Self::Aborted => "aborted",
            Self::Committed => "committed",
            Self::Completed => "completed",
            Self::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_names_match_display() {
        for state in [
            AttemptState::NotStarted,
            AttemptState::Pending,
            AttemptState::Aborted,
            AttemptState::Committed,
            AttemptState::Completed,
            AttemptState::RolledBack,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{state}\""));
        }
    }

    #[test]
    fn classification() {
        assert!(AttemptState::Pending.is_active());
        assert!(!AttemptState::Committed.is_active());
        assert!(AttemptState::Completed.is_committed());
        assert!(!AttemptState::RolledBack.is_committed());
    }
}
