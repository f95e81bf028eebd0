//! Durability levels.
//!
//! A document is owned by one active node and up to `replicas` replica nodes.
//! The durability level decides how many of those copies must have applied a
//! write, and how many must have synced it to their journal, before the write
//! is acknowledged.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How many copies must acknowledge a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurabilityLevel {
    /// The active copy applied the write in memory.
    #[default]
    None,
    /// A majority of copies applied the write in memory.
    Majority,
    /// A majority applied it and the active copy synced it.
    MajorityAndPersistOnMaster,
    /// A majority applied and synced it.
    PersistToMajority,
}

/// Number of copies forming a majority of `copies`.
#[must_use]
pub const fn majority(copies: usize) -> usize {
    copies / 2 + 1
}

impl DurabilityLevel {
    /// Copies that must be online and apply the write.
    #[must_use]
    pub const fn required_acks(self, copies: usize) -> usize {
        match self {
            Self::None => 1,
            Self::Majority | Self::MajorityAndPersistOnMaster | Self::PersistToMajority => {
                majority(copies)
            }
        }
    }

    /// Copies, counted from the active one, that must sync their journal.
    #[must_use]
    pub const fn required_persists(self, copies: usize) -> usize {
        match self {
            Self::None | Self::Majority => 0,
            Self::MajorityAndPersistOnMaster => 1,
            Self::PersistToMajority => majority(copies),
        }
    }

    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Majority => "majority",
            Self::MajorityAndPersistOnMaster => "majority_and_persist_on_master",
            Self::PersistToMajority => "persist_to_majority",
        }
    }
}

impl fmt::Display for DurabilityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DurabilityLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "none" => Ok(Self::None),
            "majority" => Ok(Self::Majority),
            "majority_and_persist_on_master" | "majority_and_persist_to_active" => {
                Ok(Self::MajorityAndPersistOnMaster)
            }
            "persist_to_majority" => Ok(Self::PersistToMajority),
            other => Err(CoreError::invalid_argument(format!(
                "unknown durability level: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn majority_of_copies() {
        assert_eq!(majority(1), 1);
        assert_eq!(majority(2), 2);
        assert_eq!(majority(3), 2);
        assert_eq!(majority(4), 3);
    }

    #[test]
    fn ack_and_persist_requirements() {
        assert_eq!(DurabilityLevel::None.required_acks(3), 1);
        assert_eq!(DurabilityLevel::None.required_persists(3), 0);
        assert_eq!(DurabilityLevel::Majority.required_acks(3), 2);
        assert_eq!(DurabilityLevel::Majority.required_persists(3), 0);
        assert_eq!(DurabilityLevel::MajorityAndPersistOnMaster.required_persists(3), 1);
        assert_eq!(DurabilityLevel::PersistToMajority.required_persists(3), 2);
    }

    #[test]
    fn parses_names_with_dashes_or_underscores() {
        assert_eq!(
            "persist-to-majority".parse::<DurabilityLevel>().unwrap(),
            DurabilityLevel::PersistToMajority
        );
        assert_eq!(
            "MAJORITY_AND_PERSIST_ON_MASTER".parse::<DurabilityLevel>().unwrap(),
            DurabilityLevel::MajorityAndPersistOnMaster
        );
        assert!("quorum".parse::<DurabilityLevel>().is_err());
    }

    #[test]
    fn display_roundtrips() {
        for level in [
            DurabilityLevel::None,
            DurabilityLevel::Majority,
            DurabilityLevel::MajorityAndPersistOnMaster,
            DurabilityLevel::PersistToMajority,
        ] {
            assert_eq!(level.to_string().parse::<DurabilityLevel>().unwrap(), level);
        }
    }
}
