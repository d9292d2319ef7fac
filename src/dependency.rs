//! Dependency type codec between widget codes and backend `sub_type` values.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Relationship between a predecessor and a successor task.
///
/// The widget numbers these 0-3; the backend stores a two-letter `sub_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub enum DependencyType {
    StartToStart,
    FinishToFinish,
    FinishToStart,
    StartToFinish,
}

impl DependencyType {
    pub const ALL: [DependencyType; 4] = [
        Self::StartToStart,
        Self::FinishToFinish,
        Self::FinishToStart,
        Self::StartToFinish,
    ];

    pub fn from_backend(sub_type: &str) -> Result<Self> {
        match sub_type {
            "ss" => Ok(Self::StartToStart),
            "ff" => Ok(Self::FinishToFinish),
            "fs" => Ok(Self::FinishToStart),
            "sf" => Ok(Self::StartToFinish),
            _ => Err(SyncError::InvalidDependencyType(sub_type.to_string())),
        }
    }

    pub fn as_backend(self) -> &'static str {
        match self {
            Self::StartToStart => "ss",
            Self::FinishToFinish => "ff",
            Self::FinishToStart => "fs",
            Self::StartToFinish => "sf",
        }
    }

    pub fn from_widget(value: i64) -> Result<Self> {
        match value {
            0 => Ok(Self::StartToStart),
            1 => Ok(Self::FinishToFinish),
            2 => Ok(Self::FinishToStart),
            3 => Ok(Self::StartToFinish),
            _ => Err(SyncError::InvalidDependencyType(value.to_string())),
        }
    }

    pub fn as_widget(self) -> u8 {
        match self {
            Self::StartToStart => 0,
            Self::FinishToFinish => 1,
            Self::FinishToStart => 2,
            Self::StartToFinish => 3,
        }
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_backend())
    }
}

impl TryFrom<i64> for DependencyType {
    type Error = SyncError;

    fn try_from(value: i64) -> Result<Self> {
        Self::from_widget(value)
    }
}

impl From<DependencyType> for u8 {
    fn from(kind: DependencyType) -> Self {
        kind.as_widget()
    }
}
