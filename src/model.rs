//! Widget-side records and the load/sync envelopes exchanged with the widget's
//! client-side store.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dependency::DependencyType;
use crate::error::{Result, SyncError};
use crate::lag::Lag;

/// Health flag shown on each task bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Red,
    Yellow,
    Green,
}

impl TaskStatus {
    /// An unset backend status reads as the widget's default, red.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "" | "red" => Ok(Self::Red),
            "yellow" => Ok(Self::Yellow),
            "green" => Ok(Self::Green),
            _ => Err(SyncError::InvalidField {
                field: "status",
                value: s.to_string(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Yellow => "yellow",
            Self::Green => "green",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetTask {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub parent_index: i64,
    pub percent_done: i64,
    pub note: String,
    pub status: TaskStatus,
    /// Sent as 0/1 under the field name the widget's task model declares.
    #[serde(
        rename = "override_status",
        alias = "overrideStatus",
        serialize_with = "crate::wire::serialize_flag_as_int",
        deserialize_with = "crate::wire::deserialize_flag"
    )]
    pub override_status: bool,
    pub manually_scheduled: bool,
    pub expanded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetDependency {
    pub id: String,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: DependencyType,
    #[serde(flatten)]
    pub lag: Lag,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rows<T> {
    pub rows: Vec<T>,
}

/// Everything the widget needs to render one project.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectData {
    pub tasks: Vec<WidgetTask>,
    pub dependencies: Vec<WidgetDependency>,
}

#[derive(Debug, Serialize)]
pub struct LoadResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Rows<WidgetTask>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Rows<WidgetDependency>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LoadResponse {
    pub fn ok(data: ProjectData) -> Self {
        Self {
            success: true,
            tasks: Some(Rows { rows: data.tasks }),
            dependencies: Some(Rows {
                rows: data.dependencies,
            }),
            message: None,
        }
    }

    pub fn failed(message: &str) -> Self {
        Self {
            success: false,
            tasks: None,
            dependencies: None,
            message: Some(message.to_string()),
        }
    }
}

/// A raw widget record as it arrives in a sync batch. Updates carry only the
/// changed fields plus `id`, so these stay untyped until an operation needs
/// them.
pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChangeSet {
    #[serde(default)]
    pub added: Vec<Record>,
    #[serde(default)]
    pub updated: Vec<Record>,
    #[serde(default)]
    pub removed: Vec<Record>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    #[serde(default)]
    pub request_id: Value,
    pub tasks: Option<ChangeSet>,
    pub dependencies: Option<ChangeSet>,
}

/// Identifier substitution reported back so the client store can re-key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdRemap {
    /// A phantom record was created and now has a backend id.
    Created {
        #[serde(rename = "$PhantomId")]
        phantom_id: String,
        id: String,
    },
    /// A relation was recreated under a new id.
    Replaced {
        #[serde(rename = "oldId")]
        old_id: String,
        #[serde(rename = "newId")]
        new_id: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub request_id: Value,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Rows<IdRemap>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Rows<IdRemap>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SyncResponse {
    /// Remap lists are only included when they have entries.
    pub fn ok(request_id: Value, tasks: Vec<IdRemap>, dependencies: Vec<IdRemap>) -> Self {
        let rows = |rows: Vec<IdRemap>| (!rows.is_empty()).then_some(Rows { rows });
        Self {
            request_id,
            success: true,
            tasks: rows(tasks),
            dependencies: rows(dependencies),
            message: None,
        }
    }

    pub fn failed(request_id: Value, message: &str) -> Self {
        Self {
            request_id,
            success: false,
            tasks: None,
            dependencies: None,
            message: Some(message.to_string()),
        }
    }
}
