//! Typed boundary over the backend's string-encoded columns.
//!
//! The table API hands back every value as a string: integers as `"3"`,
//! booleans as `"0"`/`"1"` (or `"true"`/`"false"`), references either as a bare
//! id or as `{"link": .., "value": id}`, and unset columns as `""`. Raw rows are
//! deserialized leniently here and converted once into typed rows; translators
//! never parse strings themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer};
use serde_json::Value;

use crate::convert::from_backend_timestamp;
use crate::dependency::DependencyType;
use crate::error::{Result, SyncError};
use crate::lag::{decode_lag, Lag};
use crate::model::TaskStatus;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawReference {
    Link { value: String },
    Plain(String),
}

/// Reference column: `""`, `null` and `{"value": ""}` all mean unset.
pub fn deserialize_reference<'de, D>(d: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawReference>::deserialize(d)?;
    Ok(match raw {
        Some(RawReference::Link { value }) | Some(RawReference::Plain(value))
            if !value.is_empty() =>
        {
            Some(value)
        }
        _ => None,
    })
}

/// Scalar column read as text; `null` becomes empty, numbers and booleans
/// are rendered.
pub fn deserialize_text<'de, D>(d: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(d)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Object(map) => match map.get("value") {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        },
        other => other.to_string(),
    })
}

/// Record identifier, which the widget may send as a string or a number.
pub fn deserialize_id<'de, D>(d: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid record id {other}"))),
    }
}

pub fn deserialize_flag<'de, D>(d: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(d)?;
    value_to_flag("override_status", &value).map_err(serde::de::Error::custom)
}

pub fn deserialize_optional_flag<'de, D>(d: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(d)? {
        Value::Null => Ok(None),
        value => value_to_flag("override_status", &value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

pub fn serialize_flag_as_int<S>(flag: &bool, s: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    s.serialize_u8(u8::from(*flag))
}

/// Integer column. Unset reads as 0; a decimal is truncated.
pub fn parse_int(field: &'static str, raw: &str) -> Result<i64> {
    let s = raw.trim();
    if s.is_empty() {
        return Ok(0);
    }
    if let Ok(n) = s.parse::<i64>() {
        return Ok(n);
    }
    match s.parse::<f64>() {
        Ok(f) if f.is_finite() => Ok(f.trunc() as i64),
        _ => Err(SyncError::InvalidField {
            field,
            value: raw.to_string(),
        }),
    }
}

/// Boolean column.
pub fn parse_flag(field: &'static str, raw: &str) -> Result<bool> {
    match raw.trim() {
        "" | "0" | "false" => Ok(false),
        "1" | "true" => Ok(true),
        _ => Err(SyncError::InvalidField {
            field,
            value: raw.to_string(),
        }),
    }
}

/// Timestamp column; unset reads as `None`.
pub fn parse_timestamp(raw: &str) -> Result<Option<DateTime<Utc>>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    from_backend_timestamp(raw).map(Some)
}

/// Widget-side boolean in any of the shapes the store may send.
pub fn value_to_flag(field: &'static str, value: &Value) -> Result<bool> {
    match value {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) => parse_flag(field, s),
        other => Err(SyncError::InvalidField {
            field,
            value: other.to_string(),
        }),
    }
}

pub fn flag_to_wire(flag: bool) -> &'static str {
    if flag {
        "1"
    } else {
        "0"
    }
}

/// Widget-side number (or numeric string) as a backend integer string.
pub fn value_to_int_wire(field: &'static str, value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok(String::new()),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => Ok(i.to_string()),
            (None, Some(f)) => Ok((f.trunc() as i64).to_string()),
            _ => Err(SyncError::InvalidField {
                field,
                value: n.to_string(),
            }),
        },
        Value::String(s) => parse_int(field, s).map(|n| n.to_string()),
        other => Err(SyncError::InvalidField {
            field,
            value: other.to_string(),
        }),
    }
}

/// Columns shared by the project row and every task row.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawProjectRow {
    #[serde(default, deserialize_with = "deserialize_text")]
    pub sys_id: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub short_description: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub start_date: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub end_date: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub wbs_order: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub percent_complete: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub description: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub status: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub override_status: String,
}

/// A task row with its dot-walked inbound relation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTaskRow {
    #[serde(flatten)]
    pub columns: RawProjectRow,
    #[serde(default, deserialize_with = "deserialize_reference")]
    pub parent: Option<String>,
    #[serde(default, deserialize_with = "deserialize_reference")]
    pub relation_applied: Option<String>,
    #[serde(
        default,
        rename = "relation_applied.parent",
        deserialize_with = "deserialize_reference"
    )]
    pub relation_parent: Option<String>,
    #[serde(
        default,
        rename = "relation_applied.lag",
        deserialize_with = "deserialize_text"
    )]
    pub relation_lag: String,
    #[serde(
        default,
        rename = "relation_applied.sub_type",
        deserialize_with = "deserialize_text"
    )]
    pub relation_sub_type: String,
}

/// A row of the relation table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawRelationRow {
    #[serde(default, deserialize_with = "deserialize_text")]
    pub sys_id: String,
    #[serde(default, deserialize_with = "deserialize_reference")]
    pub parent: Option<String>,
    #[serde(default, deserialize_with = "deserialize_reference")]
    pub child: Option<String>,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub sub_type: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub lag: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendRelation {
    pub sys_id: String,
    pub predecessor: String,
    pub kind: DependencyType,
    pub lag: Lag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendTask {
    pub sys_id: String,
    pub name: String,
    pub parent: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub wbs_order: i64,
    pub percent_complete: i64,
    pub description: String,
    pub status: TaskStatus,
    pub override_status: bool,
    pub relation: Option<BackendRelation>,
}

/// A stored relation, read back when an update needs its previous values.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendRelationRecord {
    pub sys_id: String,
    pub predecessor: Option<String>,
    pub successor: Option<String>,
    pub kind: Option<DependencyType>,
    /// Encoded lag exactly as stored.
    pub lag: String,
}

impl TryFrom<RawProjectRow> for BackendTask {
    type Error = SyncError;

    fn try_from(raw: RawProjectRow) -> Result<Self> {
        if raw.sys_id.is_empty() {
            return Err(SyncError::InvalidField {
                field: "sys_id",
                value: String::new(),
            });
        }
        Ok(Self {
            start_date: parse_timestamp(&raw.start_date)?,
            end_date: parse_timestamp(&raw.end_date)?,
            wbs_order: parse_int("wbs_order", &raw.wbs_order)?,
            percent_complete: parse_int("percent_complete", &raw.percent_complete)?.clamp(0, 100),
            status: TaskStatus::parse(&raw.status)?,
            override_status: parse_flag("override_status", &raw.override_status)?,
            sys_id: raw.sys_id,
            name: raw.short_description,
            parent: None,
            description: raw.description,
            relation: None,
        })
    }
}

impl TryFrom<RawTaskRow> for BackendTask {
    type Error = SyncError;

    fn try_from(raw: RawTaskRow) -> Result<Self> {
        let relation = match raw.relation_applied {
            Some(sys_id) => {
                let predecessor = raw.relation_parent.ok_or_else(|| SyncError::InvalidField {
                    field: "relation_applied.parent",
                    value: String::new(),
                })?;
                Some(BackendRelation {
                    sys_id,
                    predecessor,
                    kind: DependencyType::from_backend(&raw.relation_sub_type)?,
                    lag: decode_lag(&raw.relation_lag)?,
                })
            }
            None => None,
        };
        let mut task = BackendTask::try_from(raw.columns)?;
        task.parent = raw.parent;
        task.relation = relation;
        Ok(task)
    }
}

impl TryFrom<RawRelationRow> for BackendRelationRecord {
    type Error = SyncError;

    fn try_from(raw: RawRelationRow) -> Result<Self> {
        let kind = match raw.sub_type.as_str() {
            "" => None,
            other => Some(DependencyType::from_backend(other)?),
        };
        Ok(Self {
            sys_id: raw.sys_id,
            predecessor: raw.parent,
            successor: raw.child,
            kind,
            lag: raw.lag,
        })
    }
}

/// Pull the backend-assigned `sys_id` out of a create response.
pub fn created_sys_id(created: &Value) -> Result<String> {
    match created.get("sys_id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        _ => Err(SyncError::BackendRequestFailed(
            "create response carried no sys_id".to_string(),
        )),
    }
}
