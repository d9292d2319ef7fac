//! Tables mapping widget record fields onto backend columns.

use serde_json::{Map, Value};

use crate::convert::to_backend_timestamp;
use crate::error::{Result, SyncError};
use crate::model::Record;
use crate::wire::{flag_to_wire, value_to_flag, value_to_int_wire};

/// How a widget value is written into its backend column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Text,
    Timestamp,
    Reference,
    Integer,
    Flag,
    /// Forwarded untouched; the caller rewrites it.
    Passthrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    pub field: &'static str,
    pub column: &'static str,
    pub encoding: Encoding,
}

const fn map(field: &'static str, column: &'static str, encoding: Encoding) -> FieldMapping {
    FieldMapping {
        field,
        column,
        encoding,
    }
}

pub const TASK_FIELDS: &[FieldMapping] = &[
    map("name", "short_description", Encoding::Text),
    map("startDate", "start_date", Encoding::Timestamp),
    map("endDate", "end_date", Encoding::Timestamp),
    map("parentId", "parent", Encoding::Reference),
    map("duration", "duration", Encoding::Passthrough),
    map("parentIndex", "wbs_order", Encoding::Integer),
    map("percentDone", "percent_complete", Encoding::Integer),
    map("note", "description", Encoding::Text),
    map("status", "status", Encoding::Text),
    map("override_status", "override_status", Encoding::Flag),
    map("overrideStatus", "override_status", Encoding::Flag),
];

/// `type`, `lag` and `lagUnit` are not listed: the relation codecs recompute
/// `sub_type` and `lag` from them.
pub const DEPENDENCY_FIELDS: &[FieldMapping] = &[
    map("from", "parent", Encoding::Reference),
    map("fromEvent", "parent", Encoding::Reference),
    map("to", "child", Encoding::Reference),
    map("toEvent", "child", Encoding::Reference),
];

pub fn lookup(table: &'static [FieldMapping], field: &str) -> Option<&'static FieldMapping> {
    table.iter().find(|m| m.field == field)
}

fn encode(mapping: &FieldMapping, value: &Value) -> Result<Value> {
    let encoded = match mapping.encoding {
        Encoding::Passthrough => return Ok(value.clone()),
        Encoding::Text | Encoding::Reference => match value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
        Encoding::Timestamp => match value {
            Value::Null => String::new(),
            Value::String(s) => to_backend_timestamp(s)?,
            other => return Err(SyncError::InvalidDate(other.to_string())),
        },
        Encoding::Integer => value_to_int_wire(mapping.column, value)?,
        Encoding::Flag => flag_to_wire(value_to_flag(mapping.column, value)?).to_string(),
    };
    Ok(Value::String(encoded))
}

/// Build a backend update body from the changed widget fields. Fields with no
/// mapping are dropped.
pub fn map_fields(table: &'static [FieldMapping], record: &Record) -> Result<Map<String, Value>> {
    let mut body = Map::new();
    for (field, value) in record {
        match lookup(table, field) {
            Some(mapping) => {
                body.insert(mapping.column.to_string(), encode(mapping, value)?);
            }
            None => log::trace!("dropping unmapped field '{field}'"),
        }
    }
    Ok(body)
}
