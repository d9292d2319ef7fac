#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use gantt_sync::error::{Result, SyncError};
use gantt_sync::table::{TableApi, TableQuery};

pub const PROJECT: &str = "proj1";

#[derive(Default)]
struct Inner {
    tables: BTreeMap<String, Vec<Map<String, Value>>>,
    calls: Vec<String>,
    next_id: u32,
    /// `"METHOD table"` prefixes that should fail.
    failing: Vec<String>,
}

/// In-memory stand-in for the table API. Every call is logged as
/// `METHOD table[/id]`.
#[derive(Default)]
pub struct MemoryTable {
    inner: Mutex<Inner>,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, table: &str, row: Value) {
        let Value::Object(row) = row else {
            panic!("rows must be objects");
        };
        let mut inner = self.inner.lock().unwrap();
        inner.tables.entry(table.to_string()).or_default().push(row);
    }

    pub fn fail_on(&self, call_prefix: &str) {
        self.inner.lock().unwrap().failing.push(call_prefix.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        let inner = self.inner.lock().unwrap();
        inner
            .tables
            .get(table)
            .map(|rows| rows.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    pub fn row(&self, table: &str, sys_id: &str) -> Option<Value> {
        self.rows(table)
            .into_iter()
            .find(|row| row["sys_id"] == json!(sys_id))
    }

    fn log(&self, call: String) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let fails = inner.failing.iter().any(|prefix| call.starts_with(prefix));
        inner.calls.push(call.clone());
        if fails {
            return Err(SyncError::BackendRequestFailed(format!("{call}: 500")));
        }
        Ok(())
    }
}

fn column_matches(row: &Map<String, Value>, column: &str, value: &str) -> bool {
    let column = if column == "sub_tree_root" { "project" } else { column };
    match row.get(column) {
        Some(Value::String(s)) => s == value,
        Some(Value::Object(reference)) => reference.get("value") == Some(&json!(value)),
        _ => false,
    }
}

#[async_trait]
impl TableApi for MemoryTable {
    async fn query(&self, table: &str, query: &TableQuery) -> Result<Vec<Value>> {
        self.log(format!("GET {table}"))?;
        let inner = self.inner.lock().unwrap();
        let rows = inner.tables.get(table).cloned().unwrap_or_default();
        Ok(rows
            .into_iter()
            .filter(|row| {
                query
                    .filters
                    .iter()
                    .all(|(column, value)| column_matches(row, column, value))
            })
            .map(Value::Object)
            .collect())
    }

    async fn fetch(&self, table: &str, sys_id: &str) -> Result<Value> {
        self.log(format!("GET {table}/{sys_id}"))?;
        self.row(table, sys_id)
            .ok_or_else(|| SyncError::BackendRequestFailed(format!("{table}/{sys_id}: 404")))
    }

    async fn create(&self, table: &str, body: Value) -> Result<Value> {
        self.log(format!("POST {table}"))?;
        let Value::Object(mut row) = body else {
            return Err(SyncError::BackendRequestFailed("body must be an object".into()));
        };
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let sys_id = format!("sys{}", inner.next_id);
        row.insert("sys_id".into(), json!(sys_id));
        inner
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        Ok(Value::Object(row))
    }

    async fn update(&self, table: &str, sys_id: &str, body: Value) -> Result<Value> {
        self.log(format!("PATCH {table}/{sys_id}"))?;
        let mut inner = self.inner.lock().unwrap();
        let row = inner
            .tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|row| row["sys_id"] == json!(sys_id)))
            .ok_or_else(|| SyncError::BackendRequestFailed(format!("{table}/{sys_id}: 404")))?;
        if let Value::Object(changes) = body {
            row.extend(changes);
        }
        Ok(Value::Object(row.clone()))
    }

    async fn delete(&self, table: &str, sys_id: &str) -> Result<()> {
        self.log(format!("DELETE {table}/{sys_id}"))?;
        let mut inner = self.inner.lock().unwrap();
        let rows = inner.tables.entry(table.to_string()).or_default();
        let before = rows.len();
        rows.retain(|row| row["sys_id"] != json!(sys_id));
        if rows.len() == before {
            return Err(SyncError::BackendRequestFailed(format!("{table}/{sys_id}: 404")));
        }
        Ok(())
    }
}

/// A project with two tasks; `t2` follows `t1` with a one-day lag.
pub fn seeded() -> MemoryTable {
    let table = MemoryTable::new();
    table.insert(
        "pm_project",
        json!({
            "sys_id": PROJECT,
            "short_description": "Launch",
            "start_date": "2024-01-01 08:00:00",
            "end_date": "2024-01-31 17:00:00",
            "wbs_order": "",
            "percent_complete": "10",
            "description": "",
            "status": "green",
            "override_status": "false"
        }),
    );
    table.insert(
        "pm_project_task",
        json!({
            "sys_id": "t2",
            "short_description": "Build",
            "parent": {"link": "https://x/api/now/table/pm_project/proj1", "value": PROJECT},
            "project": PROJECT,
            "start_date": "2024-01-05 08:00:00",
            "end_date": "2024-01-10 17:00:00",
            "wbs_order": "2",
            "percent_complete": "0",
            "description": "",
            "status": "",
            "override_status": "0",
            "relation_applied": {"link": "https://x/r1", "value": "r1"},
            "relation_applied.parent": "t1",
            "relation_applied.lag": "1970-01-02 00:00:00",
            "relation_applied.sub_type": "fs"
        }),
    );
    table.insert(
        "pm_project_task",
        json!({
            "sys_id": "t1",
            "short_description": "Design",
            "parent": PROJECT,
            "project": PROJECT,
            "start_date": "2024-01-01 08:00:00",
            "end_date": "2024-01-04 17:00:00",
            "wbs_order": "1",
            "percent_complete": "100",
            "description": "Sketches",
            "status": "green",
            "override_status": "1",
            "relation_applied": ""
        }),
    );
    table.insert(
        "planned_task_rel_planned_task",
        json!({
            "sys_id": "r1",
            "parent": {"link": "https://x/t1", "value": "t1"},
            "child": {"link": "https://x/t2", "value": "t2"},
            "sub_type": "fs",
            "lag": "1970-01-02 00:00:00"
        }),
    );
    table
}
