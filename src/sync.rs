//! Write path: apply the widget's added/updated/removed batches to the backend
//! and report identifier substitutions.
//!
//! Per entity type the phases run in order (creates, then updates, then
//! deletes); inside a phase every record is sent concurrently. Tasks are
//! applied before dependencies so that dependency endpoints naming a freshly
//! created task can be rewritten to its backend id.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::task::JoinSet;

use crate::convert::{compute_duration, compute_start_date, to_backend_timestamp, DurationUnit};
use crate::dependency::DependencyType;
use crate::error::{Result, SyncError};
use crate::fields::{map_fields, DEPENDENCY_FIELDS, TASK_FIELDS};
use crate::lag::{self, LagUnit};
use crate::model::{ChangeSet, IdRemap, Record, SyncRequest};
use crate::table::{TableApi, RELATION_TABLE, TASK_TABLE};
use crate::wire::{
    created_sys_id, deserialize_id, deserialize_optional_flag, flag_to_wire,
    BackendRelationRecord, RawRelationRow,
};

/// Remap rows produced by one sync request, per entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub tasks: Vec<IdRemap>,
    pub dependencies: Vec<IdRemap>,
}

/// Phantom ids of tasks created earlier in the same request.
#[derive(Debug, Clone, Default)]
pub struct PhantomIds(HashMap<String, String>);

impl PhantomIds {
    pub fn record(&mut self, phantom_id: &str, id: &str) {
        self.0.insert(phantom_id.to_string(), id.to_string());
    }

    fn rewrite(&self, id: &mut String) {
        if let Some(real) = self.0.get(id.as_str()) {
            *id = real.clone();
        }
    }

    fn rewrite_field(&self, record: &mut Record, field: &str) {
        if let Some(Value::String(id)) = record.get_mut(field) {
            self.rewrite(id);
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewTask {
    #[serde(rename = "$PhantomId", deserialize_with = "deserialize_id")]
    phantom_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    parent_id: Option<String>,
    start_date: String,
    end_date: String,
    #[serde(default)]
    parent_index: Option<f64>,
    #[serde(default)]
    percent_done: Option<f64>,
    #[serde(default)]
    note: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(
        default,
        rename = "override_status",
        alias = "overrideStatus",
        deserialize_with = "deserialize_optional_flag"
    )]
    override_status: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewDependency {
    #[serde(rename = "$PhantomId", deserialize_with = "deserialize_id")]
    phantom_id: String,
    #[serde(alias = "fromEvent")]
    from: String,
    #[serde(alias = "toEvent")]
    to: String,
    #[serde(default, rename = "type")]
    kind: Option<i64>,
    #[serde(default)]
    lag: Option<f64>,
    #[serde(default)]
    lag_unit: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Removed {
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
}

fn parse<T: for<'de> Deserialize<'de>>(what: &str, record: Record) -> Result<T> {
    serde_json::from_value(Value::Object(record))
        .map_err(|e| SyncError::MalformedRecord(format!("{what}: {e}")))
}

fn record_id(record: &Record) -> Result<String> {
    match record.get("id") {
        Some(Value::String(id)) => Ok(id.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(SyncError::MalformedRecord(
            "updated record carries no id".to_string(),
        )),
    }
}

/// Run `op` over every item concurrently and wait for all of them.
///
/// Results come back in input order. Siblings of a failed operation are left
/// to finish; the first failure is returned.
async fn run_all<T, R, F, Fut>(what: &str, items: Vec<T>, mut op: F) -> Result<Vec<R>>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<R>> + Send + 'static,
    R: Send + 'static,
{
    let count = items.len();
    let mut set = JoinSet::new();
    for (index, item) in items.into_iter().enumerate() {
        let fut = op(item);
        set.spawn(async move { (index, fut.await) });
    }

    let mut done = Vec::with_capacity(count);
    let mut failure = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, Ok(value))) => done.push((index, value)),
            Ok((index, Err(e))) => {
                log::error!("{what} #{index} failed: {e}");
                failure.get_or_insert(e);
            }
            Err(e) => {
                log::error!("{what} task aborted: {e}");
                failure.get_or_insert(SyncError::BackendRequestFailed(e.to_string()));
            }
        }
    }
    if let Some(e) = failure {
        return Err(e);
    }
    done.sort_by_key(|(index, _)| *index);
    Ok(done.into_iter().map(|(_, value)| value).collect())
}

/// Full insert payload for a new task.
fn task_create_body(project_sys_id: &str, task: &NewTask) -> Result<Value> {
    let mut body = json!({
        "short_description": task.name,
        "parent": task.parent_id.clone().unwrap_or_default(),
        "start_date": to_backend_timestamp(&task.start_date)?,
        "end_date": to_backend_timestamp(&task.end_date)?,
        "duration": compute_duration(&task.start_date, &task.end_date)?,
        "project": project_sys_id,
        "wbs_order": task.parent_index.map(|i| (i.trunc() as i64).to_string()).unwrap_or_default(),
        "description": task.note.clone().unwrap_or_default(),
        "status": task.status.clone().unwrap_or_default(),
        "override_status": flag_to_wire(task.override_status.unwrap_or(false)),
    });
    if let (Some(percent), Value::Object(map)) = (task.percent_done, &mut body) {
        map.insert(
            "percent_complete".to_string(),
            Value::String((percent.trunc() as i64).to_string()),
        );
    }
    Ok(body)
}

/// Update payload for a changed task.
///
/// Date edits always travel with a consistent duration: moving both ends
/// recomputes the duration, and changing the end together with the duration
/// derives a new start.
fn task_update_body(changes: &Record) -> Result<Map<String, Value>> {
    let mut body = map_fields(TASK_FIELDS, changes)?;
    let raw_duration = body.remove("duration");
    let start = changes.get("startDate").and_then(Value::as_str);
    let end = changes.get("endDate").and_then(Value::as_str);

    match (start, end, raw_duration.as_ref().and_then(Value::as_f64)) {
        (Some(start), Some(end), _) => {
            body.insert("duration".into(), Value::String(compute_duration(start, end)?));
        }
        (None, Some(end), Some(duration)) => {
            let unit = match changes.get("durationUnit").and_then(Value::as_str) {
                Some(unit) => DurationUnit::parse(unit)?,
                None => DurationUnit::default(),
            };
            let start = compute_start_date(end, duration, unit)?;
            body.insert("start_date".into(), Value::String(to_backend_timestamp(&start)?));
            body.insert("duration".into(), Value::String(compute_duration(&start, end)?));
        }
        _ => {
            if raw_duration.is_some() {
                log::debug!("dropping duration change without an end date");
            }
        }
    }
    Ok(body)
}

fn dependency_body(from: &str, to: &str, kind: DependencyType, lag: &str) -> Value {
    json!({
        "parent": from,
        "child": to,
        "sub_type": kind.as_backend(),
        "lag": lag,
    })
}

fn encode_new_lag(magnitude: Option<f64>, unit: Option<&str>) -> Result<String> {
    lag::encode_lag(magnitude.unwrap_or(0.0), unit.unwrap_or("d"))
}

async fn create_task(api: Arc<dyn TableApi>, project: Arc<str>, task: NewTask) -> Result<IdRemap> {
    let body = task_create_body(&project, &task)?;
    let created = api.create(TASK_TABLE, body).await?;
    let id = created_sys_id(&created)?;
    log::info!("created task {id} (was {})", task.phantom_id);
    Ok(IdRemap::Created {
        phantom_id: task.phantom_id,
        id,
    })
}

async fn update_task(api: Arc<dyn TableApi>, id: String, changes: Record) -> Result<()> {
    let body = task_update_body(&changes)?;
    if body.is_empty() {
        log::debug!("task {id}: no mapped fields changed");
        return Ok(());
    }
    api.update(TASK_TABLE, &id, Value::Object(body)).await?;
    log::info!("updated task {id}");
    Ok(())
}

async fn delete_record(api: Arc<dyn TableApi>, table: &'static str, id: String) -> Result<()> {
    api.delete(table, &id).await?;
    log::info!("deleted {table}/{id}");
    Ok(())
}

async fn create_dependency(api: Arc<dyn TableApi>, dep: NewDependency) -> Result<IdRemap> {
    let kind = DependencyType::from_widget(dep.kind.unwrap_or(2))?;
    let lag = encode_new_lag(dep.lag, dep.lag_unit.as_deref())?;
    let created = api
        .create(RELATION_TABLE, dependency_body(&dep.from, &dep.to, kind, &lag))
        .await?;
    let id = created_sys_id(&created)?;
    log::info!("created dependency {id} (was {})", dep.phantom_id);
    Ok(IdRemap::Created {
        phantom_id: dep.phantom_id,
        id,
    })
}

async fn previous_relation(api: &dyn TableApi, id: &str) -> Result<BackendRelationRecord> {
    let row = api.fetch(RELATION_TABLE, id).await?;
    let raw: RawRelationRow =
        serde_json::from_value(row).map_err(|e| SyncError::MalformedRecord(e.to_string()))?;
    BackendRelationRecord::try_from(raw)
}

/// Encoded lag for a recreated relation. A change may carry only the
/// magnitude or only the unit; the other half comes from the stored lag.
fn merge_lag(
    magnitude: Option<f64>,
    unit: Option<LagUnit>,
    stored: Option<String>,
) -> Result<String> {
    let stored = stored.unwrap_or_default();
    match (magnitude, unit) {
        (Some(magnitude), Some(unit)) => lag::encode(magnitude, unit),
        (None, None) if stored.is_empty() => Ok(lag::ZERO_LAG.to_string()),
        (None, None) => Ok(stored),
        (magnitude, unit) => {
            let previous = lag::decode_lag(&stored)?;
            lag::encode(
                magnitude.unwrap_or(previous.magnitude),
                unit.unwrap_or(previous.unit),
            )
        }
    }
}

/// The backend cannot edit a relation in place, so the old one is removed and
/// a new one created. Fields the change leaves out are taken from the stored
/// relation.
async fn replace_dependency(api: Arc<dyn TableApi>, changes: Record) -> Result<IdRemap> {
    let old_id = record_id(&changes)?;
    let endpoints = map_fields(DEPENDENCY_FIELDS, &changes)?;
    let endpoint = |column: &str| endpoints.get(column).and_then(Value::as_str).map(str::to_string);
    let (mut from, mut to) = (endpoint("parent"), endpoint("child"));
    let mut kind = match changes.get("type") {
        Some(Value::Number(n)) => Some(DependencyType::from_widget(n.as_i64().ok_or_else(
            || SyncError::InvalidDependencyType(n.to_string()),
        )?)?),
        Some(Value::Null) | None => None,
        Some(other) => return Err(SyncError::InvalidDependencyType(other.to_string())),
    };
    let magnitude = changes.get("lag").and_then(Value::as_f64);
    let unit = match changes.get("lagUnit").and_then(Value::as_str) {
        Some(unit) => Some(LagUnit::parse(unit)?),
        None => None,
    };

    let mut stored_lag = None;
    if from.is_none() || to.is_none() || kind.is_none() || magnitude.is_none() || unit.is_none() {
        let previous = previous_relation(api.as_ref(), &old_id).await?;
        from = from.or(previous.predecessor);
        to = to.or(previous.successor);
        kind = kind.or(previous.kind);
        stored_lag = Some(previous.lag);
    }
    let (Some(from), Some(to)) = (from, to) else {
        return Err(SyncError::MalformedRecord(format!(
            "dependency {old_id} has no endpoints"
        )));
    };
    let kind = kind.unwrap_or(DependencyType::FinishToStart);
    let lag = merge_lag(magnitude, unit, stored_lag)?;

    api.delete(RELATION_TABLE, &old_id).await?;
    let created = api
        .create(RELATION_TABLE, dependency_body(&from, &to, kind, &lag))
        .await?;
    let new_id = created_sys_id(&created)?;
    log::info!("replaced dependency {old_id} with {new_id}");
    Ok(IdRemap::Replaced { old_id, new_id })
}

pub struct Reconciler {
    api: Arc<dyn TableApi>,
    project_sys_id: Arc<str>,
}

impl Reconciler {
    pub fn new(api: Arc<dyn TableApi>, project_sys_id: impl Into<Arc<str>>) -> Self {
        Self {
            api,
            project_sys_id: project_sys_id.into(),
        }
    }

    pub async fn sync(&self, request: SyncRequest) -> Result<SyncOutcome> {
        let mut phantoms = PhantomIds::default();
        let mut outcome = SyncOutcome::default();
        if let Some(tasks) = request.tasks {
            outcome.tasks = self.apply_tasks(tasks, &mut phantoms).await?;
        }
        if let Some(dependencies) = request.dependencies {
            outcome.dependencies = self.apply_dependencies(dependencies, &phantoms).await?;
        }
        Ok(outcome)
    }

    /// Creates go out in waves: a task whose parent is another new task waits
    /// for that parent's id.
    async fn create_tasks(
        &self,
        added: Vec<Record>,
        phantoms: &mut PhantomIds,
    ) -> Result<Vec<IdRemap>> {
        let mut pending = added
            .into_iter()
            .map(|record| parse::<NewTask>("added task", record))
            .collect::<Result<Vec<_>>>()?;
        let mut rows = Vec::with_capacity(pending.len());

        while !pending.is_empty() {
            for task in &mut pending {
                if let Some(parent) = task.parent_id.as_mut() {
                    phantoms.rewrite(parent);
                }
            }
            let waiting: HashSet<String> = pending.iter().map(|t| t.phantom_id.clone()).collect();
            let (ready, blocked): (Vec<_>, Vec<_>) = pending
                .into_iter()
                .partition(|t| t.parent_id.as_ref().is_none_or(|p| !waiting.contains(p)));
            if ready.is_empty() {
                return Err(SyncError::MalformedRecord(format!(
                    "{} added tasks are parented on each other in a cycle",
                    blocked.len()
                )));
            }

            let created = run_all("task create", ready, |task| {
                create_task(self.api.clone(), self.project_sys_id.clone(), task)
            })
            .await?;
            for remap in &created {
                if let IdRemap::Created { phantom_id, id } = remap {
                    phantoms.record(phantom_id, id);
                }
            }
            rows.extend(created);
            pending = blocked;
        }
        Ok(rows)
    }

    async fn apply_tasks(
        &self,
        changes: ChangeSet,
        phantoms: &mut PhantomIds,
    ) -> Result<Vec<IdRemap>> {
        let rows = self.create_tasks(changes.added, phantoms).await?;

        let updates = changes
            .updated
            .into_iter()
            .map(|mut record| {
                phantoms.rewrite_field(&mut record, "parentId");
                record_id(&record).map(|id| (id, record))
            })
            .collect::<Result<Vec<_>>>()?;
        run_all("task update", updates, |(id, record)| {
            update_task(self.api.clone(), id, record)
        })
        .await?;

        let removed = changes
            .removed
            .into_iter()
            .map(|record| parse::<Removed>("removed task", record))
            .collect::<Result<Vec<_>>>()?;
        run_all("task delete", removed, |r| {
            delete_record(self.api.clone(), TASK_TABLE, r.id)
        })
        .await?;

        Ok(rows)
    }

    async fn apply_dependencies(
        &self,
        changes: ChangeSet,
        phantoms: &PhantomIds,
    ) -> Result<Vec<IdRemap>> {
        let added = changes
            .added
            .into_iter()
            .map(|record| {
                let mut dep = parse::<NewDependency>("added dependency", record)?;
                phantoms.rewrite(&mut dep.from);
                phantoms.rewrite(&mut dep.to);
                Ok(dep)
            })
            .collect::<Result<Vec<_>>>()?;
        let mut rows = run_all("dependency create", added, |dep| {
            create_dependency(self.api.clone(), dep)
        })
        .await?;

        let updated = changes
            .updated
            .into_iter()
            .map(|mut record| {
                for field in ["from", "fromEvent", "to", "toEvent"] {
                    phantoms.rewrite_field(&mut record, field);
                }
                record
            })
            .collect();
        rows.extend(
            run_all("dependency update", updated, |record| {
                replace_dependency(self.api.clone(), record)
            })
            .await?,
        );

        let removed = changes
            .removed
            .into_iter()
            .map(|record| parse::<Removed>("removed dependency", record))
            .collect::<Result<Vec<_>>>()?;
        run_all("dependency delete", removed, |r| {
            delete_record(self.api.clone(), RELATION_TABLE, r.id)
        })
        .await?;

        Ok(rows)
    }
}
