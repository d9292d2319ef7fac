//! Load path: backend project and task rows into the widget's task tree and
//! dependency list.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::convert::format_iso;
use crate::error::{Result, SyncError};
use crate::model::{ProjectData, WidgetDependency, WidgetTask};
use crate::table::{TableApi, TableQuery, PROJECT_TABLE, TASK_TABLE};
use crate::wire::{BackendTask, RawProjectRow, RawTaskRow};

pub const PROJECT_COLUMNS: &[&str] = &[
    "sys_id",
    "short_description",
    "start_date",
    "end_date",
    "wbs_order",
    "percent_complete",
    "description",
    "status",
    "override_status",
];

pub const TASK_COLUMNS: &[&str] = &[
    "relation_applied",
    "relation_applied.parent",
    "relation_applied.lag",
    "relation_applied.sub_type",
    "sys_id",
    "short_description",
    "parent",
    "project",
    "start_date",
    "end_date",
    "wbs_order",
    "percent_complete",
    "description",
    "status",
    "override_status",
];

fn typed<R, T>(row: Value) -> Result<T>
where
    R: DeserializeOwned,
    T: TryFrom<R, Error = SyncError>,
{
    let raw: R =
        serde_json::from_value(row).map_err(|e| SyncError::MalformedRecord(e.to_string()))?;
    T::try_from(raw)
}

/// Fetch the project row and every task under it, then translate.
pub async fn load_project(api: &dyn TableApi, project_sys_id: &str) -> Result<ProjectData> {
    let project_query = TableQuery::new(PROJECT_COLUMNS).filter("sys_id", project_sys_id);
    let task_query = TableQuery::new(TASK_COLUMNS).filter("sub_tree_root", project_sys_id);

    let (projects, rows) = tokio::try_join!(
        api.query(PROJECT_TABLE, &project_query),
        api.query(TASK_TABLE, &task_query),
    )?;

    let project = projects
        .into_iter()
        .next()
        .map(typed::<RawProjectRow, BackendTask>)
        .transpose()?;
    let tasks = rows
        .into_iter()
        .map(typed::<RawTaskRow, BackendTask>)
        .collect::<Result<Vec<_>>>()?;

    log::info!(
        "loaded project {project_sys_id}: {} task rows",
        tasks.len()
    );
    translate(project_sys_id, project, tasks)
}

fn widget_task(task: BackendTask) -> WidgetTask {
    WidgetTask {
        id: task.sys_id,
        name: task.name,
        parent_id: task.parent,
        start_date: task.start_date.map(format_iso),
        end_date: task.end_date.map(format_iso),
        parent_index: task.wbs_order,
        percent_done: task.percent_complete,
        note: task.description,
        status: task.status,
        override_status: task.override_status,
        manually_scheduled: true,
        expanded: true,
    }
}

/// Build the widget view of a project.
///
/// Each task row contributes one task and, when it carries an inbound
/// relation, one dependency pointing at it. The project itself becomes the
/// root task. Tasks come back stably sorted by sibling order.
pub fn translate(
    project_sys_id: &str,
    project: Option<BackendTask>,
    rows: Vec<BackendTask>,
) -> Result<ProjectData> {
    let project = project.ok_or_else(|| SyncError::ProjectNotFound(project_sys_id.to_string()))?;

    let mut tasks = Vec::with_capacity(rows.len() + 1);
    let mut dependencies = Vec::new();

    for mut row in rows {
        if row.sys_id == project.sys_id {
            log::debug!("skipping project row {} returned as a task", row.sys_id);
            continue;
        }
        if let Some(relation) = row.relation.take() {
            dependencies.push(WidgetDependency {
                id: relation.sys_id,
                from: relation.predecessor,
                to: row.sys_id.clone(),
                kind: relation.kind,
                lag: relation.lag,
            });
        }
        tasks.push(widget_task(row));
    }

    let mut root = widget_task(project);
    root.parent_id = None;
    tasks.push(root);

    tasks.sort_by_key(|task| task.parent_index);

    Ok(ProjectData {
        tasks,
        dependencies,
    })
}
