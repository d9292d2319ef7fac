mod common;

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use gantt_sync::error::SyncError;
use gantt_sync::load::load_project;
use gantt_sync::model::{IdRemap, SyncRequest};
use gantt_sync::reconcile::DependencyStore;
use gantt_sync::server::{sync_handler, AppState, SYNC_FAILED};
use gantt_sync::sync::Reconciler;
use gantt_sync::table::TableApi;

use common::{seeded, MemoryTable, PROJECT};

const TASKS: &str = "pm_project_task";
const RELATIONS: &str = "planned_task_rel_planned_task";

fn request(body: Value) -> SyncRequest {
    serde_json::from_value(body).unwrap()
}

fn reconciler(table: &Arc<MemoryTable>) -> Reconciler {
    Reconciler::new(table.clone(), PROJECT)
}

#[tokio::test]
async fn added_task_reports_its_new_id() {
    let table = Arc::new(seeded());
    let outcome = reconciler(&table)
        .sync(request(json!({
            "requestId": 7,
            "tasks": {"added": [{
                "$PhantomId": "_generated1",
                "name": "Test",
                "parentId": PROJECT,
                "startDate": "2024-02-01T00:00:00.000Z",
                "endDate": "2024-02-03T12:00:00.000Z",
                "parentIndex": 3,
                "percentDone": 0
            }]}
        })))
        .await
        .unwrap();

    let [IdRemap::Created { phantom_id, id }] = outcome.tasks.as_slice() else {
        panic!("expected one create remap, got {:?}", outcome.tasks);
    };
    assert_eq!(phantom_id, "_generated1");
    assert!(outcome.dependencies.is_empty());

    let row = table.row(TASKS, id).unwrap();
    assert_eq!(row["short_description"], json!("Test"));
    assert_eq!(row["project"], json!(PROJECT));
    assert_eq!(row["start_date"], json!("2024-02-01 00:00:00"));
    assert_eq!(row["duration"], json!("02 12:00:00"));
    assert_eq!(row["override_status"], json!("0"));
}

#[tokio::test]
async fn updated_dependency_is_deleted_then_recreated() {
    let table = Arc::new(seeded());
    let outcome = reconciler(&table)
        .sync(request(json!({
            "requestId": 8,
            "dependencies": {"updated": [{
                "id": "r1", "fromEvent": "t1", "toEvent": "t2", "type": 0, "lag": 2, "lagUnit": "h"
            }]}
        })))
        .await
        .unwrap();

    let [IdRemap::Replaced { old_id, new_id }] = outcome.dependencies.as_slice() else {
        panic!("expected one replace remap, got {:?}", outcome.dependencies);
    };
    assert_eq!(old_id, "r1");
    assert_ne!(new_id, "r1");

    assert_eq!(
        table.calls(),
        vec![
            format!("DELETE {RELATIONS}/r1"),
            format!("POST {RELATIONS}"),
        ]
    );
    assert!(table.row(RELATIONS, "r1").is_none());
    let row = table.row(RELATIONS, new_id).unwrap();
    assert_eq!(row["parent"], json!("t1"));
    assert_eq!(row["child"], json!("t2"));
    assert_eq!(row["sub_type"], json!("ss"));
    assert_eq!(row["lag"], json!("1970-01-01 02:00:00"));
}

#[tokio::test]
async fn partial_dependency_update_keeps_stored_fields() {
    let table = Arc::new(seeded());
    let outcome = reconciler(&table)
        .sync(request(json!({
            "dependencies": {"updated": [{"id": "r1", "type": 1}]}
        })))
        .await
        .unwrap();

    let [IdRemap::Replaced { new_id, .. }] = outcome.dependencies.as_slice() else {
        panic!("expected one replace remap");
    };
    assert_eq!(table.calls()[0], format!("GET {RELATIONS}/r1"));
    let row = table.row(RELATIONS, new_id).unwrap();
    assert_eq!(row["parent"], json!("t1"));
    assert_eq!(row["child"], json!("t2"));
    assert_eq!(row["sub_type"], json!("ff"));
    assert_eq!(row["lag"], json!("1970-01-02 00:00:00"));
}

/// Reseed `r1` with a two-hour lag and push one partial change to it.
async fn change_lag(mut change: Value) -> (Arc<MemoryTable>, Value) {
    let table = Arc::new(seeded());
    table
        .update(RELATIONS, "r1", json!({"lag": "1970-01-01 02:00:00"}))
        .await
        .unwrap();
    change["id"] = json!("r1");
    let outcome = reconciler(&table)
        .sync(request(json!({"dependencies": {"updated": [change]}})))
        .await
        .unwrap();
    let [IdRemap::Replaced { new_id, .. }] = outcome.dependencies.as_slice() else {
        panic!("expected one replace remap");
    };
    let row = table.row(RELATIONS, new_id).unwrap();
    (table, row)
}

#[tokio::test]
async fn lag_magnitude_change_keeps_stored_unit() {
    let (table, row) = change_lag(json!({"lag": 3})).await;
    assert_eq!(table.calls()[1], format!("GET {RELATIONS}/r1"));
    assert_eq!(row["lag"], json!("1970-01-01 03:00:00"));
    assert_eq!(row["sub_type"], json!("fs"));
}

#[tokio::test]
async fn lag_unit_change_keeps_stored_magnitude() {
    let (_, row) = change_lag(json!({"lagUnit": "d"})).await;
    assert_eq!(row["lag"], json!("1970-01-03 00:00:00"));
    assert_eq!(row["parent"], json!("t1"));
}

#[tokio::test]
async fn added_task_carries_its_override_flag() {
    let table = Arc::new(seeded());
    let outcome = reconciler(&table)
        .sync(request(json!({
            "tasks": {"added": [{
                "$PhantomId": "_generated2",
                "name": "Pinned",
                "parentId": PROJECT,
                "startDate": "2024-02-01T00:00:00Z",
                "endDate": "2024-02-02T00:00:00Z",
                "status": "yellow",
                "override_status": 1
            }]}
        })))
        .await
        .unwrap();

    let [IdRemap::Created { id, .. }] = outcome.tasks.as_slice() else {
        panic!("expected one create remap");
    };
    let row = table.row(TASKS, id).unwrap();
    assert_eq!(row["override_status"], json!("1"));
    assert_eq!(row["status"], json!("yellow"));
}

#[tokio::test]
async fn phantom_parents_are_created_first() {
    let table = Arc::new(seeded());
    let outcome = reconciler(&table)
        .sync(request(json!({
            "tasks": {"added": [
                {"$PhantomId": "_child", "name": "Child", "parentId": "_parent",
                 "startDate": "2024-02-02T00:00:00Z", "endDate": "2024-02-03T00:00:00Z"},
                {"$PhantomId": "_parent", "name": "Parent", "parentId": PROJECT,
                 "startDate": "2024-02-01T00:00:00Z", "endDate": "2024-02-05T00:00:00Z"}
            ]},
            "dependencies": {"added": [
                {"$PhantomId": "_dep", "from": "t1", "to": "_child", "type": 2}
            ]}
        })))
        .await
        .unwrap();

    let created: Vec<(String, String)> = outcome
        .tasks
        .iter()
        .map(|remap| match remap {
            IdRemap::Created { phantom_id, id } => (phantom_id.clone(), id.clone()),
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(created[0].0, "_parent");
    assert_eq!(created[1].0, "_child");
    let (parent_id, child_id) = (&created[0].1, &created[1].1);

    let child = table.row(TASKS, child_id).unwrap();
    assert_eq!(&child["parent"], &json!(parent_id));

    let [IdRemap::Created { id: dep_id, .. }] = outcome.dependencies.as_slice() else {
        panic!("expected one dependency create");
    };
    let dep = table.row(RELATIONS, dep_id).unwrap();
    assert_eq!(dep["parent"], json!("t1"));
    assert_eq!(&dep["child"], &json!(child_id));
    assert_eq!(dep["lag"], json!("1970-01-01 00:00:00"));
}

#[tokio::test]
async fn cyclic_phantom_parents_are_rejected() {
    let table = Arc::new(seeded());
    let err = reconciler(&table)
        .sync(request(json!({
            "tasks": {"added": [
                {"$PhantomId": "_a", "parentId": "_b", "startDate": "2024-02-01", "endDate": "2024-02-02"},
                {"$PhantomId": "_b", "parentId": "_a", "startDate": "2024-02-01", "endDate": "2024-02-02"}
            ]}
        })))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::MalformedRecord(_)));
    assert!(table.calls().is_empty());
}

#[tokio::test]
async fn task_updates_and_removals_reach_the_backend() {
    let table = Arc::new(seeded());
    let outcome = reconciler(&table)
        .sync(request(json!({
            "tasks": {
                "updated": [
                    {"id": "t1", "name": "Design v2", "startDate": "2024-01-02T00:00:00Z",
                     "endDate": "2024-01-04T00:00:00Z", "cls": "ignored"},
                    {"id": "t2", "endDate": "2024-01-20T00:00:00Z", "duration": 1, "durationUnit": "week"}
                ],
                "removed": [{"id": "t2"}]
            },
            "dependencies": {"removed": [{"id": "r1"}]}
        })))
        .await
        .unwrap();
    assert!(outcome.tasks.is_empty());

    let calls = table.calls();
    let delete_task = calls.iter().position(|c| c == &format!("DELETE {TASKS}/t2")).unwrap();
    assert!(calls[..delete_task].contains(&format!("PATCH {TASKS}/t1")));
    assert!(calls[..delete_task].contains(&format!("PATCH {TASKS}/t2")));
    assert_eq!(calls.last().unwrap(), &format!("DELETE {RELATIONS}/r1"));

    let t1 = table.row(TASKS, "t1").unwrap();
    assert_eq!(t1["short_description"], json!("Design v2"));
    assert_eq!(t1["duration"], json!("02 00:00:00"));
    assert!(t1.get("cls").is_none());
    assert!(table.row(TASKS, "t2").is_none());
    assert!(table.rows(RELATIONS).is_empty());
}

#[tokio::test]
async fn sync_endpoint_echoes_request_id() {
    let table = Arc::new(seeded());
    let state = AppState::new(table.clone(), PROJECT);
    let body = json!({
        "requestId": 41,
        "tasks": {"added": [{"$PhantomId": "_g", "name": "N",
            "startDate": "2024-02-01T00:00:00Z", "endDate": "2024-02-02T00:00:00Z"}]}
    });
    let response = sync_handler(State(state), Json(request(body))).await.0;
    let out = serde_json::to_value(&response).unwrap();

    assert_eq!(out["requestId"], json!(41));
    assert_eq!(out["success"], json!(true));
    assert_eq!(out["tasks"]["rows"][0]["$PhantomId"], json!("_g"));
    assert!(out.get("dependencies").is_none());
}

#[tokio::test]
async fn sync_endpoint_degrades_when_a_sibling_fails() {
    let table = Arc::new(seeded());
    table.fail_on(&format!("DELETE {TASKS}/t1"));
    let state = AppState::new(table.clone(), PROJECT);
    let body = json!({
        "requestId": "abc",
        "tasks": {"removed": [{"id": "t1"}, {"id": "t2"}]}
    });
    let out = serde_json::to_value(sync_handler(State(state), Json(request(body))).await.0).unwrap();

    assert_eq!(
        out,
        json!({"requestId": "abc", "success": false, "message": SYNC_FAILED})
    );
    // The sibling delete still went through.
    assert!(table.row(TASKS, "t2").is_none());
}

#[tokio::test]
async fn invalid_dependency_type_fails_the_sync() {
    let table = Arc::new(seeded());
    let err = reconciler(&table)
        .sync(request(json!({
            "dependencies": {"added": [{"$PhantomId": "_d", "from": "t1", "to": "t2", "type": 9}]}
        })))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidDependencyType(_)));
}

#[tokio::test]
async fn client_store_follows_a_sync_round_trip() {
    let table = Arc::new(seeded());
    let data = load_project(table.as_ref(), PROJECT).await.unwrap();
    let mut store = DependencyStore::load(data.dependencies.clone());

    let mut fresh = data.dependencies[0].clone();
    fresh.id = "_generated9".into();
    fresh.from = "t2".into();
    fresh.to = "t1".into();
    store.insert_phantom(fresh).unwrap();
    store.edit("r1", |d| d.lag.magnitude = 3.0);

    let pending = store.pending().unwrap();
    let sync = json!({"requestId": 1, "dependencies": {"added": pending.added, "updated": pending.updated}});
    let state = AppState::new(table.clone(), PROJECT);
    let response = sync_handler(State(state), Json(request(sync))).await.0;
    assert!(response.success);

    assert_eq!(store.apply(&response), 2);
    assert!(store.pending().unwrap().is_empty());
    assert!(store.get("r1").is_none());
    assert!(store.get("_generated9").is_none());

    // The store now agrees with a fresh load of the relation table.
    let mut stored: Vec<String> = table
        .rows(RELATIONS)
        .iter()
        .map(|row| row["sys_id"].as_str().unwrap().to_string())
        .collect();
    stored.sort();
    assert_eq!(stored.len(), store.len());
    for id in &stored {
        assert!(store.get(id).is_some(), "{id} missing from store");
    }
}
