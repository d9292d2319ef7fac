//! HTTP surface: the two JSON endpoints the widget talks to, plus its static
//! files.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::services::ServeDir;

use crate::load::load_project;
use crate::model::{LoadResponse, SyncRequest, SyncResponse};
use crate::sync::Reconciler;
use crate::table::TableApi;

pub const LOAD_FAILED: &str = "There was an error getting the tasks";
pub const SYNC_FAILED: &str = "There was an error syncing the data changes";

#[derive(Clone)]
pub struct AppState {
    pub api: Arc<dyn TableApi>,
    pub project_sys_id: Arc<str>,
}

impl AppState {
    pub fn new(api: Arc<dyn TableApi>, project_sys_id: impl Into<Arc<str>>) -> Self {
        Self {
            api,
            project_sys_id: project_sys_id.into(),
        }
    }
}

pub fn router(state: AppState, static_dir: Option<PathBuf>) -> Router {
    let api = Router::new()
        .route("/api/load", get(load_handler))
        .route("/api/sync", post(sync_handler))
        .with_state(state);
    match static_dir {
        Some(dir) => api.fallback_service(ServeDir::new(dir)),
        None => api,
    }
}

pub async fn load_handler(State(state): State<AppState>) -> Json<LoadResponse> {
    match load_project(state.api.as_ref(), &state.project_sys_id).await {
        Ok(data) => Json(LoadResponse::ok(data)),
        Err(e) => {
            log::error!("load failed: {e}");
            Json(LoadResponse::failed(LOAD_FAILED))
        }
    }
}

pub async fn sync_handler(
    State(state): State<AppState>,
    Json(request): Json<SyncRequest>,
) -> Json<SyncResponse> {
    let request_id = request.request_id.clone();
    let reconciler = Reconciler::new(state.api.clone(), state.project_sys_id.clone());
    match reconciler.sync(request).await {
        Ok(outcome) => Json(SyncResponse::ok(
            request_id,
            outcome.tasks,
            outcome.dependencies,
        )),
        Err(e) => {
            log::error!("sync {request_id} failed: {e}");
            Json(SyncResponse::failed(request_id, SYNC_FAILED))
        }
    }
}
