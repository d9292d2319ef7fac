//! Client for the backend's table REST API.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Result, SyncError};

pub const PROJECT_TABLE: &str = "pm_project";
pub const TASK_TABLE: &str = "pm_project_task";
pub const RELATION_TABLE: &str = "planned_task_rel_planned_task";

/// Column selection plus equality filters for a table read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableQuery {
    pub fields: Vec<&'static str>,
    pub filters: Vec<(String, String)>,
}

impl TableQuery {
    pub fn new(fields: &[&'static str]) -> Self {
        Self {
            fields: fields.to_vec(),
            filters: Vec::new(),
        }
    }

    pub fn filter(mut self, column: &str, value: &str) -> Self {
        self.filters.push((column.to_string(), value.to_string()));
        self
    }

    pub fn params(&self) -> Vec<(String, String)> {
        let mut params = Vec::with_capacity(self.filters.len() + 1);
        if !self.fields.is_empty() {
            params.push(("sysparm_fields".to_string(), self.fields.join(",")));
        }
        params.extend(self.filters.iter().cloned());
        params
    }
}

/// The backend collaborator. Rows travel as raw JSON; the `wire` module gives
/// them types.
#[async_trait]
pub trait TableApi: Send + Sync {
    async fn query(&self, table: &str, query: &TableQuery) -> Result<Vec<Value>>;

    async fn fetch(&self, table: &str, sys_id: &str) -> Result<Value>;

    /// Insert a record and return it as stored, including its new `sys_id`.
    async fn create(&self, table: &str, body: Value) -> Result<Value>;

    async fn update(&self, table: &str, sys_id: &str, body: Value) -> Result<Value>;

    async fn delete(&self, table: &str, sys_id: &str) -> Result<()>;
}

#[derive(Deserialize)]
struct Envelope<T> {
    result: T,
}

pub struct ServiceNowClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl ServiceNowClient {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        })
    }

    /// Base URL of a hosted instance, e.g. `dev12345`.
    pub fn instance_url(instance: &str) -> String {
        format!("https://{instance}.service-now.com")
    }

    pub fn table_url(&self, table: &str, sys_id: Option<&str>) -> String {
        match sys_id {
            Some(id) => format!("{}/api/now/table/{table}/{id}", self.base_url),
            None => format!("{}/api/now/table/{table}", self.base_url),
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
            .header(ACCEPT, "application/json")
    }

    async fn send(&self, builder: RequestBuilder, what: String) -> Result<Option<Value>> {
        log::debug!("{what}");
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::BackendRequestFailed(format!(
                "{what}: {status}: {body}"
            )));
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let envelope: Envelope<Value> = response.json().await?;
        Ok(Some(envelope.result))
    }

    async fn send_for_result(&self, builder: RequestBuilder, what: String) -> Result<Value> {
        self.send(builder, what.clone())
            .await?
            .ok_or_else(|| SyncError::BackendRequestFailed(format!("{what}: empty response")))
    }
}

#[async_trait]
impl TableApi for ServiceNowClient {
    async fn query(&self, table: &str, query: &TableQuery) -> Result<Vec<Value>> {
        let url = self.table_url(table, None);
        let builder = self.request(Method::GET, &url).query(&query.params());
        match self.send_for_result(builder, format!("GET {table}")).await? {
            Value::Array(rows) => Ok(rows),
            other => Err(SyncError::BackendRequestFailed(format!(
                "GET {table}: expected a list, got {other}"
            ))),
        }
    }

    async fn fetch(&self, table: &str, sys_id: &str) -> Result<Value> {
        let url = self.table_url(table, Some(sys_id));
        let builder = self.request(Method::GET, &url);
        self.send_for_result(builder, format!("GET {table}/{sys_id}")).await
    }

    async fn create(&self, table: &str, body: Value) -> Result<Value> {
        let url = self.table_url(table, None);
        let builder = self.request(Method::POST, &url).json(&body);
        self.send_for_result(builder, format!("POST {table}")).await
    }

    async fn update(&self, table: &str, sys_id: &str, body: Value) -> Result<Value> {
        let url = self.table_url(table, Some(sys_id));
        let builder = self.request(Method::PATCH, &url).json(&body);
        self.send_for_result(builder, format!("PATCH {table}/{sys_id}")).await
    }

    async fn delete(&self, table: &str, sys_id: &str) -> Result<()> {
        let url = self.table_url(table, Some(sys_id));
        let builder = self.request(Method::DELETE, &url);
        self.send(builder, format!("DELETE {table}/{sys_id}")).await?;
        Ok(())
    }
}
