//! Server configuration from flags and environment variables.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

use crate::table::ServiceNowClient;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "gantt-sync-server",
    about = "Sync server between a Gantt widget and a ServiceNow project"
)]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 1337)]
    pub port: u16,

    /// Personal developer instance id, e.g. dev12345
    #[arg(long, env = "SERVICENOW_PDI_ID")]
    pub instance: Option<String>,

    /// Full base URL of the instance; overrides --instance
    #[arg(long, env = "SERVICENOW_URL")]
    pub url: Option<String>,

    #[arg(long, env = "SERVICENOW_USERNAME")]
    pub username: String,

    #[arg(long, env = "SERVICENOW_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// sys_id of the project to show
    #[arg(long, env = "SERVICENOW_PROJECT_SYS_ID")]
    pub project: String,

    /// Directory with the widget's static files
    #[arg(long, env = "GANTT_STATIC_DIR", default_value = "public")]
    pub static_dir: PathBuf,
}

impl Config {
    pub fn base_url(&self) -> Result<String> {
        match (&self.url, &self.instance) {
            (Some(url), _) => Ok(url.clone()),
            (None, Some(instance)) => Ok(ServiceNowClient::instance_url(instance)),
            (None, None) => bail!("set SERVICENOW_PDI_ID or SERVICENOW_URL"),
        }
    }
}
