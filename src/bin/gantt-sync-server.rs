use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use gantt_sync::config::Config;
use gantt_sync::server::{router, AppState};
use gantt_sync::table::ServiceNowClient;

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let config = Config::parse();
    let base_url = config.base_url()?;
    let client = ServiceNowClient::new(&base_url, &config.username, &config.password)
        .context("failed to build HTTP client")?;
    log::info!("syncing project {} on {base_url}", config.project);

    let state = AppState::new(Arc::new(client), config.project.as_str());
    let static_dir = config.static_dir.is_dir().then(|| config.static_dir.clone());
    if static_dir.is_none() {
        log::warn!(
            "static directory {} not found; serving the API only",
            config.static_dir.display()
        );
    }
    let app = router(state, static_dir);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    log::info!("listening on http://{addr}");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
