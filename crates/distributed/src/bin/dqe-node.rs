use std::sync::Arc;
use std::time::Duration;

use dqe_common::JobsConfig;
use dqe_common::metrics::global_metrics;
use dqe_distributed::JobContextRegistry;
use dqe_sys::tcp::TCP;
use dqe_sys::{ProcNetSnmp, tcp_expression};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();

    let config = JobsConfig::from_env()?;
    let registry = JobContextRegistry::new(config.clone());
    registry.start()?;
    info!(
        keep_alive_ms = config.default_keep_alive_ms,
        reap_interval_ms = config.reap_interval_ms,
        "dqe-node started"
    );
    let snmp = ProcNetSnmp::new();
    let source = snmp.path().display().to_string();
    let tcp = tcp_expression(Arc::new(snmp));
    if let Ok(snapshot) = serde_json::to_string(&tcp.value()) {
        info!(source = %source, expression = TCP, value = %snapshot, "network stats");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    match tokio::time::timeout(Duration::from_secs(10), registry.stop()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "job context reaper failed"),
        Err(_) => error!("job context reaper did not stop in time"),
    }
    let open_jobs = registry.len();
    if let Err(e) = registry.close_all() {
        error!(error = %e, "failed to close all job execution contexts");
    }
    info!(open_jobs, "dqe-node stopped");
    info!(metrics = %global_metrics().render_prometheus(), "final metrics");
    Ok(())
}
