// Log counter entry point.
use anyhow::Result;
use logcounter::config::CounterConfig;
use logcounter::{observability, runner};

#[tokio::main]
async fn main() -> Result<()> {
    let metrics_handle = observability::init_observability("logcounter")?;
    let config = CounterConfig::from_env_or_yaml()?;

    if let Some(addr) = config.metrics_bind {
        tokio::spawn(async move {
            if let Err(err) = observability::serve_metrics(metrics_handle, addr).await {
                tracing::warn!(error = %err, "metrics listener exited");
            }
        });
    } else {
        tracing::info!("metrics listener disabled (LOGCOUNTER_METRICS_BIND not set)");
    }

    runner::run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("interrupt received, stopping");
    })
    .await?;
    Ok(())
}
