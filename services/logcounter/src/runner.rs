// Wires the HTTP collaborators into the counting pipeline and runs it until
// the operator stops it, then prints the loss/duplication report.
use anyhow::{Context, Result};
use chrono::Local;
use logcounter_core::{
    ControllerConfig, EnvelopeClassifier, ReconnectController, Report, ReportGenerator,
    TallyStore,
};
use parking_lot::Mutex;
use std::future::Future;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::CounterConfig;
use crate::firehose::HttpFirehoseTransport;
use crate::names::CloudControllerNames;
use crate::uaa::UaaTokenProvider;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One client for every upstream. No overall request timeout: the firehose
/// response stays open for the whole run.
pub fn build_http_client(config: &CounterConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .danger_accept_invalid_certs(config.skip_tls_verify)
        .build()
        .context("build http client")
}

/// Counts until `shutdown` resolves, drains in-flight records, prints the
/// report to stdout and returns it.
pub async fn run_with_shutdown<F>(config: CounterConfig, shutdown: F) -> Result<Report>
where
    F: Future<Output = ()> + Send + 'static,
{
    run_with_output(config, shutdown, io::stdout()).await
}

/// Same as [`run_with_shutdown`], writing the operator output to `out`.
pub async fn run_with_output<F, W>(config: CounterConfig, shutdown: F, out: W) -> Result<Report>
where
    F: Future<Output = ()> + Send + 'static,
    W: Write + Send + 'static,
{
    let out = Arc::new(Mutex::new(out));
    let client = build_http_client(&config)?;
    let tokens = Arc::new(UaaTokenProvider::new(client.clone(), &config));
    let transport = Arc::new(HttpFirehoseTransport::new(
        client.clone(),
        &config.doppler_url,
        config.envelope_buffer,
    ));
    let names = Arc::new(CloudControllerNames::new(
        client,
        &config.api_url,
        config.request_timeout(),
    ));
    let store = Arc::new(TallyStore::new());

    // Reused across reconnects so the upstream resumes the same subscription.
    let subscription_id = uuid::Uuid::new_v4().to_string();
    let mut controller_config = ControllerConfig::new(subscription_id.clone());
    controller_config.auth_backoff = config.auth_backoff();
    controller_config.progress_every = config.progress_every;
    let controller = ReconnectController::new(
        transport,
        tokens.clone(),
        EnvelopeClassifier::new(config.message_prefix.as_str()),
        store.clone(),
        controller_config,
    );

    let started_at = Local::now();
    let started = Instant::now();
    writeln!(out.lock(), "Starting at {}", started_at.to_rfc3339()).context("write output")?;
    tracing::info!(
        subscription = %subscription_id,
        prefix = %config.message_prefix,
        "log counter started"
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let shutdown_out = Arc::clone(&out);
    tokio::spawn(async move {
        shutdown.await;
        if let Err(err) = writeln!(shutdown_out.lock(), "Joining remaining tasks") {
            tracing::warn!(error = %err, "write output");
        }
        trigger.cancel();
    });

    let summary = controller.run(cancel).await;
    let ended_at = Local::now();
    tracing::info!(
        connections = summary.connections,
        envelopes = summary.envelopes_received,
        identities = store.len(),
        "ingestion drained"
    );
    {
        let mut out = out.lock();
        writeln!(out, "Ended at {}", ended_at.to_rfc3339()).context("write output")?;
        writeln!(out, "Duration: {:?}", started.elapsed()).context("write output")?;
    }

    let report = ReportGenerator::new(tokens, names)
        .with_lookup_timeout(config.request_timeout())
        .generate(&store)
        .await;
    let mut out = out.lock();
    write!(out, "Report:\n{report}").context("write output")?;
    out.flush().context("flush output")?;
    Ok(report)
}
