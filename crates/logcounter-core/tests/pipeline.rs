//! End-to-end run of the counting engine against in-memory collaborators:
//! subscribe, classify, tally, shut down, report.
use anyhow::Result;
use async_trait::async_trait;
use logcounter_core::{
    ControllerConfig, CounterError, Envelope, EnvelopeClassifier, FirehoseSession,
    FirehoseTransport, Identity, NameResolver, ReconnectController, ReportGenerator, TallyStore,
    TokenProvider, session_channel,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const RUN_ID: &str = "11111111-1111-1111-1111-111111111111";

struct StaticToken;

#[async_trait]
impl TokenProvider for StaticToken {
    async fn fetch_token(&self) -> logcounter_core::Result<String> {
        Ok("admin-token".to_string())
    }
}

struct NoNames;

#[async_trait]
impl NameResolver for NoNames {
    async fn resolve_name(&self, application_id: &str, _token: &str) -> String {
        application_id.to_string()
    }
}

// Replays a fixed batch on every subscribe, then drops the stream.
struct ReplayTransport {
    batch: Vec<Envelope>,
}

#[async_trait]
impl FirehoseTransport for ReplayTransport {
    async fn subscribe(
        &self,
        _subscription_id: &str,
        _token: &str,
    ) -> logcounter_core::Result<FirehoseSession> {
        let (mut feed, session) = session_channel(8);
        let batch = self.batch.clone();
        tokio::spawn(async move {
            for envelope in batch {
                if !feed.deliver(envelope).await {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            feed.fail(CounterError::Stream("upstream restarted".to_string()));
        });
        Ok(session)
    }
}

#[tokio::test]
async fn single_test_message_produces_one_report_row() -> Result<()> {
    let store = Arc::new(TallyStore::new());
    let transport = Arc::new(ReplayTransport {
        batch: vec![
            Envelope::log_message("app-A", format!("TEST guid: {RUN_ID} msg: 5")),
            Envelope::log_message("app-Z", "unrelated application output"),
        ],
    });
    let controller = ReconnectController::new(
        transport,
        Arc::new(StaticToken),
        EnvelopeClassifier::new("TEST"),
        store.clone(),
        ControllerConfig::new("logcounter-e2e"),
    );
    let shutdown = CancellationToken::new();
    let run = tokio::spawn(controller.run(shutdown.clone()));

    timeout(Duration::from_secs(5), async {
        while store.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    // Let the replaying upstream cycle through a few reconnects.
    tokio::time::sleep(Duration::from_millis(60)).await;
    shutdown.cancel();
    let summary = timeout(Duration::from_secs(5), run).await??;
    assert!(summary.connections >= 1);

    let report = ReportGenerator::new(Arc::new(StaticToken), Arc::new(NoNames))
        .generate(&store)
        .await;

    assert_eq!(report.rows.len(), 1);
    let row = report
        .row(&Identity::new("app-A", RUN_ID))
        .expect("row for app-A");
    assert_eq!(row.display_name, "app-A");
    assert_eq!(row.distinct_count, 1);
    assert_eq!(row.max_sequence, Some(5));
    assert_eq!(row.expected_total, 6);
    assert_eq!(
        report.to_string(),
        format!("guid: {RUN_ID} app: app-A total: 1 max: 6\n")
    );
    Ok(())
}
