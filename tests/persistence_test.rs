//! End-to-end tests over a SQLite file that outlives the engine.

use std::sync::Arc;

use anyhow::Result;
use courier_core::{storage::Storage, Action, Clock, RealClock, TestClock};
use courier_delivery::{
    context::{NoopSideEffects, StaticPageContext},
    CourierEngine, DeliveryError, EngineConfig, EngineStores, SendRequest, SqliteStore,
};
use tempfile::TempDir;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

async fn open_engine(
    dir: &TempDir,
    clock: Arc<dyn Clock>,
) -> Result<(Arc<Storage>, CourierEngine)> {
    let url = format!("sqlite://{}", dir.path().join("courier.db").display());
    let storage = Arc::new(Storage::connect(&url).await?);
    let engine = CourierEngine::new(
        EngineStores::shared(SqliteStore::new(storage.clone())),
        Arc::new(StaticPageContext::empty()),
        Arc::new(NoopSideEffects),
        clock,
        EngineConfig::default(),
    )?;
    Ok((storage, engine))
}

#[tokio::test]
async fn queued_job_survives_restart_and_is_drained_on_start() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir()?;
    let settings = format!(r#"{{"webhookProfiles":[{{"id":"p","name":"main","url":"{}/in"}}]}}"#, server.uri());

    {
        let (storage, engine) = open_engine(&dir, Arc::new(RealClock::new())).await?;
        engine.import_settings(&settings).await?;

        let outcome = engine.send(SendRequest::new(Action::Page, "https://example.com/keep")).await?;
        assert_eq!(outcome.error, Some(DeliveryError::ServerError { status_code: 503 }));
        assert_eq!(engine.queue_len().await?, 1);

        engine.shutdown().await;
        storage.close().await;
    }

    let clock = TestClock::new();
    let (storage, engine) = open_engine(&dir, Arc::new(clock.clone())).await?;
    assert_eq!(engine.queue_len().await?, 1);

    engine.start();
    engine.processor().wait_idle().await;

    assert_eq!(engine.queue_len().await?, 0);
    let history = engine.history(10).await?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].action, Action::Retry);
    assert_eq!(history[0].http_status, Some(200));
    assert_eq!(history[1].http_status, Some(503));

    let again = engine.send(SendRequest::new(Action::Page, "https://example.com/keep")).await?;
    assert_eq!(again.error, Some(DeliveryError::DuplicateSuppressed));

    engine.shutdown().await;
    storage.close().await;
    Ok(())
}

#[tokio::test]
async fn settings_round_trip_through_export() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (storage, engine) = open_engine(&dir, Arc::new(TestClock::new())).await?;

    engine
        .import_settings(
            r#"{"webhookProfiles":[{"id":"a","name":"Primary","url":"https://hook.example/a"}],"payloadMode":"json","hmacSecret":"0123456789abcdef"}"#,
        )
        .await?;
    let exported = engine.export_settings().await?;
    let reimported = engine.import_settings(&exported).await?;

    assert_eq!(reimported, engine.settings().await?);
    assert_eq!(reimported.webhook_profiles[0].name, "Primary");
    assert_eq!(reimported.signing_secret(), Some("0123456789abcdef"));

    storage.close().await;
    Ok(())
}
