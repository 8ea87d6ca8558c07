//! Integration tests for send-or-enqueue dispatch.
//!
//! Each test runs the dispatcher against a wiremock webhook with in-memory
//! stores. The dispatcher's scheduler only records delays, so queued jobs
//! stay put until a test runs the processor itself.

use std::time::Duration;

use anyhow::Result;
use courier_core::{Action, Settings};
use courier_delivery::{
    context::StaticPageContext,
    dispatcher::{DUPLICATE_HISTORY_MESSAGE, SUCCESS_NOTIFICATION_TITLE},
    request::{REQUEST_ID_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER},
    signing::verify_signature,
    DeliveryError, SendRequest,
};
use courier_testing::{
    article_page, RecordingSideEffects, SettingsBuilder, TestEnv, TestEnvBuilder, TEST_SECRET,
    TEST_TAB,
};

#[tokio::test]
async fn server_error_queues_job_and_schedules_first_retry() -> Result<()> {
    let env = TestEnv::new().await?;
    env.respond_with(503).await;

    let outcome = env.send("https://example.com/a?utm_source=x&b=2").await?;

    assert!(!outcome.ok);
    assert_eq!(outcome.status, Some(503));
    assert_eq!(outcome.error, Some(DeliveryError::ServerError { status_code: 503 }));
    assert!(!outcome.can_retry);
    assert_eq!(outcome.retry_in, Some(Duration::from_millis(1000)));

    let jobs = env.store.jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].attempt, 0);
    assert_eq!(jobs[0].target_url, "https://example.com/a?b=2");
    assert_eq!(jobs[0].body, "https://example.com/a?b=2");
    assert_eq!(jobs[0].webhook_url, env.webhook_url());
    assert_eq!(env.scheduler.delays(), vec![Duration::from_millis(1000)]);

    let history = env.store.history_entries().await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].http_status, Some(503));
    assert!(history[0].error.as_deref().is_some_and(|e| e.contains("Will retry")));
    Ok(())
}

#[tokio::test]
async fn duplicate_within_ttl_is_suppressed_until_forced() -> Result<()> {
    let env = TestEnv::new().await?;
    env.respond_with(200).await;

    let first = env.send("https://example.com/dup").await?;
    assert!(first.ok);
    assert_eq!(first.status, Some(200));

    let second = env.send("https://example.com/dup").await?;
    assert!(!second.ok);
    assert!(second.can_retry);
    assert_eq!(second.error, Some(DeliveryError::DuplicateSuppressed));
    assert_eq!(second.message().as_deref(), Some("URL already sent in last 60s"));
    assert_eq!(env.received_count().await, 1);

    let history = env.store.history_entries().await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].error.as_deref(), Some(DUPLICATE_HISTORY_MESSAGE));
    assert_eq!(history[0].http_status, None);

    let forced = env
        .dispatch(SendRequest::new(Action::Click, "https://example.com/dup").forced(true))
        .await?;
    assert!(forced.ok);
    assert_eq!(env.received_count().await, 2);
    Ok(())
}

#[tokio::test]
async fn duplicate_window_expires_after_ttl() -> Result<()> {
    let env = TestEnv::new().await?;
    env.respond_with(200).await;

    assert!(env.send("https://example.com/ttl").await?.ok);
    env.clock.advance(Duration::from_secs(59));
    assert!(!env.send("https://example.com/ttl").await?.ok);

    // Suppressed hits leave the original timestamp in place.
    env.clock.advance(Duration::from_secs(2));
    assert!(env.send("https://example.com/ttl").await?.ok);
    assert_eq!(env.received_count().await, 2);
    Ok(())
}

#[tokio::test]
async fn tracking_params_do_not_defeat_dedupe() -> Result<()> {
    let env = TestEnv::new().await?;
    env.respond_with(200).await;

    assert!(env.send("https://example.com/p?b=2&a=1&utm_source=mail").await?.ok);
    let again = env.send("https://example.com/p?a=1&fbclid=zz&b=2").await?;

    assert_eq!(again.error, Some(DeliveryError::DuplicateSuppressed));
    assert_eq!(env.received_bodies().await, vec!["https://example.com/p?a=1&b=2"]);
    Ok(())
}

#[tokio::test]
async fn client_error_is_terminal() -> Result<()> {
    let env = TestEnv::new().await?;
    env.respond_with(404).await;

    let outcome = env.send("https://example.com/missing").await?;

    assert_eq!(outcome.error, Some(DeliveryError::ClientError { status_code: 404 }));
    assert_eq!(outcome.retry_in, None);
    assert!(env.store.jobs().await.is_empty());
    assert!(env.scheduler.delays().is_empty());
    assert_eq!(
        env.store.history_entries().await[0].error.as_deref(),
        Some("Webhook not found (HTTP 404). Check your webhook URL.")
    );
    Ok(())
}

#[tokio::test]
async fn rate_limit_is_queued() -> Result<()> {
    let env = TestEnv::new().await?;
    env.respond_with(429).await;

    let outcome = env.send("https://example.com/busy").await?;

    assert_eq!(outcome.error, Some(DeliveryError::RateLimited));
    assert_eq!(env.store.jobs().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn unreachable_webhook_is_queued_as_network_error() -> Result<()> {
    let env = TestEnv::new().await?;
    env.set_settings(courier_testing::settings_for("http://127.0.0.1:1/hook")).await;

    let outcome = env.send("https://example.com/offline").await?;

    assert_eq!(outcome.status, None);
    assert!(matches!(outcome.error, Some(DeliveryError::NetworkError { .. })));
    assert_eq!(outcome.retry_in, Some(Duration::from_secs(1)));
    assert_eq!(env.store.jobs().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn full_queue_rejects_with_capacity_error() -> Result<()> {
    let env = TestEnvBuilder::new().queue_capacity(2).build().await?;
    env.respond_with(500).await;

    for n in 0..2 {
        let outcome = env.send(&format!("https://example.com/{n}")).await?;
        assert!(outcome.retry_in.is_some());
    }
    let outcome = env.send("https://example.com/overflow").await?;

    assert_eq!(outcome.error, Some(DeliveryError::QueueFull { capacity: 2 }));
    assert_eq!(outcome.status, Some(500));
    assert_eq!(outcome.retry_in, None);
    assert_eq!(env.store.jobs().await.len(), 2);
    assert_eq!(env.scheduler.delays().len(), 2);
    assert_eq!(
        env.store.history_entries().await[0].error.as_deref(),
        Some("Queue is full (2 items max). Please clear queue or wait for retries to complete.")
    );
    Ok(())
}

#[tokio::test]
async fn signed_json_request_carries_verifiable_signature() -> Result<()> {
    let env = TestEnv::new().await?;
    env.respond_with(200).await;
    env.set_settings(
        SettingsBuilder::new(env.webhook_url())
            .json(r#"{"url":"{{url}}","source":"{{source}}","at":"{{isoTimestamp}}"}"#)
            .secret(TEST_SECRET)
            .header("Authorization", "Bearer t0ken")
            .header("", "skipped")
            .build(),
    )
    .await;

    assert!(env.send("https://example.com/signed").await?.ok);

    let requests = env.http_mock.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    let header = |name: &str| {
        request.headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
    };

    assert_eq!(header("content-type").as_deref(), Some("application/json"));
    assert_eq!(header("authorization").as_deref(), Some("Bearer t0ken"));
    assert!(header(REQUEST_ID_HEADER).is_some());

    let body: serde_json::Value = serde_json::from_slice(&request.body)?;
    assert_eq!(body["url"], "https://example.com/signed");
    assert_eq!(body["source"], "courier");
    assert_eq!(header(TIMESTAMP_HEADER).as_deref(), body["at"].as_str());

    let signature = header(SIGNATURE_HEADER).unwrap_or_default();
    assert_eq!(signature.len(), 64);
    assert!(verify_signature(&request.body, &signature, TEST_SECRET).is_ok());

    let summary = &env.store.history_entries().await[0].request_summary;
    assert_eq!(summary.method, "POST");
    assert_eq!(summary.size, request.body.len());
    Ok(())
}

#[tokio::test]
async fn page_details_feed_the_template() -> Result<()> {
    let page = article_page();
    let env = TestEnvBuilder::new()
        .page(StaticPageContext::empty().with_active_page(TEST_TAB, page.clone()))
        .build()
        .await?;
    env.respond_with(200).await;
    env.set_settings(
        SettingsBuilder::new(env.webhook_url())
            .json(
                r#"{"url":"{{url}}","title":"{{ title }}","sel":"{{selection}}","og":"{{ogTitle}}","type":"{{ogType}}","pub":"{{publishedTime}}","x":"{{nope}}"}"#,
            )
            .with_page_details()
            .build(),
    )
    .await;

    let outcome =
        env.dispatch(SendRequest::new(Action::Page, page.url.clone()).with_tab(TEST_TAB)).await?;
    assert!(outcome.ok);

    let bodies = env.received_bodies().await;
    let body: serde_json::Value = serde_json::from_str(&bodies[0])?;
    assert_eq!(body["url"], "https://news.example/story?id=9");
    assert_eq!(body["title"], "A \"quoted\" story");
    assert_eq!(body["sel"], "first line\nsecond line");
    assert_eq!(body["og"], "Story");
    assert_eq!(body["type"], "article");
    assert_eq!(body["pub"], "2024-05-01T08:00:00Z");
    assert_eq!(body["x"], "");
    Ok(())
}

#[tokio::test]
async fn disabled_toggles_leave_fields_empty() -> Result<()> {
    let page = article_page();
    let env = TestEnvBuilder::new()
        .page(StaticPageContext::empty().with_page(TEST_TAB, page.clone()))
        .build()
        .await?;
    env.respond_with(200).await;
    env.set_settings(
        SettingsBuilder::new(env.webhook_url())
            .json(r#"{"url":"{{url}}","sel":"{{selection}}","og":"{{ogTitle}}"}"#)
            .build(),
    )
    .await;

    env.dispatch(SendRequest::new(Action::Page, page.url.clone()).with_tab(TEST_TAB)).await?;

    let body: serde_json::Value = serde_json::from_str(&env.received_bodies().await[0])?;
    assert_eq!(body["url"], "https://news.example/story?id=9");
    assert_eq!(body["sel"], "");
    assert_eq!(body["og"], "");
    Ok(())
}

#[tokio::test]
async fn success_notifies_and_copies_canonical_url() -> Result<()> {
    let env = TestEnv::new().await?;
    env.respond_with(200).await;

    assert!(env.send("https://example.com/copy?utm_medium=x").await?.ok);

    assert_eq!(
        env.effects.notifications(),
        vec![(SUCCESS_NOTIFICATION_TITLE.to_string(), "Successfully sent to 127.0.0.1".to_string())]
    );
    let copied = env.effects.wait_for_clipboard(1, Duration::from_secs(1)).await;
    assert_eq!(copied, vec!["https://example.com/copy"]);
    Ok(())
}

#[tokio::test]
async fn notifications_can_be_disabled() -> Result<()> {
    let env = TestEnv::new().await?;
    env.respond_with(200).await;
    env.set_settings(SettingsBuilder::new(env.webhook_url()).notifications(false).build()).await;

    assert!(env.send("https://example.com/quiet").await?.ok);
    assert!(env.effects.notifications().is_empty());
    Ok(())
}

#[tokio::test]
async fn clipboard_failure_does_not_affect_delivery() -> Result<()> {
    let env =
        TestEnvBuilder::new().effects(RecordingSideEffects::with_failing_clipboard()).build().await?;
    env.respond_with(200).await;

    let outcome = env.send("https://example.com/clip").await?;

    assert!(outcome.ok);
    assert_eq!(env.effects.wait_for_clipboard(1, Duration::from_secs(1)).await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn webhook_override_takes_precedence() -> Result<()> {
    let env = TestEnv::new().await?;
    env.respond_with(200).await;
    env.set_settings(courier_testing::settings_for("http://127.0.0.1:1/unused")).await;

    let outcome = env
        .dispatch(SendRequest::new(Action::Click, "https://example.com/o").with_webhook(env.webhook_url()))
        .await?;

    assert!(outcome.ok);
    assert_eq!(env.received_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn missing_destination_sends_nothing() -> Result<()> {
    let env = TestEnv::new().await?;
    env.respond_with(200).await;
    env.set_settings(Settings::default()).await;

    let outcome = env.send("https://example.com/").await?;

    assert_eq!(outcome.error, Some(DeliveryError::NoWebhookConfigured));
    assert_eq!(env.received_count().await, 0);
    assert_eq!(env.store.history_entries().await.len(), 1);
    Ok(())
}
