use bambu_devkit::test_utils::test_settings;
use bambu_devkit::{count, value_of, FailingSink, PanickingSink, ReportBuilder, ScrapeHarness};
use bambu_devkit::{REPORT_TOPIC, REQUEST_TOPIC};
use bambu_exporter::metrics::{Metric, Sample};
use bambu_exporter::{ScrapeError, ScrapeOutcome, TransportError};
use std::time::Duration;

#[tokio::test]
async fn test_no_report_yields_no_samples() {
    let harness = ScrapeHarness::new();

    let (outcome, samples) = harness.scrape().await.unwrap();

    assert_eq!(outcome, ScrapeOutcome::NoData);
    assert!(samples.is_empty());
    assert_eq!(harness.transport.opened(), 1);
    assert_eq!(harness.transport.closed(), 1);
    assert_eq!(harness.transport.subscriptions(), vec![REPORT_TOPIC]);
}

#[tokio::test]
async fn test_full_report_with_ams() {
    let harness = ScrapeHarness::new();
    harness
        .transport
        .deliver_on_subscribe(ReportBuilder::new().ams(2, 4).to_bytes());

    let (outcome, samples) = harness.scrape().await.unwrap();

    assert_eq!(outcome, ScrapeOutcome::Emitted(samples.len()));
    assert_eq!(count(&samples, Metric::AmsTemp), 2);
    assert_eq!(count(&samples, Metric::AmsHumidity), 2);
    assert_eq!(count(&samples, Metric::AmsBedTemp), 8);
    assert_eq!(count(&samples, Metric::AmsTrayRemain), 8);
    assert_eq!(count(&samples, Metric::AmsTrayColor), 8);
    assert_eq!(value_of(&samples, Metric::WifiSignal), Some(-45.0));
    assert_eq!(value_of(&samples, Metric::NozzleTemper), Some(219.5));
    assert_eq!(count(&samples, Metric::PrintStateInfo), 1);
}

#[tokio::test]
async fn test_tray_series_carry_position_labels() {
    let harness = ScrapeHarness::new();
    harness
        .transport
        .deliver_on_subscribe(ReportBuilder::new().ams(1, 2).to_bytes());

    let (_, samples) = harness.scrape().await.unwrap();
    let colors: Vec<&Sample> = samples
        .iter()
        .filter(|s| s.metric == Metric::AmsTrayColor)
        .collect();

    assert_eq!(colors[1].labels, vec!["0", "1", "FF0100FF", "PETG"]);
    assert_eq!(colors[1].value, 1.0);
}

#[tokio::test]
async fn test_last_snapshot_survives_between_scrapes() {
    let harness = ScrapeHarness::new();
    harness
        .transport
        .deliver_on_subscribe(ReportBuilder::new().wifi_signal("-52dBm").to_bytes());
    harness.scrape().await.unwrap();

    let (outcome, samples) = harness.scrape().await.unwrap();

    assert!(matches!(outcome, ScrapeOutcome::Emitted(_)));
    assert_eq!(value_of(&samples, Metric::WifiSignal), Some(-52.0));
    assert_eq!(harness.transport.opened(), 2);
    assert_eq!(harness.transport.closed(), 2);
}

#[tokio::test]
async fn test_partial_push_keeps_previous_snapshot() {
    let harness = ScrapeHarness::new();
    harness
        .transport
        .deliver_on_subscribe(ReportBuilder::new().wifi_signal("-40dBm").to_bytes());
    harness.scrape().await.unwrap();

    harness
        .transport
        .deliver_on_subscribe(ReportBuilder::new().without_wifi_signal().nozzle(30.0, 0.0).to_bytes());
    let (_, samples) = harness.scrape().await.unwrap();

    assert_eq!(value_of(&samples, Metric::WifiSignal), Some(-40.0));
    assert_eq!(value_of(&samples, Metric::NozzleTemper), Some(219.5));
    let health = harness.health();
    assert_eq!(health.reports_accepted, 1);
    assert_eq!(health.reports_ignored, 1);
}

#[tokio::test]
async fn test_malformed_payload_is_dropped() {
    let harness = ScrapeHarness::new();
    harness.transport.deliver_on_subscribe(b"not json".to_vec());

    let (outcome, samples) = harness.scrape().await.unwrap();

    assert_eq!(outcome, ScrapeOutcome::NoData);
    assert!(samples.is_empty());
    assert_eq!(harness.health().reports_malformed, 1);
}

#[tokio::test]
async fn test_unreachable_printer() {
    let harness = ScrapeHarness::new();
    harness.transport.fail_connections(true);

    let (outcome, samples) = harness.scrape().await.unwrap();

    assert_eq!(outcome, ScrapeOutcome::Unreachable);
    assert!(samples.is_empty());
    assert_eq!(harness.transport.opened(), 0);
    assert_eq!(harness.transport.closed(), 0);
    let health = harness.health();
    assert_eq!(health.connect_failures, 1);
    assert!(health.transport_status.starts_with("unreachable"));

    harness.transport.fail_connections(false);
    let (outcome, _) = harness.scrape().await.unwrap();
    assert_eq!(outcome, ScrapeOutcome::NoData);
}

#[tokio::test]
async fn test_emit_error_still_disconnects() {
    let harness = ScrapeHarness::new();
    harness
        .transport
        .deliver_on_subscribe(ReportBuilder::new().to_bytes());

    let mut sink = FailingSink::after(3);
    let result = harness.collector().collect(&mut sink).await;

    assert!(matches!(result, Err(ScrapeError::Emit(_))));
    assert_eq!(sink.accepted.len(), 3);
    assert_eq!(harness.transport.opened(), harness.transport.closed());
    assert_eq!(harness.health().scrape_failures, 1);
}

#[tokio::test]
async fn test_emit_panic_still_disconnects() {
    let harness = ScrapeHarness::new();
    harness
        .transport
        .deliver_on_subscribe(ReportBuilder::new().to_bytes());

    let result = harness.collector().collect(&mut PanickingSink).await;

    assert!(matches!(result, Err(ScrapeError::EmitPanicked)));
    assert_eq!(harness.transport.opened(), 1);
    assert_eq!(harness.transport.closed(), 1);
    assert_eq!(harness.health().transport_status, "idle");
}

#[tokio::test]
async fn test_subscribe_failure_still_disconnects() {
    let harness = ScrapeHarness::new();
    harness.transport.fail_subscribe(true);

    let mut samples: Vec<Sample> = Vec::new();
    let result = harness.collector().collect(&mut samples).await;

    assert!(matches!(
        result,
        Err(ScrapeError::Transport(TransportError::Subscribe { .. }))
    ));
    assert_eq!(harness.transport.opened(), 1);
    assert_eq!(harness.transport.closed(), 1);
    let health = harness.health();
    assert_eq!(health.scrape_failures, 1);
    assert_eq!(health.scrapes_without_data, 0);
}

#[tokio::test]
async fn test_delivery_after_grace_is_not_applied() {
    let harness = ScrapeHarness::new();
    harness.transport.deliver_on_subscribe_after(
        ReportBuilder::new().to_bytes(),
        Duration::from_millis(200),
    );

    let (outcome, _) = harness.scrape().await.unwrap();
    assert_eq!(outcome, ScrapeOutcome::NoData);

    // the session is gone, so the pending delivery never lands
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!harness.store().is_present());
}

#[tokio::test]
async fn test_full_report_request_is_answered() {
    let harness = ScrapeHarness::new();
    harness
        .transport
        .reply_on_publish(ReportBuilder::new().ams(1, 4).to_bytes());

    let (outcome, samples) = harness.scrape().await.unwrap();

    assert!(matches!(outcome, ScrapeOutcome::Emitted(_)));
    assert_eq!(count(&samples, Metric::AmsBedTemp), 4);
    let requests = harness.transport.find_published(REQUEST_TOPIC);
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].payload).unwrap();
    assert_eq!(body["pushing"]["command"], "pushall");
}

#[tokio::test]
async fn test_full_report_request_can_be_disabled() {
    let mut settings = test_settings();
    settings.request_full_report = false;
    let harness = ScrapeHarness::with_settings(settings, Duration::from_secs(2));

    harness.scrape().await.unwrap();

    assert!(harness.transport.published().is_empty());
}
