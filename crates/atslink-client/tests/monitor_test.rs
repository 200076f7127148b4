//! Change-of-state monitoring against the mock panel: ack, targeted
//! refresh, diffing, and the empty-bitmap full refresh.

mod support;

use std::sync::atomic::Ordering;
use std::time::Duration;

use atslink_client::{Auth, Client, ClientConfig, EntityKind, cancel_pair};
use support::MockPanelConfig;
use tokio::sync::mpsc;

fn config_for(panel: &support::MockPanel) -> ClientConfig {
    let mut config = ClientConfig::new(
        panel.addr.ip().to_string(),
        panel.addr.port(),
        "AAAAAAAAAAAABBBBBBBBBBBB",
        Auth::Pin("1234".to_string()),
    );
    config.call_timeout = Duration::from_secs(2);
    config.cos_settle = Duration::from_millis(5);
    config
}

#[tokio::test]
async fn notification_produces_typed_change_events() {
    let mut mock_config = MockPanelConfig::default();
    mock_config.changed.insert(0x01, vec![2]);
    mock_config.statuses.insert((0x01, 2), vec![0x01, 0x00, 0x00]);
    let panel = support::start(mock_config).await;

    let mut client = Client::connect(config_for(&panel)).await.expect("connect");
    client.load_inventory().await.expect("inventory");

    let (events_tx, mut events_rx) = mpsc::channel(16);
    let (canceller, token) = cancel_pair();

    let monitor = tokio::spawn(async move {
        let result = client.run_monitor(events_tx, &token).await;
        (client, result)
    });

    panel.inject_cos(0x01);

    let event = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
        .await
        .expect("an event should arrive")
        .expect("channel open");

    assert_eq!(event.kind, EntityKind::Zone);
    assert_eq!(event.id, 2);
    assert_eq!(event.name.as_deref(), Some("Hallway"));
    assert_eq!(event.old, None, "first observation has no cached state");
    assert_eq!(event.new, vec![0x01, 0x00, 0x00]);

    canceller.cancel();
    let (client, result) = monitor.await.expect("monitor task");
    result.expect("monitor should end cleanly");

    assert!(panel.stats.acks_received.load(Ordering::SeqCst) >= 1, "the COS must be acked");
    client.disconnect().await;
}

#[tokio::test]
async fn empty_change_bitmap_refreshes_the_whole_type() {
    let mut mock_config = MockPanelConfig::default();
    // The bitmap for areas stays empty, but area 1 reports set
    mock_config.statuses.insert((0x02, 1), vec![0x01; 13]);
    let panel = support::start(mock_config).await;

    let mut client = Client::connect(config_for(&panel)).await.expect("connect");
    client.load_inventory().await.expect("inventory");

    let (events_tx, mut events_rx) = mpsc::channel(16);
    let (canceller, token) = cancel_pair();

    let monitor = tokio::spawn(async move {
        let result = client.run_monitor(events_tx, &token).await;
        (client, result)
    });

    panel.inject_cos(0x02);

    let event = tokio::time::timeout(Duration::from_secs(5), events_rx.recv())
        .await
        .expect("an event should arrive")
        .expect("channel open");
    assert_eq!(event.kind, EntityKind::Area);
    assert_eq!(event.id, 1);
    assert_eq!(event.name.as_deref(), Some("House"));

    canceller.cancel();
    let (client, result) = monitor.await.expect("monitor task");
    result.expect("monitor should end cleanly");
    client.disconnect().await;
}

#[tokio::test]
async fn unchanged_status_emits_no_event() {
    let mut mock_config = MockPanelConfig::default();
    mock_config.changed.insert(0x01, vec![2]);
    let panel = support::start(mock_config).await;

    let mut client = Client::connect(config_for(&panel)).await.expect("connect");
    client.load_inventory().await.expect("inventory");
    // Prime the cache so the refresh sees identical bytes
    client.entity_statuses(EntityKind::Zone).await.expect("statuses");

    let (events_tx, mut events_rx) = mpsc::channel(16);
    let (canceller, token) = cancel_pair();

    let monitor = tokio::spawn(async move {
        let result = client.run_monitor(events_tx, &token).await;
        (client, result)
    });

    panel.inject_cos(0x01);
    let got = tokio::time::timeout(Duration::from_millis(500), events_rx.recv()).await;
    assert!(got.is_err(), "identical status bytes must not produce an event");

    canceller.cancel();
    let (client, result) = monitor.await.expect("monitor task");
    result.expect("monitor should end cleanly");
    client.disconnect().await;
}
