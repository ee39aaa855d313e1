//! Poller and startup metadata against a scripted Moonraker

mod common;

use common::{standard_reply, test_config, MockMoonraker, RecordingPublisher, Reply};
use moonwire_bridge::poller::publish_initial_info;
use moonwire_bridge::{fetch_initial_metadata, BridgeError, MoonrakerApi, Outlet, Poller};
use moonwire_client::{ClientBuilder, MoonwireClient};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn connect(server: &MockMoonraker) -> MoonwireClient {
    let config = test_config(server.port());
    ClientBuilder::from_config(config.moonraker.client_config())
        .with_auto_reconnect(false)
        .connect(&CancellationToken::new())
        .await
        .unwrap()
}

fn outlet(publisher: &Arc<RecordingPublisher>) -> Outlet {
    Outlet::new(publisher.clone(), &test_config(0).publish).with_retry_unit(Duration::from_millis(1))
}

#[tokio::test]
async fn test_poll_publishes_state_and_objects() {
    let server = MockMoonraker::healthy().await;
    let client = connect(&server).await;
    let publisher = RecordingPublisher::new();
    let config = test_config(server.port());

    let poller = Poller::new(
        MoonrakerApi::new(client.clone(), CancellationToken::new()),
        outlet(&publisher),
        config.moonraker.monitored_objects_value(),
        Duration::from_secs(1),
    );

    let published = poller.poll_once().await.unwrap();
    assert_eq!(published, 3);

    assert_eq!(publisher.payloads("moonraker/klipper/state"), vec!["ready"]);
    assert_eq!(
        publisher.payloads("moonraker/objects/print_stats"),
        vec![r#"{"state":"standby"}"#]
    );
    assert_eq!(publisher.payloads("moonraker/objects/extruder").len(), 1);
    assert!(publisher.payloads("moonraker/objects/eventtime").is_empty());

    // Polled values are never retained
    assert!(publisher.sent().iter().all(|(_, _, retain)| !retain));

    // Empty field lists go out as null
    let (_, params) = server
        .calls()
        .into_iter()
        .find(|(m, _)| m == "printer.objects.query")
        .unwrap();
    assert_eq!(params["objects"]["print_stats"], Value::Null);
    assert_eq!(params["objects"]["toolhead"], json!(["position"]));

    client.disconnect().await;
}

#[tokio::test]
async fn test_mostly_failed_object_publish_fails_the_poll() {
    let server = MockMoonraker::healthy().await;
    let client = connect(&server).await;
    let publisher = RecordingPublisher::new();
    publisher.fail_topics_containing("/objects/");

    let poller = Poller::new(
        MoonrakerApi::new(client.clone(), CancellationToken::new()),
        outlet(&publisher),
        json!({"print_stats": null}),
        Duration::from_secs(1),
    );

    let err = poller.poll_once().await.unwrap_err();
    assert!(matches!(err, BridgeError::ObjectPublish { failed: 3, total: 3 }));

    client.disconnect().await;
}

#[tokio::test]
async fn test_failing_ticks_widen_interval() {
    let server = MockMoonraker::start(|method, _| match method {
        "server.info" => Reply::Error(-32000, "Klippy Disconnected"),
        other => standard_reply(other),
    })
    .await;
    let client = connect(&server).await;
    let publisher = RecordingPublisher::new();

    let mut poller = Poller::new(
        MoonrakerApi::new(client.clone(), CancellationToken::new()),
        outlet(&publisher),
        json!({}),
        Duration::from_secs(2),
    );

    for _ in 0..5 {
        poller.tick().await;
    }
    assert_eq!(poller.interval().current(), Duration::from_secs(4));
    assert_eq!(poller.interval().failures(), 5);
    assert!(publisher.sent().is_empty());

    client.disconnect().await;
}

#[tokio::test]
async fn test_initial_info_publishes_both_documents() {
    let server = MockMoonraker::healthy().await;
    let client = connect(&server).await;
    let publisher = RecordingPublisher::new();
    let api = MoonrakerApi::new(client.clone(), CancellationToken::new());

    publish_initial_info(&api, &outlet(&publisher)).await.unwrap();

    let server_info: Value =
        serde_json::from_str(&publisher.payloads("moonraker/server/info")[0]).unwrap();
    assert_eq!(server_info["klippy_state"], "ready");
    assert_eq!(server_info["moonraker_version"], "v0.8.0-1");

    let printer_info: Value =
        serde_json::from_str(&publisher.payloads("moonraker/printer/info")[0]).unwrap();
    assert_eq!(printer_info["hostname"], "voron");

    client.disconnect().await;
}

#[tokio::test]
async fn test_metadata_retries_then_succeeds() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&attempts);
    let server = MockMoonraker::start(move |method, _| {
        if method == "server.info" && seen.fetch_add(1, Ordering::SeqCst) < 2 {
            return Reply::Error(-32000, "not yet");
        }
        standard_reply(method)
    })
    .await;
    let client = connect(&server).await;
    let publisher = RecordingPublisher::new();
    let api = MoonrakerApi::new(client.clone(), CancellationToken::new());

    let ok = fetch_initial_metadata(
        &api,
        &outlet(&publisher),
        Duration::from_millis(10),
        &CancellationToken::new(),
    )
    .await;

    assert!(ok);
    assert_eq!(server.count("server.info"), 3);
    assert_eq!(publisher.payloads("moonraker/server/info").len(), 1);

    client.disconnect().await;
}

#[tokio::test]
async fn test_metadata_gives_up_after_three_attempts() {
    let server = MockMoonraker::start(|_, _| Reply::Error(-32000, "broken")).await;
    let client = connect(&server).await;
    let publisher = RecordingPublisher::new();
    let api = MoonrakerApi::new(client.clone(), CancellationToken::new());

    let started = std::time::Instant::now();
    let ok = fetch_initial_metadata(
        &api,
        &outlet(&publisher),
        Duration::from_millis(20),
        &CancellationToken::new(),
    )
    .await;

    assert!(!ok);
    assert_eq!(server.count("server.info"), 3);
    // Waits 1 and 2 units between the attempts
    assert!(started.elapsed() >= Duration::from_millis(60));
    assert!(publisher.sent().is_empty());

    client.disconnect().await;
}

#[tokio::test]
async fn test_metadata_wait_is_cancellable() {
    let server = MockMoonraker::start(|_, _| Reply::Error(-32000, "broken")).await;
    let client = connect(&server).await;
    let publisher = RecordingPublisher::new();
    let api = MoonrakerApi::new(client.clone(), CancellationToken::new());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let ok = tokio::time::timeout(
        Duration::from_secs(2),
        fetch_initial_metadata(&api, &outlet(&publisher), Duration::from_secs(30), &cancel),
    )
    .await
    .unwrap();
    assert!(!ok);
    assert_eq!(server.count("server.info"), 1);

    client.disconnect().await;
}

#[tokio::test]
async fn test_api_calls() {
    let server = MockMoonraker::start(|method, _| match method {
        "printer.objects.list" => Reply::Result(json!({"objects": ["webhooks", "toolhead", 7]})),
        "server.websocket.id" => Reply::Result(json!({"websocket_id": 1730})),
        "printer.gcode.script" | "printer.emergency_stop" | "printer.restart"
        | "printer.firmware_restart" => Reply::Result(json!("ok")),
        "printer.objects.subscribe" => Reply::Result(json!({
            "eventtime": 1.0,
            "status": {"webhooks": {"state": "ready"}}
        })),
        _ => Reply::Silent,
    })
    .await;
    let client = connect(&server).await;
    let api = MoonrakerApi::new(client.clone(), CancellationToken::new());

    assert_eq!(api.list_objects().await.unwrap(), vec!["webhooks", "toolhead"]);
    assert_eq!(api.websocket_id().await.unwrap(), 1730);

    let status = api.subscribe_objects(&json!({"webhooks": null})).await.unwrap();
    assert_eq!(status["webhooks"]["state"], "ready");

    api.run_gcode("G28").await.unwrap();
    api.emergency_stop().await.unwrap();
    api.restart().await.unwrap();
    api.firmware_restart().await.unwrap();

    let calls = server.calls();
    let (_, gcode) = calls
        .iter()
        .find(|(m, _)| m == "printer.gcode.script")
        .unwrap();
    assert_eq!(gcode, &json!({"script": "G28"}));
    let (_, estop) = calls
        .iter()
        .find(|(m, _)| m == "printer.emergency_stop")
        .unwrap();
    assert_eq!(estop, &Value::Null);

    client.disconnect().await;
}
