//! End-to-end pipeline scenarios: policy fetch -> observation -> delivery.

use crudlog_relay::{
    AuditRelay, DispatchMethod, EntitySnapshot, QueueConfig, RelayConfig, SystemContext,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{bearer_token, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn attrs(value: Value) -> Map<String, Value> {
    value.as_object().unwrap().clone()
}

fn fast_queue_config() -> QueueConfig {
    QueueConfig {
        max_tries: 3,
        backoff: vec![Duration::from_millis(10), Duration::from_millis(10)],
        request_timeout: Duration::from_secs(1),
    }
}

/// Relay wired to two mock servers: one serving the tracking policy, one
/// receiving log records.
async fn relay_for(
    policy: ResponseTemplate,
    dispatch_method: DispatchMethod,
) -> (Arc<AuditRelay>, MockServer, MockServer) {
    let config_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/config"))
        .and(bearer_token("sk-test"))
        .respond_with(policy)
        .mount(&config_server)
        .await;

    let log_server = MockServer::start().await;

    let config = RelayConfig {
        api_key: Some("sk-test".to_string()),
        config_endpoint: Some(format!("{}/config", config_server.uri())),
        log_endpoint: Some(format!("{}/log", log_server.uri())),
        dispatch_method,
        ..Default::default()
    };

    let relay = AuditRelay::new(
        config,
        fast_queue_config(),
        Arc::new(SystemContext),
        Arc::new(SystemContext),
    );
    (relay, config_server, log_server)
}

fn invoice_policy(events: Value, attributes: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "implicit": {
            "enabled": true,
            "tracked_models": [
                {"name": "Invoice", "events": events, "attributes": attributes}
            ]
        }
    }))
}

#[tokio::test]
async fn test_scenario_a_created_invoice_is_logged() {
    let (relay, _config_server, log_server) =
        relay_for(invoice_policy(json!(["created"]), json!(["*"])), DispatchMethod::Sync).await;
    Mock::given(method("POST"))
        .and(path("/log"))
        .and(bearer_token("sk-test"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&log_server)
        .await;

    relay.attach_tracked().await;

    let invoice = EntitySnapshot::new("Invoice", "7", attrs(json!({"id": 7, "total": 100})));
    relay.observer().created(&invoice).await;

    let requests = log_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["action_type"], "created");
    assert_eq!(body["entity_type"], "Invoice");
    assert_eq!(body["entity_id"], "7");
    assert_eq!(body["details"]["attributes"], json!({"id": 7, "total": 100}));
    assert_eq!(body["user_name"], "System/Unknown");
    // RFC 3339 UTC timestamp.
    assert!(body["logged_at"].as_str().unwrap().contains('T'));
}

#[tokio::test]
async fn test_scenario_b_untracked_actions_emit_nothing() {
    let (relay, _config_server, log_server) =
        relay_for(invoice_policy(json!(["deleted"]), json!(["*"])), DispatchMethod::Sync).await;

    relay.attach_tracked().await;

    let invoice = EntitySnapshot::new("Invoice", "7", attrs(json!({"id": 7, "total": 100})));
    relay.observer().created(&invoice).await;
    relay
        .observer()
        .updated(&invoice, &attrs(json!({"id": 7, "total": 90})))
        .await;

    assert!(log_server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_scenario_c_update_logs_old_and_new_values() {
    let (relay, _config_server, log_server) = relay_for(
        invoice_policy(json!(["updated"]), json!(["total"])),
        DispatchMethod::Sync,
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/log"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&log_server)
        .await;

    relay.attach_tracked().await;

    let invoice = EntitySnapshot::new("Invoice", "7", attrs(json!({"id": 7, "total": 150})));
    relay
        .observer()
        .updated(&invoice, &attrs(json!({"id": 7, "total": 100})))
        .await;

    let requests = log_server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["action_type"], "updated");
    assert_eq!(body["details"]["old_values"], json!({"total": 100}));
    assert_eq!(body["details"]["new_values"], json!({"total": 150}));
    assert!(body["details"].get("attributes").is_none());
}

#[tokio::test]
async fn test_scenario_d_config_outage_disables_tracking() {
    let (relay, config_server, log_server) =
        relay_for(ResponseTemplate::new(500), DispatchMethod::Sync).await;

    relay.attach_tracked().await;
    relay.observer().register("Invoice");

    let invoice = EntitySnapshot::new("Invoice", "7", attrs(json!({"id": 7, "total": 100})));
    relay.observer().created(&invoice).await;
    relay.observer().deleted(&invoice).await;

    assert!(log_server.received_requests().await.unwrap().is_empty());
    // The failed fetch was cached: one request despite several observations.
    assert_eq!(config_server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_async_dispatch_end_to_end() {
    let (relay, _config_server, log_server) =
        relay_for(invoice_policy(json!(["created"]), json!(["*"])), DispatchMethod::Async).await;
    Mock::given(method("POST"))
        .and(path("/log"))
        .and(bearer_token("sk-test"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&log_server)
        .await;

    relay.attach_tracked().await;

    let invoice = EntitySnapshot::new("Invoice", "7", attrs(json!({"id": 7, "total": 100})));
    relay.observer().created(&invoice).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(log_server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_attach_tracked_registers_policy_entities() {
    let (relay, _config_server, _log_server) =
        relay_for(invoice_policy(json!(["created"]), json!(["*"])), DispatchMethod::Sync).await;

    assert!(!relay.observer().is_registered("Invoice"));
    relay.attach_tracked().await;
    assert!(relay.observer().is_registered("Invoice"));
}

#[tokio::test]
async fn test_initialize_is_idempotent() {
    let first = AuditRelay::initialize(
        RelayConfig::default(),
        Arc::new(SystemContext),
        Arc::new(SystemContext),
    );
    let second = AuditRelay::initialize(
        RelayConfig {
            api_key: Some("sk-other".to_string()),
            ..Default::default()
        },
        Arc::new(SystemContext),
        Arc::new(SystemContext),
    );

    // The winner's instance is shared; the loser's config is discarded.
    assert!(Arc::ptr_eq(&first, &second));
    assert!(AuditRelay::instance().is_some());
}
