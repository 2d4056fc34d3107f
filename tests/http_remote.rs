//! HTTP contract tests for the remote client.
//!
//! A wiremock server plays the backend: route shapes, the JSON bodies,
//! timestamp normalization and status-code mapping are checked against it,
//! then a full engine is driven over real HTTP.
//!
//! Run with: `cargo test --test http_remote`

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;
use tokio::sync::watch;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use goal_sync::engine::never_synced;
use goal_sync::{
    GoalDto, HttpRemoteClient, HttpRemoteConfig, InMemoryStore, RemoteClient, SyncEngine,
    SyncEngineConfig, SyncError,
};

fn client_for(server: &MockServer) -> HttpRemoteClient {
    HttpRemoteClient::new(HttpRemoteConfig {
        base_url: server.uri(),
        api_key: Some("test-key".into()),
        timeout: Duration::from_secs(2),
    })
    .unwrap()
}

fn sample_goal() -> GoalDto {
    GoalDto {
        id: Uuid::new_v4(),
        name: "Read".into(),
        target_value: 12,
        current_value: 3,
        updated_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
    }
}

// =============================================================================
// Route and body shapes
// =============================================================================

#[tokio::test]
async fn test_create_posts_goal_with_bearer() {
    let server = MockServer::start().await;
    let goal = sample_goal();

    Mock::given(method("POST"))
        .and(path("/goals"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "id": goal.id,
            "name": "Read",
            "target_value": 12,
            "current_value": 3,
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server).create_goal(&goal).await.unwrap();
}

#[tokio::test]
async fn test_update_and_delete_routes() {
    let server = MockServer::start().await;
    let goal = sample_goal();

    Mock::given(method("PUT"))
        .and(path(format!("/goals/{}", goal.id)))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("/goals/{}", goal.id)))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client.update_goal(&goal).await.unwrap();
    client.delete_goal(goal.id).await.unwrap();
}

#[tokio::test]
async fn test_fetch_sends_cursor_and_normalizes_timestamps() {
    let server = MockServer::start().await;
    let id = Uuid::new_v4();

    Mock::given(method("GET"))
        .and(path("/sync"))
        .and(query_param("last_sync_timestamp", "1970-01-01T00:00:00.000000+00:00"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "goals": [{
                "id": id,
                "name": "Swim",
                "target_value": 5,
                "current_value": 5,
                "updated_at": "2024-03-01T12:00:00.250Z"
            }],
            "server_timestamp": "2024-03-01T12:00:05"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let changes = client_for(&server).fetch_changes_since(never_synced()).await.unwrap();

    assert_eq!(changes.goals.len(), 1);
    assert_eq!(changes.goals[0].id, id);
    assert_eq!(
        changes.goals[0].updated_at,
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() + chrono::Duration::milliseconds(250)
    );
    assert_eq!(changes.server_timestamp, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 5).unwrap());
}

// =============================================================================
// Error mapping
// =============================================================================

#[tokio::test]
async fn test_server_error_message_is_extracted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/goals"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "name is required"})))
        .mount(&server)
        .await;

    let err = client_for(&server).create_goal(&sample_goal()).await.unwrap_err();

    match err {
        SyncError::Server { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "name is required");
        }
        other => panic!("expected server error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_5xx_is_transient_4xx_is_not() {
    let server = MockServer::start().await;
    let goal = sample_goal();
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.update_goal(&goal).await.unwrap_err().is_transient());
    assert!(!client.delete_goal(goal.id).await.unwrap_err().is_transient());
}

#[tokio::test]
async fn test_malformed_sync_body_is_decoding_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sync"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server).fetch_changes_since(never_synced()).await.unwrap_err();

    assert!(matches!(err, SyncError::Decoding(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_unreachable_host_is_transport_error() {
    let client = HttpRemoteClient::new(HttpRemoteConfig {
        // Reserved port on localhost, nothing listens there
        base_url: "http://127.0.0.1:9".into(),
        api_key: None,
        timeout: Duration::from_millis(500),
    })
    .unwrap();

    let err = client.fetch_changes_since(never_synced()).await.unwrap_err();

    assert!(matches!(err, SyncError::Transport(_)));
    assert!(err.is_transient());
}

// =============================================================================
// Engine over HTTP
// =============================================================================

#[tokio::test]
async fn test_engine_push_and_pull_over_http() {
    let server = MockServer::start().await;
    let remote_id = Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/goals"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sync"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "goals": [{
                "id": remote_id,
                "name": "From another device",
                "target_value": 3,
                "current_value": 9,
                "updated_at": "2024-05-01T08:00:00Z"
            }],
            "server_timestamp": "2024-05-01T08:00:01Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let config = SyncEngineConfig {
        remote_url: Some(server.uri()),
        ..Default::default()
    };
    let (_tx, rx) = watch::channel(config.clone());
    let engine = SyncEngine::new(
        config,
        rx,
        Arc::new(InMemoryStore::new()),
        Arc::new(client_for(&server)),
    );
    engine.start().await.unwrap();

    engine.create_goal("Local goal", 4).await.unwrap();
    let report = engine.sync_now().await.unwrap();

    assert_eq!(report.inserted, 1);
    assert_eq!(engine.pending_pushes().await.unwrap(), 0);

    let pulled = engine.goal(remote_id).await.unwrap().unwrap();
    // Clamped and recomputed, never trusted from the wire
    assert_eq!(pulled.current_value(), 3);
    assert!(pulled.is_complete());
    assert_eq!(
        engine.cursor().await.unwrap(),
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 1).unwrap()
    );
}

#[tokio::test]
async fn test_engine_resends_update_as_create_after_404() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "Goal not found"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/goals"))
        .respond_with(ResponseTemplate::new(201))
        .expect(2)
        .mount(&server)
        .await;

    let config = SyncEngineConfig::default();
    let (_tx, rx) = watch::channel(config.clone());
    let engine = SyncEngine::new(
        config,
        rx,
        Arc::new(InMemoryStore::new()),
        Arc::new(client_for(&server)),
    );

    let goal = engine.create_goal("Flaky", 2).await.unwrap();
    engine.drain_outbox().await.unwrap();
    engine.increment_goal(goal.id(), 1).await.unwrap();

    let report = engine.drain_outbox().await.unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(engine.pending_pushes().await.unwrap(), 0);
}

#[tokio::test]
async fn test_engine_resends_create_as_update_after_409() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/goals"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({"error": "Goal already exists"})))
        .expect(1)
        .mount(&server)
        .await;

    let config = SyncEngineConfig::default();
    let (_tx, rx) = watch::channel(config.clone());
    let engine = SyncEngine::new(
        config,
        rx,
        Arc::new(InMemoryStore::new()),
        Arc::new(client_for(&server)),
    );

    let goal = engine.create_goal("Landed twice", 5).await.unwrap();
    engine.increment_goal(goal.id(), 2).await.unwrap();

    Mock::given(method("PUT"))
        .and(path(format!("/goals/{}", goal.id())))
        .and(body_partial_json(json!({ "current_value": 2 })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let report = engine.drain_outbox().await.unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(report.rejected, 0);
    assert_eq!(engine.pending_pushes().await.unwrap(), 0);
}
