//! Tests for the reqwest-backed discovery/handshake API against wiremock.

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use streamchat::{HttpApi, ServerDiscovery, ServerKind, SessionError, TextFetcher};

#[tokio::test]
async fn test_discover_chat_servers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/servers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "server_ip": "10.0.0.1" },
            { "server_ip": "10.0.0.2:8080" }
        ])))
        .mount(&server)
        .await;

    let api = HttpApi::new(server.uri()).unwrap();
    let hosts = api.discover_servers(ServerKind::Chat).await.unwrap();
    assert_eq!(hosts, vec!["10.0.0.1", "10.0.0.2:8080"]);
}

#[tokio::test]
async fn test_discover_viewer_servers_uses_the_player_path() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/player/server"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{ "server_ip": "10.0.0.9" }])),
        )
        .mount(&server)
        .await;

    let api = HttpApi::new(server.uri()).unwrap();
    let hosts = api.discover_servers(ServerKind::Viewer).await.unwrap();
    assert_eq!(hosts, vec!["10.0.0.9"]);
}

#[tokio::test]
async fn test_non_success_status_is_a_handshake_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/servers"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let api = HttpApi::new(server.uri()).unwrap();
    assert!(matches!(
        api.discover_servers(ServerKind::Chat).await,
        Err(SessionError::Handshake(_))
    ));
}

#[tokio::test]
async fn test_malformed_discovery_body_is_a_handshake_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chat/servers"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let api = HttpApi::new(server.uri()).unwrap();
    assert!(matches!(
        api.discover_servers(ServerKind::Chat).await,
        Err(SessionError::Handshake(_))
    ));
}

#[tokio::test]
async fn test_fetch_text_returns_the_raw_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/socket.io/1/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("42:60:60:websocket"))
        .mount(&server)
        .await;

    let api = HttpApi::new(server.uri()).unwrap();
    let body = api
        .fetch_text(&format!("{}/socket.io/1/", server.uri()))
        .await
        .unwrap();
    assert_eq!(body, "42:60:60:websocket");
}

#[tokio::test]
async fn test_fetch_text_non_success_is_a_handshake_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/socket.io/1/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let api = HttpApi::new(server.uri()).unwrap();
    assert!(matches!(
        api.fetch_text(&format!("{}/socket.io/1/", server.uri())).await,
        Err(SessionError::Handshake(_))
    ));
}
