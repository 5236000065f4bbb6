//! Token renewal behaviour against a mock API

use careauth_core::{CredentialStore, MemoryStore};
use careauth_http::{ClientError, EndReason, Session, SessionClient, SessionEvent};
use futures::future::join_all;
use reqwest::Method;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REFRESH_PATH: &str = "/token/refresh/";

fn client_with(
    server: &MockServer,
    entries: &[(&str, &str)],
    refresh_timeout: Duration,
) -> (SessionClient, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::with_entries(entries.iter().copied()));
    let session = Arc::new(Session::new(store.clone()));
    let client = SessionClient::builder()
        .base_url(server.uri())
        .refresh_timeout(refresh_timeout)
        .session(session)
        .build()
        .unwrap();
    (client, store)
}

fn logged_in(server: &MockServer) -> (SessionClient, Arc<MemoryStore>) {
    client_with(
        server,
        &[("access-token", "A1"), ("refresh-token", "R1")],
        Duration::from_secs(5),
    )
}

/// `/records/` rejects A1 and accepts A2
async fn mount_records(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/records/"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "detail": "Given token not valid for any token type",
            "code": "token_not_valid"
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/records/"))
        .and(header("authorization", "Bearer A2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"records": []})))
        .mount(server)
        .await;
}

async fn get_records(client: &SessionClient) -> Result<Value, ClientError> {
    client.execute(client.request(Method::GET, "/records/")).await
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => seen.push(event),
            Err(TryRecvError::Empty | TryRecvError::Closed) => return seen,
            Err(TryRecvError::Lagged(_)) => {}
        }
    }
}

#[tokio::test]
async fn test_expired_token_is_renewed_and_request_replayed() {
    let server = MockServer::start().await;
    mount_records(&server).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_json(json!({"refresh": "R1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "A2"})))
        .expect(1)
        .mount(&server)
        .await;

    let (client, store) = logged_in(&server);
    let mut events = client.session().subscribe();

    let body = get_records(&client).await.unwrap();

    assert_eq!(body, json!({"records": []}));
    assert_eq!(store.get("access-token").unwrap().as_deref(), Some("A2"));
    assert_eq!(store.get("refresh-token").unwrap().as_deref(), Some("R1"));
    assert_eq!(drain(&mut events), vec![SessionEvent::Refreshed]);
    assert!(!client.coordinator().is_refreshing());
}

#[tokio::test]
async fn test_renewal_request_is_not_authorized() {
    let server = MockServer::start().await;
    mount_records(&server).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "A2"})))
        .mount(&server)
        .await;

    let (client, _) = logged_in(&server);
    get_records(&client).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let exchange = requests
        .iter()
        .find(|request| request.url.path() == REFRESH_PATH)
        .unwrap();
    assert!(exchange.headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_rotated_refresh_token_is_stored() {
    let server = MockServer::start().await;
    mount_records(&server).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"access": "A2", "refresh": "R2"})),
        )
        .mount(&server)
        .await;

    let (client, store) = logged_in(&server);
    get_records(&client).await.unwrap();

    assert_eq!(store.get("refresh-token").unwrap().as_deref(), Some("R2"));
    assert_eq!(client.session().refresh_token().as_deref(), Some("R2"));
}

#[tokio::test]
async fn test_concurrent_failures_share_one_exchange() {
    let server = MockServer::start().await;
    mount_records(&server).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access": "A2"}))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = logged_in(&server);
    let mut events = client.session().subscribe();

    let results = join_all((0..8).map(|_| get_records(&client))).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(client.coordinator().exchanges(), 1);
    assert_eq!(drain(&mut events), vec![SessionEvent::Refreshed]);

    let replays = server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|request| {
            request.url.path() == "/records/"
                && request.headers.get("authorization").is_some_and(|v| v == "Bearer A2")
        })
        .count();
    assert_eq!(replays, 8);
}

#[tokio::test]
async fn test_rejected_renewal_ends_session_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/records/"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/records/"))
        .and(header("authorization", "Bearer A2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    // A rejected exchange must not be renewed in turn
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"detail": "Token is blacklisted"}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (client, store) = logged_in(&server);
    let mut events = client.session().subscribe();

    let results = join_all((0..3).map(|_| get_records(&client))).await;

    for result in results {
        assert!(matches!(result, Err(ClientError::AuthenticationFailed(_))));
    }
    assert!(!client.session().is_authenticated());
    assert!(store.is_empty());
    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::Ended(EndReason::RefreshRejected)]
    );
}

#[tokio::test]
async fn test_unavailable_renewal_ends_session() {
    let server = MockServer::start().await;
    mount_records(&server).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let (client, store) = logged_in(&server);
    let mut events = client.session().subscribe();

    assert!(get_records(&client).await.unwrap_err().is_auth_failure());
    assert!(store.is_empty());
    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::Ended(EndReason::RefreshUnavailable)]
    );
}

#[tokio::test]
async fn test_malformed_renewal_response_ends_session() {
    let server = MockServer::start().await;
    mount_records(&server).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "A2"})))
        .mount(&server)
        .await;

    let (client, _) = logged_in(&server);
    let mut events = client.session().subscribe();

    assert!(get_records(&client).await.unwrap_err().is_auth_failure());
    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::Ended(EndReason::RefreshUnavailable)]
    );
}

#[tokio::test]
async fn test_renewal_timeout_ends_session() {
    let server = MockServer::start().await;
    mount_records(&server).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access": "A2"}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let (client, store) = client_with(
        &server,
        &[("access-token", "A1"), ("refresh-token", "R1")],
        Duration::from_millis(200),
    );
    let mut events = client.session().subscribe();

    let result = tokio::time::timeout(Duration::from_secs(3), get_records(&client))
        .await
        .expect("renewal deadline did not fire");

    assert!(matches!(result, Err(ClientError::AuthenticationFailed(_))));
    assert!(store.is_empty());
    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::Ended(EndReason::RefreshUnavailable)]
    );
    assert!(!client.coordinator().is_refreshing());
}

#[tokio::test]
async fn test_missing_refresh_token_skips_exchange() {
    let server = MockServer::start().await;
    mount_records(&server).await;
    Mock::given(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (client, store) = client_with(&server, &[("access-token", "A1")], Duration::from_secs(5));
    let mut events = client.session().subscribe();

    assert!(get_records(&client).await.unwrap_err().is_auth_failure());
    assert!(store.is_empty());
    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::Ended(EndReason::MissingRefreshToken)]
    );
}

#[tokio::test]
async fn test_second_rejection_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/records/"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "A2"})))
        .expect(1)
        .mount(&server)
        .await;

    let (client, _) = logged_in(&server);

    let result = get_records(&client).await;

    assert!(matches!(result, Err(ClientError::AuthenticationFailed(_))));
    // The renewal itself succeeded, so the session stays
    assert_eq!(client.session().access_token().as_deref(), Some("A2"));
}

#[tokio::test]
async fn test_shutdown_aborts_waiters_and_keeps_session() {
    let server = MockServer::start().await;
    mount_records(&server).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access": "A2"}))
                .set_delay(Duration::from_secs(2)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (client, store) = logged_in(&server);

    let waiter = tokio::spawn({
        let client = client.clone();
        async move { get_records(&client).await }
    });

    while !client.coordinator().is_refreshing() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    client.shutdown();

    let result = waiter.await.unwrap();
    assert!(matches!(result, Err(ClientError::AuthenticationFailed(_))));
    assert_eq!(store.get("access-token").unwrap().as_deref(), Some("A1"));
    assert_eq!(store.get("refresh-token").unwrap().as_deref(), Some("R1"));

    // Later failures resolve at once, without another exchange
    assert!(get_records(&client).await.unwrap_err().is_auth_failure());
    assert_eq!(client.coordinator().exchanges(), 1);
}

#[tokio::test]
async fn test_login_during_renewal_wins() {
    let server = MockServer::start().await;
    mount_records(&server).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access": "A-stale"}))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/records/"))
        .and(header("authorization", "Bearer A9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"records": [1]})))
        .mount(&server)
        .await;

    let (client, store) = logged_in(&server);

    let waiter = tokio::spawn({
        let client = client.clone();
        async move { get_records(&client).await }
    });
    while !client.coordinator().is_refreshing() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    client.logout();
    client
        .session()
        .login(careauth_http::TokenPair::new("A9", "R9"))
        .unwrap();

    // The renewed token belongs to the old session and is discarded
    let body = waiter.await.unwrap().unwrap();
    assert_eq!(body, json!({"records": [1]}));
    assert_eq!(store.get("access-token").unwrap().as_deref(), Some("A9"));
    assert_eq!(store.get("refresh-token").unwrap().as_deref(), Some("R9"));
}

#[tokio::test]
async fn test_renewal_settles_after_owner_is_dropped() {
    let server = MockServer::start().await;
    mount_records(&server).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access": "A2"}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (client, store) = logged_in(&server);

    let owner = tokio::spawn({
        let client = client.clone();
        async move { get_records(&client).await }
    });
    while !client.coordinator().is_refreshing() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    owner.abort();
    assert!(owner.await.unwrap_err().is_cancelled());

    tokio::time::timeout(Duration::from_secs(3), async {
        while client.coordinator().is_refreshing() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("renewal never settled");

    assert_eq!(store.get("access-token").unwrap().as_deref(), Some("A2"));
    assert!(get_records(&client).await.is_ok());
    assert_eq!(client.coordinator().exchanges(), 1);
}

#[tokio::test]
async fn test_new_session_does_not_join_previous_renewal() {
    let server = MockServer::start().await;
    mount_records(&server).await;
    Mock::given(method("GET"))
        .and(path("/records/"))
        .and(header("authorization", "Bearer B1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/records/"))
        .and(header("authorization", "Bearer B2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"records": [2]})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_json(json!({"refresh": "R1"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access": "A2"}))
                .set_delay(Duration::from_millis(500)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_json(json!({"refresh": "S1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "B2"})))
        .expect(1)
        .mount(&server)
        .await;

    let (client, store) = logged_in(&server);

    let previous = tokio::spawn({
        let client = client.clone();
        async move { get_records(&client).await }
    });
    while !client.coordinator().is_refreshing() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    client.logout();
    client
        .session()
        .login(careauth_http::TokenPair::new("B1", "S1"))
        .unwrap();

    let body = get_records(&client).await.unwrap();
    assert_eq!(body, json!({"records": [2]}));
    assert_eq!(client.coordinator().exchanges(), 2);
    assert_eq!(store.get("access-token").unwrap().as_deref(), Some("B2"));
    assert_eq!(store.get("refresh-token").unwrap().as_deref(), Some("S1"));

    // The old exchange's token is discarded; its waiter replays with B2
    assert!(previous.await.unwrap().is_ok());
    assert_eq!(store.get("access-token").unwrap().as_deref(), Some("B2"));
}

#[tokio::test]
async fn test_unsendable_access_token_is_renewed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/records/"))
        .and(header("authorization", "Bearer A2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"records": []})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/records/"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(10)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "A2"})))
        .expect(1)
        .mount(&server)
        .await;

    let (client, store) = client_with(
        &server,
        &[("access-token", "bad\ntoken"), ("refresh-token", "R1")],
        Duration::from_secs(5),
    );

    assert!(get_records(&client).await.is_ok());
    assert_eq!(store.get("access-token").unwrap().as_deref(), Some("A2"));
}

#[tokio::test]
async fn test_unsendable_renewed_token_ends_session() {
    let server = MockServer::start().await;
    mount_records(&server).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "A2\nx"})))
        .expect(1)
        .mount(&server)
        .await;

    let (client, store) = logged_in(&server);
    let mut events = client.session().subscribe();

    assert!(get_records(&client).await.unwrap_err().is_auth_failure());
    assert!(store.is_empty());
    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::Ended(EndReason::RefreshUnavailable)]
    );
}
