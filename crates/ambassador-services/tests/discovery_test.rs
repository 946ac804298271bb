use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use ambassador_common::error::AmbassadorError;
use ambassador_common::{KeyValueStore, MemoryStore};
use ambassador_services::ServiceClient;

/// Serves canned HTTP responses on a fresh local port, one per connection.
async fn serve(responses: usize, status: &str, body: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    tokio::spawn(async move {
        for _ in 0..responses {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let response = response.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 8192];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}

/// A local address with nothing listening on it.
async fn dead_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

fn client(store: Arc<MemoryStore>) -> ServiceClient {
    ServiceClient::new(store, "/services").with_attempt_timeout(Duration::from_secs(2))
}

#[tokio::test]
async fn unpublished_service_fails_with_no_hosts() {
    let store = Arc::new(MemoryStore::new());
    let client = client(store);

    let user = client.service("user");
    let err = client.execute(user.get(json!({}))).await.unwrap_err();
    assert!(matches!(err, AmbassadorError::NoHostsAvailable(path) if path == "/services/user"));
}

#[tokio::test]
async fn published_service_answers() {
    let store = Arc::new(MemoryStore::new());
    let addr = serve(1, "200 OK", r#"{"status":"ok"}"#).await;
    store
        .set("/services/user/hostA", &addr, Some(Duration::from_secs(30)))
        .await
        .unwrap();

    let client = client(store);
    let user = client.service("user");
    let value = client.execute(user.get(json!({}))).await.unwrap();
    assert_eq!(value, json!({"status": "ok"}));
}

#[tokio::test(start_paused = true)]
async fn expired_entry_means_no_hosts_again() {
    let store = Arc::new(MemoryStore::new());
    store
        .set("/services/user/hostA", "10.0.0.5:8080", Some(Duration::from_secs(30)))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(31)).await;

    let client = client(store);
    let user = client.service("user");
    let err = client.execute(user.get(json!({}))).await.unwrap_err();
    assert!(matches!(err, AmbassadorError::NoHostsAvailable(_)));
}

#[tokio::test]
async fn all_hosts_failing_exhausts_the_pool() {
    let store = Arc::new(MemoryStore::new());
    for host in ["hostA", "hostB", "hostC"] {
        let addr = dead_addr().await;
        store
            .set(&format!("/services/user/{}", host), &addr, None)
            .await
            .unwrap();
    }

    let client = client(store);
    let user = client.service("user");
    let err = client.execute(user.get(json!({}))).await.unwrap_err();
    assert!(matches!(err, AmbassadorError::HostsUnreachable(path) if path == "/services/user"));
}

#[tokio::test]
async fn non_2xx_short_circuits_without_failover() {
    let store = Arc::new(MemoryStore::new());
    // One host answers 404, the other refuses connections. Whatever order
    // the shuffle picks, the definitive 404 must be the final outcome.
    let not_found = serve(1, "404 Not Found", "no such user").await;
    let refused = dead_addr().await;
    store.set("/services/user/hostA", &not_found, None).await.unwrap();
    store.set("/services/user/hostB", &refused, None).await.unwrap();

    let client = client(store);
    let user = client.service("user");
    let err = client.execute(user.find("12345", json!({}))).await.unwrap_err();
    match err {
        AmbassadorError::Http { status, body } => {
            assert_eq!(status, 404);
            assert_eq!(body, "no such user");
        }
        other => panic!("expected HttpError, got {:?}", other),
    }
}

#[tokio::test]
async fn failover_reaches_the_live_host() {
    let store = Arc::new(MemoryStore::new());
    let live = serve(1, "200 OK", r#"{"answered":true}"#).await;
    store.set("/services/user/hostA", &dead_addr().await, None).await.unwrap();
    store.set("/services/user/hostB", &live, None).await.unwrap();
    store.set("/services/user/hostC", &dead_addr().await, None).await.unwrap();

    let client = client(store);
    let user = client.service("user");
    let value = client.execute(user.get(json!({}))).await.unwrap();
    assert_eq!(value, json!({"answered": true}));
}

#[tokio::test]
async fn nested_keys_are_not_call_targets() {
    let store = Arc::new(MemoryStore::new());
    let live = serve(1, "200 OK", r#"{"ok":true}"#).await;
    store.set("/services/user/hostA", &live, None).await.unwrap();
    // A nested sub-service entry must not leak into the parent's pool; if
    // it did, the shuffle could pick the dead host and fail this call.
    store
        .set("/services/user/admin/hostZ", &dead_addr().await, None)
        .await
        .unwrap();

    let client = client(store);
    let user = client.service("user");
    let value = client.execute(user.get(json!({}))).await.unwrap();
    assert_eq!(value, json!({"ok": true}));
}

#[tokio::test]
async fn response_is_memoized_per_transport() {
    let store = Arc::new(MemoryStore::new());
    // The server answers exactly once; a second network round trip would hang.
    let addr = serve(1, "200 OK", r#"{"n":1}"#).await;
    store.set("/services/user/hostA", &addr, None).await.unwrap();

    let client = client(store);
    let user = client.service("user");
    let transport = client.transport(user.get(json!({})));

    let first = transport.response().await.unwrap();
    let second = transport.response().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first, json!({"n": 1}));
}

#[tokio::test]
async fn get_attrs_travel_as_query_string() {
    let store = Arc::new(MemoryStore::new());

    // Capture the request line to assert on the query string.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (line_tx, line_rx) = tokio::sync::oneshot::channel::<String>();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 8192];
        let n = stream.read(&mut buf).await.unwrap();
        let head = String::from_utf8_lossy(&buf[..n]).to_string();
        let _ = line_tx.send(head.lines().next().unwrap_or_default().to_string());
        let _ = stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\nnull")
            .await;
        let _ = stream.shutdown().await;
    });

    store.set("/services/user/hostA", &addr, None).await.unwrap();
    let client = client(store);
    let user = client.service("user");
    let value = client
        .execute(user.find("12345", json!({"page": 2})))
        .await
        .unwrap();
    assert_eq!(value, Value::Null);

    let request_line = line_rx.await.unwrap();
    assert!(request_line.starts_with("GET /12345?page=2 "), "{}", request_line);
}

#[tokio::test]
async fn pool_is_materialized_once_per_transport() {
    let store = Arc::new(MemoryStore::new());
    let client = client(store.clone());
    let user = client.service("user");
    let transport = client.transport(user.get(json!({})));

    let err = transport.response().await.unwrap_err();
    assert!(matches!(err, AmbassadorError::NoHostsAvailable(_)));

    // An entry published after the first dispatch must stay invisible to
    // this transport; only a fresh call sees it.
    let late = serve(1, "200 OK", r#"{"late":true}"#).await;
    store.set("/services/user/hostA", &late, None).await.unwrap();

    let err = transport.response().await.unwrap_err();
    assert!(matches!(err, AmbassadorError::NoHostsAvailable(_)));

    let value = client.execute(user.get(json!({}))).await.unwrap();
    assert_eq!(value, json!({"late": true}));
}

#[tokio::test]
async fn exhausted_pool_stays_exhausted() {
    let store = Arc::new(MemoryStore::new());
    store.set("/services/user/hostA", &dead_addr().await, None).await.unwrap();

    let client = client(store.clone());
    let user = client.service("user");
    let transport = client.transport(user.get(json!({})));

    let err = transport.response().await.unwrap_err();
    assert!(matches!(err, AmbassadorError::HostsUnreachable(_)));

    // The dead host is spent; a retry on the same transport must not
    // re-resolve it (or anything published since) into a second pool.
    store.set("/services/user/hostB", &dead_addr().await, None).await.unwrap();
    let err = transport.response().await.unwrap_err();
    assert!(matches!(err, AmbassadorError::HostsUnreachable(_)));
}
