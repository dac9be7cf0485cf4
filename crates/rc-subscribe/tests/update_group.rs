//! End-to-end subscription sync against a local HTTP stub.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use rc_proto::Registry;
use rc_storage::{EndpointFilter, Store};
use rc_subscribe::{Fetcher, FetcherConfig, Manager, SubsError};
use rc_types::{AuthConfig, Endpoint, Group};

/// Serve every request with the same canned response, counting hits.
async fn serve(status: &'static str, body: Vec<u8>, hits: Arc<AtomicUsize>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                break;
            };
            hits.fetch_add(1, Ordering::SeqCst);
            let body = body.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = sock.read(&mut buf).await;
                let head = format!(
                    "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = sock.write_all(head.as_bytes()).await;
                let _ = sock.write_all(&body).await;
                let _ = sock.shutdown().await;
            });
        }
    });
    format!("http://{addr}/feed")
}

fn feed_body() -> Vec<u8> {
    let vmess_json = serde_json::json!({
        "v": "2", "ps": "feed-vmess", "add": "vm.example", "port": "443",
        "id": "11111111-2222-3333-4444-555555555555", "net": "tcp"
    });
    let uris = format!(
        "vless://aaaa1111-bbbb-cccc-dddd-eeee22223333@vl.example:443?type=ws&security=tls&path=/ws#feed-vless\n\
         vmess://{}\n\
         trojan://secret@tj.example:443#feed-trojan\n",
        STANDARD.encode(vmess_json.to_string())
    );
    STANDARD.encode(uris).into_bytes()
}

fn feed_group(url: &str) -> Group {
    Group {
        id: 0,
        name: "feed".into(),
        description: String::new(),
        is_global: false,
        subscription_url: Some(url.to_string()),
        auto_update: true,
        update_interval: 3600,
        last_updated: None,
        next_update: None,
        user_agent: String::new(),
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    }
}

fn quick_fetcher() -> FetcherConfig {
    FetcherConfig {
        retry_delay: Duration::from_millis(10),
        ..Default::default()
    }
}

#[tokio::test]
async fn feed_ingest_preserves_user_added_entries() {
    let hits = Arc::new(AtomicUsize::new(0));
    let url = serve("200 OK", feed_body(), hits).await;

    let store = Arc::new(Store::open_in_memory().unwrap());
    let gid = store.create_group(&feed_group(&url)).unwrap();

    // A user-added entry in the same group must survive every sync.
    let mut manual = Endpoint::new(
        "trojan",
        "manual.example",
        8443,
        AuthConfig::Trojan {
            password: "mine".into(),
        },
    );
    manual.name = "hand-added".into();
    manual.group_id = gid;
    manual.notes = "added by hand".into();
    let manual_id = store.create_endpoint(&manual).unwrap();
    let manual_before = store.endpoint(manual_id).unwrap();

    let manager = Manager::with_fetcher_config(
        Arc::clone(&store),
        Arc::new(Registry::new()),
        quick_fetcher(),
    )
    .unwrap();

    let first = manager.update_group(gid).await.unwrap();
    assert_eq!(first.total_uris, 3);
    assert_eq!(first.added, 3);
    assert_eq!(first.failed, 0);
    assert_eq!(first.removed, 0);

    // Second run against the unchanged feed: the old slice is replaced.
    let second = manager.update_group(gid).await.unwrap();
    assert_eq!(second.total_uris, 3);
    assert_eq!(second.added, 3);
    assert_eq!(second.removed, 3);

    let feed_entries = store
        .endpoints(&EndpointFilter {
            group_id: Some(gid),
            from_subscription: Some(true),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(feed_entries.len(), 3);
    assert!(feed_entries.iter().all(|ep| ep.from_subscription && ep.enabled));

    let manual_after = store.endpoint(manual_id).unwrap();
    assert_eq!(manual_after.name, manual_before.name);
    assert_eq!(manual_after.auth, manual_before.auth);
    assert_eq!(manual_after.notes, manual_before.notes);
    assert!(!manual_after.from_subscription);

    // Group schedule advanced.
    let group = store.group(gid).unwrap();
    assert!(group.last_updated.is_some());
    assert!(group.next_update.unwrap() > chrono::Utc::now());
}

#[tokio::test]
async fn unparsable_uris_are_collected_not_fatal() {
    let body = STANDARD.encode(
        "trojan://ok@h.example:443#good\nhysteria2://pw@h.example:443#declared-only\n",
    );
    let hits = Arc::new(AtomicUsize::new(0));
    let url = serve("200 OK", body.into_bytes(), hits).await;

    let store = Arc::new(Store::open_in_memory().unwrap());
    let gid = store.create_group(&feed_group(&url)).unwrap();
    let manager = Manager::with_fetcher_config(
        Arc::clone(&store),
        Arc::new(Registry::new()),
        quick_fetcher(),
    )
    .unwrap();

    let result = manager.update_group(gid).await.unwrap();
    assert_eq!(result.total_uris, 2);
    assert_eq!(result.added, 1);
    assert_eq!(result.failed, 1);
    assert_eq!(result.errors.len(), 1);
}

#[tokio::test]
async fn http_404_is_not_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let url = serve("404 Not Found", b"gone".to_vec(), Arc::clone(&hits)).await;

    let fetcher = Fetcher::new(quick_fetcher()).unwrap();
    let err = fetcher.fetch(&url, None).await.unwrap_err();
    assert!(matches!(err, SubsError::Http { status: 404, .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn server_errors_are_retried_with_backoff() {
    let hits = Arc::new(AtomicUsize::new(0));
    let url = serve("500 Internal Server Error", Vec::new(), Arc::clone(&hits)).await;

    let fetcher = Fetcher::new(FetcherConfig {
        max_retries: 2,
        retry_delay: Duration::from_millis(10),
        ..Default::default()
    })
    .unwrap();
    let err = fetcher.fetch(&url, None).await.unwrap_err();
    assert!(matches!(err, SubsError::Fetch { attempts: 3, .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn group_without_url_fails() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let manager = Manager::new(Arc::clone(&store), Arc::new(Registry::new())).unwrap();
    // Group 1 is the seeded global group, which has no subscription.
    let err = manager.update_group(1).await.unwrap_err();
    assert!(matches!(err, SubsError::NoSubscriptionUrl(_)));
}
