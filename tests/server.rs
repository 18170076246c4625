// Listener and hub client tests over real HTTP types.
//
// The router is driven in-process with tower's `oneshot`; the outbound path
// uses a recording transport or a throwaway Axum "hub" on a loopback port.

#![cfg(feature = "server")]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use tokio::sync::mpsc;
use tower::ServiceExt;

use yt_pubsub::events::{Event, EventStream};
use yt_pubsub::signature;
use yt_pubsub::subscription::{
    HubClient, HubTransport, Operation, ReqwestTransport, SubscriptionRequest,
};
use yt_pubsub::topic::TOPIC_PREFIX;
use yt_pubsub::{Subscriber, SubscriberConfig};

const SECRET: &str = "hub-secret";

const NOTIFICATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns:yt="http://www.youtube.com/xml/schemas/2015" xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <yt:videoId>abc123</yt:videoId>
    <yt:channelId>UCchan</yt:channelId>
    <title>Launch day</title>
    <link rel="alternate" href="https://www.youtube.com/watch?v=abc123"/>
    <author>
      <name>Chan</name>
      <uri>https://www.youtube.com/channel/UCchan</uri>
    </author>
    <published>2024-05-01T12:00:00+00:00</published>
    <updated>2024-05-01T12:02:00+00:00</updated>
  </entry>
</feed>"#;

/// Transport that records requests instead of sending them.
struct RecordingTransport {
    sent: Mutex<Vec<SubscriptionRequest>>,
    notify: mpsc::UnboundedSender<()>,
    fail: bool,
}

#[async_trait]
impl HubTransport for RecordingTransport {
    async fn post_form(&self, request: &SubscriptionRequest) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(request.clone());
        let _ = self.notify.send(());
        if self.fail {
            anyhow::bail!("connection refused");
        }
        Ok(())
    }
}

fn recording(fail: bool) -> (Arc<RecordingTransport>, mpsc::UnboundedReceiver<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let transport = Arc::new(RecordingTransport {
        sent: Mutex::new(Vec::new()),
        notify: tx,
        fail,
    });
    (transport, rx)
}

fn subscriber(secret: Option<&str>, path: &str) -> (Subscriber, EventStream) {
    let mut config = SubscriberConfig::new("https://example.com/hook")
        .unwrap()
        .with_path(path);
    if let Some(secret) = secret {
        config = config.with_secret(secret);
    }
    let (transport, _rx) = recording(false);
    Subscriber::with_transport(config, transport)
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn notification_request(path: &str, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/atom+xml");
    if let Some(signature) = signature {
        builder = builder.header("X-Hub-Signature", signature);
    }
    builder.body(Body::from(NOTIFICATION)).unwrap()
}

// ============================================================
// Verification
// ============================================================

#[tokio::test]
async fn verification_echoes_challenge() {
    let (subscriber, mut events) = subscriber(None, "/");
    let uri = format!(
        "/?hub.mode=subscribe&hub.topic={}UCchan&hub.challenge=XYZ&hub.lease_seconds=432000",
        TOPIC_PREFIX.replace('?', "%3F").replace('=', "%3D")
    );
    let response = subscriber
        .router()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/plain"
    );
    assert_eq!(body_string(response).await, "XYZ");

    let Some(Event::Subscribe(payload)) = events.recv().await else {
        panic!("expected subscribe event");
    };
    assert_eq!(payload.channel, "UCchan");
    assert_eq!(payload.lease_seconds.and_then(|l| l.as_secs()), Some(432_000));
}

#[tokio::test]
async fn verification_without_topic_is_bad_request() {
    let (subscriber, mut events) = subscriber(None, "/");
    let response = subscriber
        .router()
        .oneshot(
            Request::builder()
                .uri("/?hub.mode=subscribe&hub.challenge=XYZ")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_string(response).await, "Bad Request");
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn custom_path_is_served() {
    let (subscriber, _events) = subscriber(None, "youtube");
    let router = subscriber.router();

    let hit = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/youtube?hub.mode=subscribe&hub.topic=t&hub.challenge=ok")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(hit.status(), StatusCode::OK);

    for outside in ["/", "/youtubes", "/other/youtube"] {
        let miss = router
            .clone()
            .oneshot(Request::builder().uri(outside).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(miss.status(), StatusCode::NOT_FOUND, "{outside}");
    }
}

#[tokio::test]
async fn sub_paths_below_the_mount_are_served() {
    let (subscriber, mut events) = subscriber(None, "/youtube/");
    let router = subscriber.router();

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/youtube/feeds/UCchan?hub.mode=unsubscribe&hub.topic=t&hub.challenge=ok")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ok");
    assert!(matches!(events.recv().await, Some(Event::Unsubscribe(_))));

    let response = router
        .oneshot(notification_request("/youtube/push", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(matches!(events.recv().await, Some(Event::Notified(_))));
}

#[tokio::test]
async fn other_methods_are_forbidden() {
    let (subscriber, _events) = subscriber(None, "/");
    let response = subscriber
        .router()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

// ============================================================
// Notifications
// ============================================================

#[tokio::test]
async fn signed_notification_emits_event() {
    let (subscriber, mut events) = subscriber(Some(SECRET), "/");
    let digest = signature::sign(SECRET, "sha1", NOTIFICATION.as_bytes()).unwrap();

    let response = subscriber
        .router()
        .oneshot(notification_request("/", Some(format!("sha1={digest}"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let Some(Event::Notified(n)) = events.recv().await else {
        panic!("expected notified event");
    };
    assert_eq!(n.video.id, "abc123");
    assert_eq!(n.video.title, "Launch day");
    assert_eq!(n.channel.name, "Chan");
}

#[tokio::test]
async fn unsigned_notification_forbidden_when_secret_set() {
    let (subscriber, mut events) = subscriber(Some(SECRET), "/");
    let response = subscriber
        .router()
        .oneshot(notification_request("/", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn bad_signature_acknowledged_without_event() {
    let (subscriber, mut events) = subscriber(Some(SECRET), "/");
    let response = subscriber
        .router()
        .oneshot(notification_request("/", Some("sha1=deadbeef".to_string())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn redelivery_suppressed_across_requests() {
    let (subscriber, mut events) = subscriber(None, "/");
    let router = subscriber.router();

    for _ in 0..2 {
        let response = router
            .clone()
            .oneshot(notification_request("/", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert!(matches!(events.try_recv(), Some(Event::Notified(_))));
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn non_xml_body_is_bad_request() {
    let (subscriber, _events) = subscriber(None, "/");
    let response = subscriber
        .router()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"feed": {}}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================
// Outbound subscription requests
// ============================================================

#[tokio::test]
async fn subscribe_dispatches_one_request_per_channel() {
    let config = SubscriberConfig::new("https://example.com/hook")
        .unwrap()
        .with_secret(SECRET);
    let (transport, mut sent) = recording(false);
    let (subscriber, _events) = Subscriber::with_transport(config, transport.clone());

    subscriber.subscribe(vec!["UC1", "UC2"]).unwrap();
    for _ in 0..2 {
        tokio::time::timeout(Duration::from_secs(5), sent.recv())
            .await
            .unwrap();
    }

    let mut channels: Vec<String> = transport
        .sent
        .lock()
        .unwrap()
        .iter()
        .map(|r| {
            assert_eq!(r.operation, Operation::Subscribe);
            assert_eq!(r.field("hub.secret"), Some(SECRET));
            r.channel_id.clone()
        })
        .collect();
    channels.sort();
    assert_eq!(channels, vec!["UC1", "UC2"]);
}

#[tokio::test]
async fn invalid_channels_rejected_before_sending() {
    let config = SubscriberConfig::new("https://example.com/hook").unwrap();
    let (transport, _sent) = recording(false);
    let (subscriber, _events) = Subscriber::with_transport(config, transport.clone());

    assert!(subscriber.subscribe("").is_err());
    assert!(subscriber.subscribe(vec!["UC1", ""]).is_err());
    // An empty list is valid and sends nothing.
    subscriber.unsubscribe(Vec::<String>::new()).unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(transport.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn transport_errors_are_not_surfaced() {
    let config = SubscriberConfig::new("https://example.com/hook").unwrap();
    let (transport, mut sent) = recording(true);
    let (subscriber, _events) = Subscriber::with_transport(config, transport.clone());

    // The call succeeds even though every send fails, and nothing retries.
    subscriber.unsubscribe("UC1").unwrap();
    tokio::time::timeout(Duration::from_secs(5), sent.recv())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn reqwest_transport_posts_form_to_hub() {
    use axum::routing::post;

    let (tx, mut rx) = mpsc::unbounded_channel::<(Option<String>, String)>();
    let hub = axum::Router::new().route(
        "/hub",
        post(move |headers: axum::http::HeaderMap, body: String| {
            let tx = tx.clone();
            async move {
                let content_type = headers
                    .get("content-type")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let _ = tx.send((content_type, body));
                StatusCode::ACCEPTED
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, hub).await.unwrap();
    });

    let config = SubscriberConfig::new("https://example.com/hook")
        .unwrap()
        .with_hub_url(format!("http://{addr}/hub"));
    let config = Arc::new(config);
    let client = HubClient::with_transport(config.clone(), Arc::new(ReqwestTransport::new().unwrap()));

    let request =
        yt_pubsub::subscription::build("UCchan", Operation::Unsubscribe, &config).unwrap();
    client.send(&request).await.unwrap();

    let (content_type, body) = rx.recv().await.unwrap();
    assert_eq!(
        content_type.as_deref(),
        Some("application/x-www-form-urlencoded")
    );
    let fields: Vec<(String, String)> = url::form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect();
    assert!(fields.contains(&("hub.mode".to_string(), "unsubscribe".to_string())));
    assert!(fields.contains(&(
        "hub.topic".to_string(),
        format!("{TOPIC_PREFIX}UCchan")
    )));
    assert!(fields.contains(&(
        "hub.callback".to_string(),
        "https://example.com/hook".to_string()
    )));
}

#[tokio::test]
async fn reqwest_transport_reports_hub_rejection() {
    let hub = axum::Router::new().route(
        "/hub",
        axum::routing::post(|| async { (StatusCode::BAD_REQUEST, "Invalid topic") }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, hub).await.unwrap();
    });

    let config = SubscriberConfig::new("https://example.com/hook")
        .unwrap()
        .with_hub_url(format!("http://{addr}/hub"));
    let request =
        yt_pubsub::subscription::build("UCchan", Operation::Subscribe, &config).unwrap();
    let err = ReqwestTransport::new()
        .unwrap()
        .post_form(&request)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("400"));
}
