// Listener: Axum endpoint the hub verifies and pushes to.
//
// The configured path and everything below it accept every method and hand
// the request to the NotificationHandler. Bodies are classified by feed::parse_body
// before the handler sees them, keeping the raw bytes for signature checks.
//
// `Subscriber` ties the pieces together: configuration, the handler with its
// dedup state, the hub client for outbound requests, and the event stream
// handed back to the caller at construction.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::SubscriberConfig;
use crate::events::{self, EventStream};
use crate::feed;
use crate::handler::{InboundRequest, NotificationHandler, RequestMethod};
use crate::subscription::{Channels, HubClient, HubTransport};

/// A configured subscriber: listener, hub client and event source.
pub struct Subscriber {
    config: Arc<SubscriberConfig>,
    handler: Arc<NotificationHandler>,
    hub: HubClient,
    started: AtomicBool,
}

impl Subscriber {
    /// Build a subscriber that talks to the hub over reqwest.
    ///
    /// The returned stream yields every event the listener produces.
    pub fn new(config: SubscriberConfig) -> Result<(Self, EventStream)> {
        let config = Arc::new(config);
        let hub = HubClient::new(config.clone())?;
        Ok(Self::assemble(config, hub))
    }

    /// Build a subscriber with a custom hub transport.
    pub fn with_transport(
        config: SubscriberConfig,
        transport: Arc<dyn HubTransport>,
    ) -> (Self, EventStream) {
        let config = Arc::new(config);
        let hub = HubClient::with_transport(config.clone(), transport);
        Self::assemble(config, hub)
    }

    fn assemble(config: Arc<SubscriberConfig>, hub: HubClient) -> (Self, EventStream) {
        let (emitter, stream) = events::channel();
        let handler = Arc::new(NotificationHandler::new(config.clone(), emitter));
        let subscriber = Self {
            config,
            handler,
            hub,
            started: AtomicBool::new(false),
        };
        (subscriber, stream)
    }

    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    pub fn handler(&self) -> &Arc<NotificationHandler> {
        &self.handler
    }

    pub fn hub(&self) -> &HubClient {
        &self.hub
    }

    /// Ask the hub to push the given channel(s). Returns once the requests
    /// are queued; the hub's answer arrives later as a `subscribe` event.
    pub fn subscribe(&self, channels: impl Into<Channels>) -> Result<()> {
        self.hub.subscribe(channels)
    }

    /// Ask the hub to stop pushing the given channel(s).
    pub fn unsubscribe(&self, channels: impl Into<Channels>) -> Result<()> {
        self.hub.unsubscribe(channels)
    }

    /// Router serving the hub endpoint, for mounting into an existing app.
    pub fn router(&self) -> Router {
        build_router(&self.config.path, self.handler.clone())
    }

    /// Bind the configured address and serve until the process exits.
    pub async fn serve(&self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn serve_with_shutdown<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.mark_started()?;
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        self.run(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    pub async fn serve_on<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.mark_started()?;
        self.run(listener, shutdown).await
    }

    fn mark_started(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            anyhow::bail!("The server has already been set up.");
        }
        Ok(())
    }

    async fn run<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local = listener.local_addr()?;
        info!(
            "Listening for hub callbacks on http://{local}{}",
            mount_path(&self.config.path)
        );

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

/// Normalise a configured path: one leading `/`, no trailing `/`, and `/`
/// when empty.
fn mount_path(path: &str) -> String {
    format!("/{}", path.trim().trim_matches('/'))
}

/// Serve the hub endpoint on `path` and on every sub-path below it.
fn build_router(path: &str, handler: Arc<NotificationHandler>) -> Router {
    let base = mount_path(path);
    let below = if base == "/" {
        "/{*rest}".to_string()
    } else {
        format!("{base}/{{*rest}}")
    };

    Router::new()
        .route(&base, any(hub_endpoint))
        .route(&below, any(hub_endpoint))
        .layer(TraceLayer::new_for_http())
        .with_state(handler)
}

/// Every hub request, whatever the method.
async fn hub_endpoint(
    State(handler): State<Arc<NotificationHandler>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let parsed = feed::parse_body(content_type, &body);

    let request = InboundRequest {
        method: RequestMethod::parse(method.as_str()),
        query: uri.query().map(str::to_string),
        headers: headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect(),
        body: parsed,
        raw_body: body.to_vec(),
    };

    // The emitter only queues, so the response never waits on the consumer.
    let reply = handler.respond(&request);
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(header::CONTENT_TYPE, reply.content_type)], reply.body).into_response()
}
