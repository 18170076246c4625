// Subscription requests: asking the hub to start or stop pushing a channel.
//
// Each request is a form-encoded POST to the hub:
//   hub.callback={our public URL}&hub.mode=subscribe|unsubscribe
//   &hub.topic={channel feed URL}[&hub.secret={secret}]
//
// The hub answers 202 and verifies asynchronously by calling our listener,
// so the POST itself carries no useful result. `HubClient::subscribe` and
// `unsubscribe` fire the requests in background tasks and drop the outcome;
// there is no retry.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::SubscriberConfig;
use crate::topic::topic_for_channel;

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Which way the subscription should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Subscribe,
    Unsubscribe,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// One channel id or a list of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channels {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for Channels {
    fn from(id: &str) -> Self {
        Self::One(id.to_string())
    }
}

impl From<String> for Channels {
    fn from(id: String) -> Self {
        Self::One(id)
    }
}

impl From<Vec<String>> for Channels {
    fn from(ids: Vec<String>) -> Self {
        Self::Many(ids)
    }
}

impl From<Vec<&str>> for Channels {
    fn from(ids: Vec<&str>) -> Self {
        Self::Many(ids.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Channels {
    fn from(ids: &[&str]) -> Self {
        Self::Many(ids.iter().map(|s| s.to_string()).collect())
    }
}

impl From<&[String]> for Channels {
    fn from(ids: &[String]) -> Self {
        Self::Many(ids.to_vec())
    }
}

/// A fully built hub request, ready for the HTTP client.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionRequest {
    pub channel_id: String,
    pub operation: Operation,
    /// Hub endpoint.
    pub url: String,
    /// Form fields in send order.
    pub form: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl SubscriptionRequest {
    /// The `application/x-www-form-urlencoded` body.
    pub fn form_body(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.form.iter())
            .finish()
    }

    /// Look up a form field by name.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Build the hub request for one channel.
pub fn build(
    channel_id: &str,
    operation: Operation,
    config: &SubscriberConfig,
) -> Result<SubscriptionRequest> {
    if channel_id.is_empty() {
        anyhow::bail!("You need to provide a channel id or an array of channel ids.");
    }

    let mut form = vec![
        ("hub.callback".to_string(), config.callback_url.clone()),
        ("hub.mode".to_string(), operation.as_str().to_string()),
        ("hub.topic".to_string(), topic_for_channel(channel_id)),
    ];
    if let Some(secret) = &config.secret {
        form.push(("hub.secret".to_string(), secret.clone()));
    }

    Ok(SubscriptionRequest {
        channel_id: channel_id.to_string(),
        operation,
        url: config.hub_url.clone(),
        form,
        headers: vec![("Content-Type".to_string(), FORM_CONTENT_TYPE.to_string())],
    })
}

/// Build one independent request per channel.
///
/// Every id is validated before anything is returned, so a bad entry means
/// no requests at all. An empty list builds nothing.
pub fn build_all(
    channels: impl Into<Channels>,
    operation: Operation,
    config: &SubscriberConfig,
) -> Result<Vec<SubscriptionRequest>> {
    match channels.into() {
        Channels::One(id) => Ok(vec![build(&id, operation, config)?]),
        Channels::Many(ids) => ids
            .iter()
            .map(|id| build(id, operation, config))
            .collect(),
    }
}

/// Sends a built request to the hub.
#[async_trait]
pub trait HubTransport: Send + Sync {
    async fn post_form(&self, request: &SubscriptionRequest) -> Result<()>;
}

/// `HubTransport` over reqwest.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("yt-pubsub/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HubTransport for ReqwestTransport {
    async fn post_form(&self, request: &SubscriptionRequest) -> Result<()> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .body(request.form_body())
            .send()
            .await
            .context("Hub request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Hub returned {}: {}", status, body);
        }
        Ok(())
    }
}

/// Issues subscription requests on behalf of a subscriber.
#[derive(Clone)]
pub struct HubClient {
    config: Arc<SubscriberConfig>,
    transport: Arc<dyn HubTransport>,
}

impl HubClient {
    /// Client using reqwest.
    pub fn new(config: Arc<SubscriberConfig>) -> Result<Self> {
        Ok(Self::with_transport(config, Arc::new(ReqwestTransport::new()?)))
    }

    pub fn with_transport(config: Arc<SubscriberConfig>, transport: Arc<dyn HubTransport>) -> Self {
        Self { config, transport }
    }

    /// Subscribe to one or more channels without waiting for the hub.
    pub fn subscribe(&self, channels: impl Into<Channels>) -> Result<()> {
        self.dispatch(channels.into(), Operation::Subscribe)
    }

    /// Unsubscribe from one or more channels without waiting for the hub.
    pub fn unsubscribe(&self, channels: impl Into<Channels>) -> Result<()> {
        self.dispatch(channels.into(), Operation::Unsubscribe)
    }

    /// Send one request and wait for the hub's acknowledgement.
    pub async fn send(&self, request: &SubscriptionRequest) -> Result<()> {
        self.transport.post_form(request).await
    }

    /// Build every request up front, then spawn one POST per channel.
    ///
    /// Argument errors are returned before anything is sent. Transport
    /// errors are dropped.
    fn dispatch(&self, channels: Channels, operation: Operation) -> Result<()> {
        let requests = build_all(channels, operation, &self.config)?;
        let runtime = tokio::runtime::Handle::try_current()
            .context("Subscription requests must be sent from within a Tokio runtime")?;

        for request in requests {
            info!(
                channel = %request.channel_id,
                mode = operation.as_str(),
                hub = %request.url,
                "Sending subscription request"
            );
            let transport = self.transport.clone();
            runtime.spawn(async move {
                // Fire and forget: the outcome is intentionally discarded.
                let outcome: Result<()> = transport.post_form(&request).await;
                if let Err(e) = outcome {
                    debug!(channel = %request.channel_id, error = %e, "Subscription request dropped");
                }
            });
        }
        Ok(())
    }
}
