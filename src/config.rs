use std::env;

use anyhow::{Context, Result};

/// Hub used when none is configured.
pub const DEFAULT_HUB_URL: &str = "https://pubsubhubbub.appspot.com/";

/// Listening port used when none is configured.
pub const DEFAULT_PORT: u16 = 3000;

/// Subscriber configuration, fixed once the subscriber is built.
///
/// The callback URL is the only required value: the hub needs a public
/// address to verify and push to. Everything else has a default.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberConfig {
    /// Public URL of our listener, sent to the hub as `hub.callback`.
    pub callback_url: String,
    /// Hub endpoint subscription requests are POSTed to.
    pub hub_url: String,
    /// Shared secret for notification signatures. `None` disables signing.
    pub secret: Option<String>,
    /// Port the listener binds to.
    pub port: u16,
    /// Route the listener serves, e.g. `/` or `/youtube`. The router
    /// normalises it, so an empty path serves `/`.
    pub path: String,
    /// Address the listener binds to.
    pub bind: String,
}

impl SubscriberConfig {
    /// Start a configuration for the given callback URL.
    pub fn new(callback_url: impl Into<String>) -> Result<Self> {
        let callback_url = callback_url.into();
        if callback_url.trim().is_empty() {
            anyhow::bail!("You need to provide the callback URL.");
        }
        Ok(Self {
            callback_url,
            hub_url: DEFAULT_HUB_URL.to_string(),
            secret: None,
            port: DEFAULT_PORT,
            path: "/".to_string(),
            bind: "0.0.0.0".to_string(),
        })
    }

    pub fn with_hub_url(mut self, hub_url: impl Into<String>) -> Self {
        self.hub_url = hub_url.into();
        self
    }

    /// Set the signing secret. An empty string means no secret.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        self.secret = (!secret.is_empty()).then_some(secret);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the listener route. A missing leading `/` is added.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        self
    }

    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = bind.into();
        self
    }

    /// Load configuration from environment variables.
    ///
    /// YT_PUBSUB_CALLBACK_URL is required; YT_PUBSUB_HUB_URL, YT_PUBSUB_SECRET,
    /// YT_PUBSUB_PORT, YT_PUBSUB_PATH and YT_PUBSUB_BIND are optional.
    /// Call `dotenvy::dotenv()` first to pick up a .env file.
    pub fn load() -> Result<Self> {
        Self::load_with_callback(None)
    }

    /// Like `load`, but a non-empty `callback` takes precedence over
    /// YT_PUBSUB_CALLBACK_URL.
    pub fn load_with_callback(callback: Option<String>) -> Result<Self> {
        let callback_url = callback
            .filter(|c| !c.is_empty())
            .or_else(|| env::var("YT_PUBSUB_CALLBACK_URL").ok())
            .unwrap_or_default();
        if callback_url.is_empty() {
            anyhow::bail!(
                "YT_PUBSUB_CALLBACK_URL not set. Add it to your .env file \
                 or pass --callback."
            );
        }

        let mut config = Self::new(callback_url)?;
        if let Ok(hub_url) = env::var("YT_PUBSUB_HUB_URL") {
            if !hub_url.is_empty() {
                config = config.with_hub_url(hub_url);
            }
        }
        if let Ok(secret) = env::var("YT_PUBSUB_SECRET") {
            config = config.with_secret(secret);
        }
        if let Ok(port) = env::var("YT_PUBSUB_PORT") {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("YT_PUBSUB_PORT is not a valid port: {port}"))?;
            config = config.with_port(port);
        }
        if let Ok(path) = env::var("YT_PUBSUB_PATH") {
            if !path.is_empty() {
                config = config.with_path(path);
            }
        }
        if let Ok(bind) = env::var("YT_PUBSUB_BIND") {
            if !bind.is_empty() {
                config = config.with_bind(bind);
            }
        }
        Ok(config)
    }

    /// `bind:port`, ready for `TcpListener::bind`.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
