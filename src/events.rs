// Events handed to the embedding application.
//
// The handler never calls application code directly: every verified
// subscription change and every accepted upload notification becomes an
// `Event` value pushed onto an unbounded channel. Sending never blocks, so
// a slow consumer can't delay the HTTP response to the hub.

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use tokio::sync::mpsc;
use tracing::debug;

/// The `hub.mode` of a verification request.
///
/// Modes are matched exactly; anything else (including case variants such
/// as `Subscribe`) is kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubMode {
    Subscribe,
    Unsubscribe,
    /// The hub refused (or later revoked) a subscription.
    Denied,
    Other(String),
}

impl HubMode {
    pub fn parse(mode: &str) -> Self {
        match mode {
            "subscribe" => Self::Subscribe,
            "unsubscribe" => Self::Unsubscribe,
            "denied" => Self::Denied,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Denied => "denied",
            Self::Other(mode) => mode,
        }
    }
}

impl Serialize for HubMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// `hub.lease_seconds` as the hub sent it.
///
/// Numeric values are kept as numbers; anything else passes through as the
/// raw string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LeaseSeconds {
    Seconds(u64),
    Raw(String),
}

impl LeaseSeconds {
    pub fn parse(raw: &str) -> Self {
        raw.parse()
            .map(Self::Seconds)
            .unwrap_or_else(|_| Self::Raw(raw.to_string()))
    }

    /// The lease in seconds, when the hub sent a number.
    pub fn as_secs(&self) -> Option<u64> {
        match self {
            Self::Seconds(secs) => Some(*secs),
            Self::Raw(_) => None,
        }
    }
}

impl std::fmt::Display for LeaseSeconds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Seconds(secs) => write!(f, "{secs}s"),
            Self::Raw(raw) => f.write_str(raw),
        }
    }
}

/// Payload of a verification callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationEvent {
    #[serde(rename = "type")]
    pub mode: HubMode,
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_seconds: Option<LeaseSeconds>,
    /// Only sent with `denied`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    pub link: String,
}

/// Payload of a `notified` event: a new or updated upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub video: VideoInfo,
    pub channel: ChannelInfo,
    pub published: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// An application-facing event, keyed by name.
///
/// Serializes as `{"event": name, "data": payload}`.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Subscribe(VerificationEvent),
    Unsubscribe(VerificationEvent),
    Denied(VerificationEvent),
    /// A verified request whose `hub.mode` is none of the above. Named by
    /// the raw mode string.
    Verified(VerificationEvent),
    Notified(Notification),
}

impl Event {
    /// Wrap a verification payload in the variant its mode names.
    pub fn verification(payload: VerificationEvent) -> Self {
        match payload.mode {
            HubMode::Subscribe => Self::Subscribe(payload),
            HubMode::Unsubscribe => Self::Unsubscribe(payload),
            HubMode::Denied => Self::Denied(payload),
            HubMode::Other(_) => Self::Verified(payload),
        }
    }

    /// The event name: `notified`, or the `hub.mode` of a verification.
    pub fn name(&self) -> &str {
        match self {
            Self::Subscribe(v) | Self::Unsubscribe(v) | Self::Denied(v) | Self::Verified(v) => {
                v.mode.as_str()
            }
            Self::Notified(_) => "notified",
        }
    }
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Event", 2)?;
        state.serialize_field("event", self.name())?;
        match self {
            Self::Subscribe(v) | Self::Unsubscribe(v) | Self::Denied(v) | Self::Verified(v) => {
                state.serialize_field("data", v)?
            }
            Self::Notified(n) => state.serialize_field("data", n)?,
        }
        state.end()
    }
}

/// Sending half, held by the protocol handler.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventEmitter {
    /// Queue an event. If the application dropped its stream the event is
    /// discarded.
    pub fn emit(&self, event: Event) {
        let name = event.name().to_string();
        if self.tx.send(event).is_err() {
            debug!(event = %name, "Event stream closed, dropping event");
        }
    }
}

/// Receiving half, owned by the application.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    /// Wait for the next event. Returns `None` once every emitter is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Take an already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

/// Create a connected emitter/stream pair.
pub fn channel() -> (EventEmitter, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventEmitter { tx }, EventStream { rx })
}
