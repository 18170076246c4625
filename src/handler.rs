// Notification protocol handler: everything the hub sends us lands here.
//
// GET  → verification handshake: echo hub.challenge, then report the
//        (un)subscription to the application.
// POST → content delivery: check the signature, skip deletions and
//        duplicate deliveries, then report the upload.
// Anything else → 403.
//
// Every request produces exactly one response. Hostile or broken input is
// answered with a status code, never an error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::SubscriberConfig;
use crate::dedup::DedupTracker;
use crate::events::{
    ChannelInfo, Event, EventEmitter, HubMode, LeaseSeconds, Notification, VerificationEvent,
    VideoInfo,
};
use crate::feed::{FeedEntry, InboundBody};
use crate::signature::{self, SignatureCheck};
use crate::topic::channel_from_topic;

/// Header carrying `{algorithm}={hex digest}` on signed deliveries.
pub const SIGNATURE_HEADER: &str = "x-hub-signature";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Post,
    Other(String),
}

impl RequestMethod {
    pub fn parse(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "POST" => Self::Post,
            other => Self::Other(other.to_string()),
        }
    }
}

/// An inbound request, already split into the parts the protocol needs.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: RequestMethod,
    /// Raw query string without the leading `?`.
    pub query: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: InboundBody,
    /// The body exactly as received; signatures are checked against this.
    pub raw_body: Vec<u8>,
}

impl InboundRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The response to send back to the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl HandlerResponse {
    fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.into(),
        }
    }

    /// Bare status with its reason phrase as body.
    fn status(status: u16) -> Self {
        let reason = match status {
            200 => "OK",
            400 => "Bad Request",
            403 => "Forbidden",
            _ => "",
        };
        Self::text(status, reason)
    }

    fn bad_request() -> Self {
        Self::text(400, "Bad Request")
    }
}

/// Response plus the event (if any) the request produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub response: HandlerResponse,
    pub event: Option<Event>,
}

impl Outcome {
    fn respond(response: HandlerResponse) -> Self {
        Self {
            response,
            event: None,
        }
    }

    fn with_event(response: HandlerResponse, event: Event) -> Self {
        Self {
            response,
            event: Some(event),
        }
    }
}

/// Owns the dedup state and the event emitter for one subscriber.
pub struct NotificationHandler {
    config: Arc<SubscriberConfig>,
    dedup: DedupTracker,
    emitter: EventEmitter,
}

impl NotificationHandler {
    pub fn new(config: Arc<SubscriberConfig>, emitter: EventEmitter) -> Self {
        Self {
            config,
            dedup: DedupTracker::new(),
            emitter,
        }
    }

    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    pub fn dedup(&self) -> &DedupTracker {
        &self.dedup
    }

    /// Handle a request and emit its event. Returns the response to send.
    pub fn respond(&self, request: &InboundRequest) -> HandlerResponse {
        let Outcome { response, event } = self.handle(request);
        if let Some(event) = event {
            self.emitter.emit(event);
        }
        response
    }

    /// Run the protocol for one request without emitting anything.
    pub fn handle(&self, request: &InboundRequest) -> Outcome {
        match &request.method {
            RequestMethod::Get => self.on_verification(request),
            RequestMethod::Post => self.on_notification(request),
            RequestMethod::Other(method) => {
                debug!(method = %method, "Rejecting unsupported method");
                Outcome::respond(HandlerResponse::status(403))
            }
        }
    }

    fn on_verification(&self, request: &InboundRequest) -> Outcome {
        let query = request.query.as_deref().unwrap_or("");
        let topic = query_param(query, "hub.topic");
        let mode = query_param(query, "hub.mode");

        let (Some(topic), Some(mode)) = (topic, mode) else {
            debug!("Verification request without hub.topic or hub.mode");
            return Outcome::respond(HandlerResponse::bad_request());
        };

        let challenge = query_param(query, "hub.challenge").unwrap_or_default();
        let response = HandlerResponse::text(200, challenge);

        let hub_mode = HubMode::parse(&mode);
        let lease_seconds =
            query_param(query, "hub.lease_seconds").map(|raw| LeaseSeconds::parse(&raw));
        let reason = match hub_mode {
            HubMode::Denied => query_param(query, "hub.reason"),
            _ => None,
        };

        let channel = channel_from_topic(&topic).to_string();
        if let HubMode::Other(_) = hub_mode {
            debug!(mode = %mode, "Verification with a non-standard hub.mode");
        }
        info!(mode = hub_mode.as_str(), channel = %channel, ?lease_seconds, "Hub verified subscription");

        let event = Event::verification(VerificationEvent {
            mode: hub_mode,
            channel,
            lease_seconds,
            reason,
        });
        Outcome::with_event(response, event)
    }

    fn on_notification(&self, request: &InboundRequest) -> Outcome {
        let signature_header = request.header(SIGNATURE_HEADER).filter(|v| !v.is_empty());
        if self.config.secret.is_some() && signature_header.is_none() {
            warn!("Unsigned notification rejected");
            return Outcome::respond(HandlerResponse::status(403));
        }

        let feed = match &request.body {
            InboundBody::Deleted => {
                debug!("Deleted entry notification ignored");
                return Outcome::respond(HandlerResponse::status(200));
            }
            InboundBody::Feed(feed) if !feed.entries.is_empty() => feed,
            _ => return Outcome::respond(HandlerResponse::bad_request()),
        };

        // Hubs may batch several entries; only the first is reported.
        let entry = &feed.entries[0];
        if feed.entries.len() > 1 {
            debug!(
                count = feed.entries.len(),
                "Notification carried several entries, using the first"
            );
        }

        if let (Some(secret), Some(header)) = (&self.config.secret, signature_header) {
            let parsed = signature::parse_signature_header(header);
            match signature::check(secret, &parsed.algorithm, &parsed.digest, &request.raw_body) {
                SignatureCheck::Valid => {}
                SignatureCheck::UnsupportedAlgorithm => {
                    warn!(algorithm = %parsed.algorithm, "Unsupported signature algorithm");
                    return Outcome::respond(HandlerResponse::status(403));
                }
                SignatureCheck::Invalid => {
                    // Acknowledge so the hub doesn't redeliver, but drop it.
                    warn!("Notification signature mismatch, dropping payload");
                    return Outcome::respond(HandlerResponse::status(200));
                }
            }
        }

        let notification = match notification_from_entry(entry) {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "Notification entry missing required fields");
                return Outcome::respond(HandlerResponse::bad_request());
            }
        };

        if self.dedup.should_suppress(
            &notification.video.id,
            notification.published,
            notification.updated,
        ) {
            debug!(video = %notification.video.id, "Duplicate delivery suppressed");
            return Outcome::respond(HandlerResponse::status(200));
        }

        info!(
            video = %notification.video.id,
            channel = %notification.channel.id,
            title = %notification.video.title,
            "New upload notification"
        );
        Outcome::with_event(
            HandlerResponse::status(200),
            Event::Notified(notification),
        )
    }
}

/// Turn a parsed entry into a notification, requiring every field.
pub fn notification_from_entry(entry: &FeedEntry) -> anyhow::Result<Notification> {
    fn required<'a>(value: &'a Option<String>, name: &str) -> anyhow::Result<&'a str> {
        value
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("entry has no {name}"))
    }

    let published = parse_timestamp(required(&entry.published, "published")?)?;
    let updated = parse_timestamp(required(&entry.updated, "updated")?)?;

    Ok(Notification {
        video: VideoInfo {
            id: required(&entry.video_id, "yt:videoId")?.to_string(),
            title: required(&entry.title, "title")?.to_string(),
            link: required(&entry.link, "link")?.to_string(),
        },
        channel: ChannelInfo {
            id: required(&entry.channel_id, "yt:channelId")?.to_string(),
            name: required(&entry.author_name, "author name")?.to_string(),
            link: required(&entry.author_uri, "author uri")?.to_string(),
        },
        published,
        updated,
    })
}

fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| anyhow::anyhow!("invalid timestamp {raw:?}: {e}"))?;
    Ok(parsed.with_timezone(&Utc))
}

/// First non-empty value of a query parameter.
fn query_param(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}
