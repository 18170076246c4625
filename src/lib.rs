// yt-pubsub: WebSub subscriber for YouTube channel feeds
//
// This is the library root. The protocol core (handler, signature, dedup,
// subscription) has no HTTP server dependency; the Axum listener lives in
// `server` behind the default `server` feature.

pub mod config;
pub mod dedup;
pub mod events;
pub mod feed;
pub mod handler;
pub mod signature;
pub mod subscription;
pub mod topic;

#[cfg(feature = "server")]
pub mod server;

pub use config::SubscriberConfig;
pub use events::{Event, EventStream};
pub use subscription::{Channels, HubClient, Operation};

#[cfg(feature = "server")]
pub use server::Subscriber;
