// Topic URLs: the resource a hub subscription watches.
//
// YouTube exposes one Atom feed per channel. Subscribing means asking the
// hub to watch that feed URL; verification requests echo it back in
// `hub.topic`, so we strip the prefix again to recover the channel id.

/// Feed URL prefix; the channel id is appended verbatim.
pub const TOPIC_PREFIX: &str = "https://www.youtube.com/xml/feeds/videos.xml?channel_id=";

/// Build the topic URL for a channel.
pub fn topic_for_channel(channel_id: &str) -> String {
    format!("{TOPIC_PREFIX}{channel_id}")
}

/// Recover the channel id from a topic URL.
///
/// Topics that don't carry the YouTube prefix are returned unchanged, so a
/// hub that verifies some other topic still produces a usable event.
pub fn channel_from_topic(topic: &str) -> &str {
    topic.strip_prefix(TOPIC_PREFIX).unwrap_or(topic)
}
