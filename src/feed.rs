// Atom feed parsing for hub notification bodies.
//
// The hub POSTs an Atom document per change:
//
//   <feed xmlns:yt=... xmlns="http://www.w3.org/2005/Atom">
//     <entry>
//       <yt:videoId>..</yt:videoId> <yt:channelId>..</yt:channelId>
//       <title>..</title> <link rel="alternate" href=".."/>
//       <author><name>..</name><uri>..</uri></author>
//       <published>..</published> <updated>..</updated>
//     </entry>
//   </feed>
//
// or, when a video is removed, a feed holding an <at:deleted-entry>.
// Tag names are matched case-insensitively with their prefix, and only the
// first occurrence of each field inside an entry is kept.

use std::sync::LazyLock;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex_lite::Regex;
use tracing::debug;

/// What an inbound POST body turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundBody {
    /// A feed document (possibly with no entries).
    Feed(Feed),
    /// The feed announces a deleted entry.
    Deleted,
    /// No body, or a body that isn't XML by content type.
    Empty,
    /// XML content type, but the document didn't parse as a feed.
    Malformed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Feed {
    pub entries: Vec<FeedEntry>,
}

/// Raw fields of one `<entry>`. Everything is optional here; the handler
/// decides which fields are required.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedEntry {
    pub video_id: Option<String>,
    pub channel_id: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub author_name: Option<String>,
    pub author_uri: Option<String>,
    pub published: Option<String>,
    pub updated: Option<String>,
}

/// `text/xml`, `application/xml` or `application/{vendor}+xml`.
static XML_CONTENT_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:text/xml|application/(?:[\w!#$%&*`\-.^~]+\+)?xml)$")
        .expect("Invalid regex pattern for XML content type")
});

/// Whether a Content-Type header names an XML body
/// (`text/xml`, `application/xml`, `application/atom+xml`, ...).
pub fn is_xml_content_type(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or("").trim();
    XML_CONTENT_TYPE.is_match(mime)
}

/// Classify a raw POST body.
///
/// Bodies that are empty, whitespace-only, or not declared as XML are
/// `Empty`; XML that fails to parse is `Malformed`. This never fails.
pub fn parse_body(content_type: Option<&str>, raw: &[u8]) -> InboundBody {
    let is_xml = content_type.is_some_and(is_xml_content_type);
    if !is_xml || raw.iter().all(u8::is_ascii_whitespace) {
        return InboundBody::Empty;
    }

    match parse_feed(raw) {
        Ok(body) => body,
        Err(e) => {
            debug!(error = %e, "Unparseable notification body");
            InboundBody::Malformed
        }
    }
}

/// Parse an Atom document into a feed or deletion marker.
pub fn parse_feed(raw: &[u8]) -> anyhow::Result<InboundBody> {
    let text = std::str::from_utf8(raw)?;
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut text_buf = String::new();
    let mut entries = Vec::new();
    let mut current: Option<FeedEntry> = None;
    let mut saw_feed = false;
    let mut deleted = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = tag_name(&e);
                open_element(&name, &e, &path, &mut current, &mut deleted)?;
                if path.is_empty() {
                    saw_feed = name == "feed";
                }
                path.push(name);
                text_buf.clear();
            }
            Event::Empty(e) => {
                let name = tag_name(&e);
                open_element(&name, &e, &path, &mut current, &mut deleted)?;
                if path.is_empty() {
                    saw_feed = name == "feed";
                }
            }
            Event::Text(t) => text_buf.push_str(&t.unescape()?),
            Event::CData(c) => text_buf.push_str(std::str::from_utf8(&c)?),
            Event::End(_) => {
                if let Some(entry) = current.as_mut() {
                    assign_field(entry, &path, text_buf.trim());
                }
                text_buf.clear();

                if path.len() == 2 && path[1] == "entry" {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
                path.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !path.is_empty() {
        anyhow::bail!("Unexpected end of document inside <{}>", path.join("/"));
    }
    if !saw_feed {
        anyhow::bail!("Document root is not <feed>");
    }
    if deleted {
        return Ok(InboundBody::Deleted);
    }
    Ok(InboundBody::Feed(Feed { entries }))
}

// --- Private helpers ---

fn tag_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase()
}

fn open_element(
    name: &str,
    e: &BytesStart<'_>,
    parent: &[String],
    current: &mut Option<FeedEntry>,
    deleted: &mut bool,
) -> anyhow::Result<()> {
    let under_feed = parent.len() == 1 && parent[0] == "feed";
    if under_feed && name == "at:deleted-entry" {
        *deleted = true;
    }
    if under_feed && name == "entry" {
        *current = Some(FeedEntry::default());
    }

    let in_entry = parent.len() == 2 && parent[1] == "entry";
    if in_entry && name == "link" {
        if let Some(entry) = current.as_mut() {
            if entry.link.is_none() {
                entry.link = attribute(e, "href")?;
            }
        }
    }
    Ok(())
}

fn attribute(e: &BytesStart<'_>, key: &str) -> anyhow::Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref().eq_ignore_ascii_case(key.as_bytes()) {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn assign_field(entry: &mut FeedEntry, path: &[String], text: &str) {
    let segments: Vec<&str> = path.iter().map(String::as_str).collect();
    let slot = match segments.as_slice() {
        ["feed", "entry", "yt:videoid"] => &mut entry.video_id,
        ["feed", "entry", "yt:channelid"] => &mut entry.channel_id,
        ["feed", "entry", "title"] => &mut entry.title,
        ["feed", "entry", "published"] => &mut entry.published,
        ["feed", "entry", "updated"] => &mut entry.updated,
        ["feed", "entry", "author", "name"] => &mut entry.author_name,
        ["feed", "entry", "author", "uri"] => &mut entry.author_uri,
        _ => return,
    };
    if slot.is_none() {
        *slot = Some(text.to_string());
    }
}
