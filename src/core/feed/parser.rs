use encoding_rs::Encoding;
use feed_rs::model::{Entry, Feed};

use super::types::{ContentPart, ParsedEntry, ParsedFeed};

#[derive(Debug, thiserror::Error)]
pub enum FeedParseError {
    #[error("feed payload is empty")]
    EmptyPayload,
    #[error("malformed feed: {0}")]
    Malformed(String),
}

impl From<feed_rs::parser::ParseFeedError> for FeedParseError {
    fn from(error: feed_rs::parser::ParseFeedError) -> Self {
        FeedParseError::Malformed(error.to_string())
    }
}

/// Parse raw feed bytes into a [`ParsedFeed`].
///
/// The body is decoded with the transport-declared charset first, and any
/// embedded XML encoding declaration is stripped so a conflicting
/// declaration cannot override the transport encoding. A malformed document
/// is reported as [`FeedParseError::Malformed`] and the caller discards the
/// scan rather than ingesting partial results.
pub fn parse(body: &[u8], declared_charset: Option<&str>) -> Result<ParsedFeed, FeedParseError> {
    let text = decode_body(body, declared_charset);
    let text = strip_xml_declaration(&text);
    if text.trim().is_empty() {
        return Err(FeedParseError::EmptyPayload);
    }
    let feed = feed_rs::parser::parse(text.as_bytes())?;
    Ok(from_feed(feed))
}

/// Decode with the charset named by the transport, defaulting to UTF-8.
/// Unknown charset labels also fall back to UTF-8.
fn decode_body(body: &[u8], declared_charset: Option<&str>) -> String {
    let encoding = declared_charset
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(encoding_rs::UTF_8);
    let (decoded, _, _) = encoding.decode(body);
    decoded.into_owned()
}

/// Drop a leading `<?xml ... encoding="..." ...?>` declaration. Declarations
/// without an encoding attribute are left alone.
pub fn strip_xml_declaration(text: &str) -> &str {
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    if !trimmed.starts_with("<?xml") {
        return text;
    }
    let Some(end) = trimmed.find("?>") else {
        return text;
    };
    let declaration = &trimmed[..end + 2];
    if declaration.contains("encoding=") {
        &trimmed[end + 2..]
    } else {
        text
    }
}

fn from_feed(feed: Feed) -> ParsedFeed {
    ParsedFeed {
        title: feed.title.map(|text| text.content),
        description: feed.description.map(|text| text.content),
        entries: feed.entries.into_iter().map(from_entry).collect(),
    }
}

fn from_entry(entry: Entry) -> ParsedEntry {
    // feed-rs synthesizes an id from the link or title when the source
    // omits one, so the link fallback downstream is a last resort
    let source_id = if entry.id.trim().is_empty() {
        None
    } else {
        Some(entry.id)
    };
    let link = entry
        .links
        .first()
        .map(|link| link.href.clone())
        .unwrap_or_default();
    let author = entry
        .authors
        .first()
        .map(|person| person.name.clone())
        .filter(|name| !name.trim().is_empty());
    let content_parts = entry
        .content
        .into_iter()
        .map(|content| ContentPart {
            media_type: Some(media_essence(&content.content_type.to_string())),
            value: content.body.unwrap_or_default(),
        })
        .collect();

    ParsedEntry {
        source_id,
        link,
        title: entry.title.map(|text| text.content),
        author,
        content_parts,
        summary: entry.summary.map(|text| text.content),
        published: entry.published,
        updated: entry.updated,
    }
}

fn media_essence(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or(media_type)
        .trim()
        .to_string()
}
