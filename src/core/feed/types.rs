use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One block of entry content as provided by the source. Atom entries carry
/// a typed content element; RSS descriptions arrive untyped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentPart {
    pub media_type: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParsedEntry {
    /// Source-provided unique id, if any. The stored entry identifier is a
    /// hash of this, falling back to the link.
    pub source_id: Option<String>,
    pub link: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub content_parts: Vec<ContentPart>,
    pub summary: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

/// A structured feed document with entries in source order. Feeds
/// conventionally list entries newest first; the deduplicator relies on
/// that ordering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub entries: Vec<ParsedEntry>,
}
