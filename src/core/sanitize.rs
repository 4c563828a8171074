use std::collections::{HashMap, HashSet};

use ammonia::Builder;

use crate::core::feed::types::ParsedEntry;

/// Length cap applied to feed titles and entry titles/authors.
pub const MAX_TEXT_LEN: usize = 255;

const CONTENT_TAGS: &[&str] = &["a", "p", "img", "strong", "em"];

/// Remove all markup, keeping text content. Used for titles and authors.
pub fn strip_markup(text: &str) -> String {
    Builder::new()
        .tags(HashSet::new())
        .clean(text)
        .to_string()
}

/// Clean entry content down to the storage whitelist: `a p img strong em`,
/// `class` on anything, `href`/`rel` on anchors, `src`/`alt` on images.
pub fn clean_content(html: &str) -> String {
    let mut tag_attributes: HashMap<&str, HashSet<&str>> = HashMap::new();
    tag_attributes.insert("a", ["href", "rel"].into_iter().collect());
    tag_attributes.insert("img", ["src", "alt"].into_iter().collect());

    Builder::new()
        .tags(CONTENT_TAGS.iter().copied().collect())
        .generic_attributes(["class"].into_iter().collect())
        .tag_attributes(tag_attributes)
        .link_rel(None)
        .clean(html)
        .to_string()
}

/// Truncate to `max_len` characters (not bytes), appending `...` when the
/// input is at or over the cap.
pub fn shorten(text: &str, max_len: usize) -> String {
    shorten_with(text, max_len, "...")
}

pub fn shorten_with(text: &str, max_len: usize, ellipsis: &str) -> String {
    if text.chars().count() < max_len {
        return text.to_string();
    }
    let keep = max_len.saturating_sub(ellipsis.chars().count());
    let mut shortened: String = text.chars().take(keep).collect();
    shortened.push_str(ellipsis);
    shortened
}

/// Assemble and sanitize an entry's content.
///
/// Structured content parts whose declared type is text, html, xhtml, or
/// absent are concatenated in source order. With no content parts at all,
/// the summary is used, or the literal `No summary.` when that is missing
/// too.
pub fn entry_content(entry: &ParsedEntry) -> String {
    if entry.content_parts.is_empty() {
        let summary = entry.summary.as_deref().unwrap_or("No summary.");
        return clean_content(summary);
    }

    let mut combined = String::new();
    for part in &entry.content_parts {
        if is_text_part(part.media_type.as_deref()) {
            combined.push_str(&part.value);
        }
    }
    clean_content(&combined)
}

fn is_text_part(media_type: Option<&str>) -> bool {
    match media_type {
        None => true,
        Some(declared) => matches!(
            declared,
            "text" | "html" | "xhtml" | "text/plain" | "text/html" | "application/xhtml+xml"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::feed::types::ContentPart;

    fn entry_with(parts: Vec<ContentPart>, summary: Option<&str>) -> ParsedEntry {
        ParsedEntry {
            source_id: Some("id".to_string()),
            link: "https://example.com/post".to_string(),
            title: None,
            author: None,
            content_parts: parts,
            summary: summary.map(str::to_string),
            published: None,
            updated: None,
        }
    }

    fn html_part(value: &str) -> ContentPart {
        ContentPart {
            media_type: Some("text/html".to_string()),
            value: value.to_string(),
        }
    }

    #[test]
    fn shorten_matches_reference_cases() {
        assert_eq!(shorten("1234567890", 10), "1234567...");
        assert_eq!(shorten("1234567890", 20), "1234567890");
    }

    #[test]
    fn shorten_counts_characters_not_bytes() {
        let input = "éééééééééé"; // 10 chars, 20 bytes
        assert_eq!(shorten(input, 10), "ééééééé...");
        assert_eq!(shorten(input, 11), input);
    }

    #[test]
    fn strip_markup_keeps_only_text() {
        assert_eq!(
            strip_markup("<b>Bold</b> title <script>evil()</script>"),
            "Bold title "
        );
    }

    #[test]
    fn clean_content_enforces_whitelist() {
        let html = r#"<p class="lead">Hi <a href="https://example.com" onclick="x()">link</a>
            <img src="/pic.png" alt="pic" width="10"><script>evil()</script></p>"#;
        let cleaned = clean_content(html);

        assert!(cleaned.contains(r#"<p class="lead">"#));
        assert!(cleaned.contains(r#"href="https://example.com""#));
        assert!(cleaned.contains(r#"alt="pic""#));
        assert!(!cleaned.contains("onclick"));
        assert!(!cleaned.contains("width"));
        assert!(!cleaned.contains("script"));
        assert!(!cleaned.contains("evil"));
    }

    #[test]
    fn content_parts_concatenate_in_source_order() {
        let entry = entry_with(vec![html_part("A"), html_part("B")], None);
        let content = entry_content(&entry);
        let a = content.find('A').expect("A should survive");
        let b = content.find('B').expect("B should survive");
        assert!(a < b);
    }

    #[test]
    fn unsupported_part_types_are_skipped() {
        let parts = vec![
            html_part("keep"),
            ContentPart {
                media_type: Some("application/octet-stream".to_string()),
                value: "drop".to_string(),
            },
        ];
        let content = entry_content(&entry_with(parts, None));
        assert!(content.contains("keep"));
        assert!(!content.contains("drop"));
    }

    #[test]
    fn summary_fallback_and_no_summary_literal() {
        let with_summary = entry_with(Vec::new(), Some("just a summary"));
        assert_eq!(entry_content(&with_summary), "just a summary");

        let bare = entry_with(Vec::new(), None);
        assert_eq!(entry_content(&bare), "No summary.");
    }
}
