//! Tolerant RSS/Atom entry extraction.
//!
//! Real feeds are frequently invalid XML (unescaped ampersands, stray HTML,
//! truncated documents), so this is a pattern extractor over entry blocks
//! rather than a strict XML parser. Each entry is handled independently; a
//! block that yields nothing usable is counted and skipped.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;

use crate::storage::Item;
use crate::util::{decode_entities, html_to_text, strip_cdata, truncate_chars};

/// Descriptions are cut to this many characters before storage.
pub const MAX_DESCRIPTION_CHARS: usize = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Content is not an RSS or Atom feed")]
    NotAFeed,
}

/// Parsed entries plus the number of entry blocks that were discarded.
#[derive(Debug, Default)]
pub struct ParseResult {
    pub items: Vec<Item>,
    pub skipped: usize,
}

static RSS_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<item(?:\s[^>]*)?>(.*?)</item\s*>").expect("static regex")
});

static ATOM_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<entry(?:\s[^>]*)?>(.*?)</entry\s*>").expect("static regex")
});

static LINK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<link\s[^>]*>").expect("static regex"));

static HREF_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\bhref\s*=\s*["']([^"']*)["']"#).expect("static regex")
});

static REL_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\brel\s*=\s*["']([^"']*)["']"#).expect("static regex")
});

/// Element names searched inside an entry block.
const TAGS: &[&str] = &[
    "title",
    "link",
    "guid",
    "id",
    "description",
    "summary",
    "content",
    "encoded",
    "pubDate",
    "published",
    "updated",
    "date",
];

/// Per tag: the unprefixed pattern and the namespaced (`prefix:name`) one.
/// Self-closing forms never match.
static TAG_PATTERNS: LazyLock<HashMap<&'static str, (Regex, Regex)>> = LazyLock::new(|| {
    TAGS.iter()
        .map(|&name| {
            let plain = format!(r"(?is)<{name}(?:\s|\s[^>]*[^/>])?>(.*?)</{name}\s*>");
            let prefixed =
                format!(r"(?is)<[\w.-]+:{name}(?:\s|\s[^>]*[^/>])?>(.*?)</[\w.-]+:{name}\s*>");
            (
                name,
                (
                    Regex::new(&plain).expect("static regex"),
                    Regex::new(&prefixed).expect("static regex"),
                ),
            )
        })
        .collect()
});

/// Cheap check that `text` is some flavour of RSS/Atom/RDF document.
pub fn looks_like_feed(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    ["<rss", "<feed", "<channel", "<rdf:rdf"]
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Extracts up to `max_items` entries in document order (feeds list newest
/// first, so the result is most-recent-first).
///
/// RSS `<item>` blocks are used when present, otherwise Atom `<entry>`.
pub fn parse_feed(text: &str, max_items: usize) -> Result<ParseResult, ParseError> {
    if !looks_like_feed(text) {
        return Err(ParseError::NotAFeed);
    }

    let mut blocks: Vec<&str> = RSS_ITEM
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    if blocks.is_empty() {
        blocks = ATOM_ENTRY
            .captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
    }

    let mut result = ParseResult::default();
    for block in blocks.into_iter().take(max_items) {
        match parse_entry(block) {
            Some(item) => result.items.push(item),
            None => result.skipped += 1,
        }
    }

    Ok(result)
}

fn parse_entry(block: &str) -> Option<Item> {
    let title = tag_text(block, "title").map(|t| html_to_text(&t));
    let explicit_guid = tag_raw(block, "guid")
        .or_else(|| tag_raw(block, "id"))
        .map(|g| clean_value(&g))
        .filter(|g| !g.is_empty());
    let link = tag_raw(block, "link")
        .map(|l| clean_value(&l))
        .filter(|l| !l.is_empty())
        .or_else(|| atom_link(block))
        .or_else(|| explicit_guid.clone());

    let title = title.filter(|t| !t.is_empty());
    if title.is_none() && link.is_none() {
        return None;
    }

    let description = ["description", "summary", "content"]
        .iter()
        .find_map(|name| tag_text(block, name))
        .or_else(|| tag_prefixed(block, "encoded"))
        .map(|d| html_to_text(&unescape_markup(&d)))
        .map(|d| truncate_chars(&d, MAX_DESCRIPTION_CHARS).into_owned())
        .unwrap_or_default();

    let published_at = ["pubDate", "published", "updated"]
        .iter()
        .filter_map(|name| tag_raw(block, name))
        .chain(tag_prefixed(block, "date"))
        .find_map(|raw| parse_date(&clean_value(&raw)));

    Some(Item::new(
        title.unwrap_or_else(|| "Untitled".to_string()),
        link.unwrap_or_default(),
        description,
        published_at,
        explicit_guid,
    ))
}

/// Content of the first unprefixed `<name>` element.
fn tag_raw(block: &str, name: &str) -> Option<String> {
    let (plain, _) = TAG_PATTERNS.get(name)?;
    plain
        .captures(block)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_owned())
}

/// Content of the first `<prefix:name>` element.
fn tag_prefixed(block: &str, name: &str) -> Option<String> {
    let (_, prefixed) = TAG_PATTERNS.get(name)?;
    prefixed
        .captures(block)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_owned())
}

/// Like [`tag_raw`], falling back to a namespaced element, ignoring empty content.
fn tag_text(block: &str, name: &str) -> Option<String> {
    tag_raw(block, name)
        .filter(|s| !s.trim().is_empty())
        .or_else(|| tag_prefixed(block, name))
        .filter(|s| !strip_cdata(s).trim().is_empty())
}

/// Entity-escaped HTML (`&lt;p&gt;...`) is unescaped once so its tags can be stripped.
fn unescape_markup(raw: &str) -> String {
    let unwrapped = strip_cdata(raw);
    if !unwrapped.contains('<') && unwrapped.contains("&lt;") {
        decode_entities(&unwrapped).into_owned()
    } else {
        unwrapped.into_owned()
    }
}

fn clean_value(raw: &str) -> String {
    decode_entities(strip_cdata(raw).trim()).trim().to_owned()
}

/// Atom `<link href="..."/>`, preferring `rel="alternate"` (or no rel).
fn atom_link(block: &str) -> Option<String> {
    let links: Vec<(Option<String>, String)> = LINK_TAG
        .find_iter(block)
        .filter_map(|tag| {
            let tag = tag.as_str();
            let href = HREF_ATTR.captures(tag)?.get(1)?.as_str();
            let rel = REL_ATTR
                .captures(tag)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_ascii_lowercase());
            Some((rel, clean_value(href)))
        })
        .filter(|(_, href)| !href.is_empty())
        .collect();

    links
        .iter()
        .find(|(rel, _)| rel.as_deref().is_none_or(|r| r == "alternate"))
        .or_else(|| links.first())
        .map(|(_, href)| href.clone())
}

/// Parses the date formats seen in feeds. Unparsable input yields `None`.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    // Offset-less timestamps are taken as UTC
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
