//! Feed ingestion: HTTP retrieval, tolerant entry extraction and the
//! de-duplication memory.
//!
//! - `fetcher`: bounded HTTP retrieval of feed documents
//! - `parser`: pattern-based RSS/Atom entry extraction
//! - `dedup`: "new item" detection against a source's recent items
//!
//! # Example
//!
//! ```
//! use feedpush::feed::{find_new, parse_feed};
//!
//! let xml = r#"<rss><channel>
//!   <item><title>Hello</title><link>https://ex.com/a</link><guid>a1</guid></item>
//! </channel></rss>"#;
//!
//! let parsed = parse_feed(xml, 20).unwrap();
//! let new_items = find_new(&parsed.items, &[]);
//! assert_eq!(new_items[0].guid, "a1");
//! assert!(find_new(&parsed.items, &new_items).is_empty());
//! ```

mod dedup;
mod fetcher;
mod parser;

pub use dedup::{find_new, next_recent_items, MAX_NEW_ITEMS};
pub use fetcher::{FeedFetcher, FetchError};
pub(crate) use fetcher::read_limited_bytes;
pub use parser::{looks_like_feed, parse_date, parse_feed, ParseError, ParseResult};
