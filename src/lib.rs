//! Polls RSS/Atom feeds and pushes new entries to a Telegram chat,
//! optionally republishing each article as a Telegraph page.
//!
//! - [`feed`]: fetching, tolerant parsing and de-duplication
//! - [`delivery`]: MarkdownV2 message rendering and the Telegram client
//! - [`content`]: article extraction, sanitizing and Telegraph publishing
//! - [`pipeline`]: the check run and the watch loop
//! - [`manage`]: source and configuration management
//! - [`storage`]: SQLite-backed key/value records

pub mod config;
pub mod content;
pub mod delivery;
pub mod feed;
pub mod manage;
pub mod pipeline;
pub mod storage;
pub mod util;
