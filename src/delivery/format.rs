use chrono_tz::Tz;
use std::borrow::Cow;

use crate::storage::Item;
use crate::util::{is_well_formed_url, truncate_chars, truncate_with_ellipsis, MAX_URL_LENGTH};

/// Telegram's limit on message text, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Description excerpt length in a message, before escaping.
pub const MAX_SUMMARY_CHARS: usize = 200;

/// Title length in a message, before escaping.
pub const MAX_TITLE_CHARS: usize = 256;

/// Source name length in the message header, before escaping.
const MAX_SOURCE_NAME_CHARS: usize = 100;

/// Characters with meaning in MarkdownV2 that must be backslash-escaped in text.
const MARKDOWN_SPECIAL: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
    '\\',
];

/// Escapes `s` for use as MarkdownV2 text.
///
/// ```
/// use feedpush::delivery::escape_markdown;
///
/// assert_eq!(escape_markdown("v1.2 (beta)!"), r"v1\.2 \(beta\)\!");
/// ```
pub fn escape_markdown(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + s.len() / 4);
    for c in s.chars() {
        if MARKDOWN_SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Inside `(...)` of an inline link only `)` and `\` need escaping.
fn escape_link_target(url: &str) -> String {
    let mut out = String::with_capacity(url.len());
    for c in url.chars() {
        if c == ')' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Renders one new item as a MarkdownV2 message.
///
/// Layout: source header, bold title, description excerpt, link to the
/// original, optional link to the republished copy, then the publish date
/// in `tz`. The result never exceeds [`MAX_MESSAGE_CHARS`].
///
/// Source name, title and excerpt are capped before escaping so the bold
/// entities stay closed and the link lines survive. The excerpt is dropped
/// if the link lines alone leave no room for it.
pub fn format_message(
    item: &Item,
    source_name: &str,
    enrichment_url: Option<&str>,
    tz: Tz,
) -> String {
    let head = format!(
        "📰 *{}*\n\n*{}*",
        escape_markdown(&truncate_with_ellipsis(source_name, MAX_SOURCE_NAME_CHARS)),
        escape_markdown(&truncate_with_ellipsis(&item.title, MAX_TITLE_CHARS))
    );

    let summary = item.description.trim();
    let summary = if summary.is_empty() {
        String::new()
    } else {
        format!(
            "\n\n{}",
            escape_markdown(&truncate_with_ellipsis(summary, MAX_SUMMARY_CHARS))
        )
    };

    let mut tail = String::new();
    if !item.link.is_empty() {
        tail.push_str("\n\n🔗 ");
        if item.link.len() <= MAX_URL_LENGTH && is_well_formed_url(&item.link) {
            tail.push_str(&format!("[Read original]({})", escape_link_target(&item.link)));
        } else {
            tail.push_str(&escape_markdown(&truncate_with_ellipsis(
                &item.link,
                MAX_SUMMARY_CHARS,
            )));
        }
    }

    if let Some(url) = enrichment_url.filter(|u| is_well_formed_url(u)) {
        tail.push_str(&format!("\n📖 [Read on Telegraph]({})", escape_link_target(url)));
    }

    if let Some(published) = item.published_at {
        let local = published.with_timezone(&tz);
        tail.push_str("\n\n🕒 ");
        tail.push_str(&escape_markdown(
            &local.format("%Y-%m-%d %H:%M %Z").to_string(),
        ));
    }

    let len = |s: &str| s.chars().count();
    let text = if len(&head) + len(&summary) + len(&tail) <= MAX_MESSAGE_CHARS {
        format!("{head}{summary}{tail}")
    } else {
        format!("{head}{tail}")
    };

    cap_message(&text).into_owned()
}

/// Hard-truncates to [`MAX_MESSAGE_CHARS`] without leaving a dangling escape.
pub fn cap_message(text: &str) -> Cow<'_, str> {
    match truncate_chars(text, MAX_MESSAGE_CHARS) {
        Cow::Borrowed(b) => Cow::Borrowed(b),
        Cow::Owned(mut cut) => {
            let trailing = cut.chars().rev().take_while(|&c| c == '\\').count();
            if trailing % 2 == 1 {
                cut.pop();
            }
            Cow::Owned(cut)
        }
    }
}
