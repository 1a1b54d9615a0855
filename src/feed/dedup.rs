//! Per-source "already sent" memory.
//!
//! An item is considered seen when its `guid`, its `content_hash` or its exact
//! `(title, link)` pair matches a remembered item. The memory is the bounded
//! `recent_items` list on each source; nothing else is kept.

use crate::storage::Item;

/// Upper bound on the number of new items reported for one source per run.
pub const MAX_NEW_ITEMS: usize = 10;

fn same_item(a: &Item, b: &Item) -> bool {
    a.guid == b.guid
        || a.content_hash == b.content_hash
        || (a.title == b.title && a.link == b.link)
}

/// Returns the candidates not matching any previously seen item.
///
/// Order is preserved (most-recent-first) and at most [`MAX_NEW_ITEMS`] are
/// returned. A candidate that duplicates an earlier candidate in the same
/// batch is dropped, so only the first occurrence is delivered.
pub fn find_new(candidates: &[Item], previously_seen: &[Item]) -> Vec<Item> {
    let mut new_items: Vec<Item> = Vec::new();

    for candidate in candidates {
        if new_items.len() >= MAX_NEW_ITEMS {
            break;
        }
        let seen = previously_seen.iter().any(|p| same_item(candidate, p))
            || new_items.iter().any(|n| same_item(candidate, n));
        if !seen {
            new_items.push(candidate.clone());
        }
    }

    new_items
}

/// Computes the next `recent_items` memory.
///
/// `window` is the newest slice of the parsed feed (the same slice that was
/// checked with [`find_new`]); `withheld` are new items whose delivery failed
/// transiently and must be offered again next run. Previously remembered
/// items that are not in the window are kept after it so that an item which
/// briefly drops out of the feed is not re-sent when it reappears.
///
/// An empty window (the feed currently lists nothing) keeps the old memory.
pub fn next_recent_items(
    window: &[Item],
    previous: &[Item],
    withheld: &[Item],
    cap: usize,
) -> Vec<Item> {
    if window.is_empty() {
        return previous.iter().take(cap).cloned().collect();
    }

    let mut next: Vec<Item> = Vec::with_capacity(cap);
    let fresh = window
        .iter()
        .filter(|item| !withheld.iter().any(|w| same_item(item, w)));
    let carried = previous
        .iter()
        .filter(|prev| !window.iter().any(|item| same_item(item, prev)));

    for item in fresh.chain(carried) {
        if next.len() >= cap {
            break;
        }
        if !next.iter().any(|n| same_item(item, n)) {
            next.push(item.clone());
        }
    }

    next
}
