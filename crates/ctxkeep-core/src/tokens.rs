//! Token accounting.

use ctxkeep_state::MemoryItem;

/// Approximate token cost of a string: one token per four bytes, rounded up.
pub fn token_cost(content: &str) -> u64 {
    (content.len() as u64).div_ceil(4)
}

pub fn total_tokens<'a>(items: impl IntoIterator<Item = &'a MemoryItem>) -> u64 {
    items.into_iter().map(|i| token_cost(&i.content)).sum()
}
