//! Tier assignment from importance scores.

use chrono::{DateTime, Utc};
use ctxkeep_state::{MemoryItem, ScoreUpdate, Tier};

use crate::scoring;

pub const HOT_THRESHOLD: f64 = 0.8;
pub const WARM_THRESHOLD: f64 = 0.4;

/// HOT at or above 0.8, WARM at or above 0.4, COLD below (and for NaN).
pub fn tier_for(score: f64) -> Tier {
    if score >= HOT_THRESHOLD {
        Tier::Hot
    } else if score >= WARM_THRESHOLD {
        Tier::Warm
    } else {
        Tier::Cold
    }
}

/// Tier implied by an item's stored score, ignoring its cached `tier` field.
pub fn stored_tier(item: &MemoryItem) -> Tier {
    tier_for(item.importance_score)
}

/// Recompute one item's score and tier at `now`.
pub fn assess(item: &MemoryItem, now: DateTime<Utc>) -> ScoreUpdate {
    let importance_score = scoring::score(item, now);
    ScoreUpdate {
        item_id: item.id.clone(),
        importance_score,
        tier: tier_for(importance_score),
    }
}

/// Rescore `items` in place and return the batch to persist.
pub fn rescore_all(items: &mut [MemoryItem], now: DateTime<Utc>) -> Vec<ScoreUpdate> {
    items
        .iter_mut()
        .map(|item| {
            let update = assess(item, now);
            item.importance_score = update.importance_score;
            item.tier = update.tier;
            update
        })
        .collect()
}

/// Counts of items per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierCounts {
    pub hot: usize,
    pub warm: usize,
    pub cold: usize,
}

impl TierCounts {
    pub fn tally<'a>(items: impl IntoIterator<Item = &'a MemoryItem>) -> Self {
        let mut counts = TierCounts::default();
        for item in items {
            match stored_tier(item) {
                Tier::Hot => counts.hot += 1,
                Tier::Warm => counts.warm += 1,
                Tier::Cold => counts.cold += 1,
            }
        }
        counts
    }
}
