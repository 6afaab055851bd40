//! Importance scoring.
//!
//! `score = 0.4 * type_weight + 0.4 * age_decay + 0.2 * access_boost`,
//! clamped to `[0, 1]`. Pure and infallible.

use chrono::{DateTime, Utc};
use ctxkeep_state::{ItemKind, MemoryItem};

pub const TYPE_WEIGHT_FACTOR: f64 = 0.4;
pub const AGE_DECAY_FACTOR: f64 = 0.4;
pub const ACCESS_BOOST_FACTOR: f64 = 0.2;

/// Age at which `age_decay` halves.
pub const HALF_LIFE_HOURS: f64 = 24.0;
pub const ACCESS_BOOST_STEP: f64 = 0.1;
pub const ACCESS_BOOST_CAP: f64 = 0.5;

/// Weight of an item kind. Unknown kinds get 0.5.
pub fn type_weight(kind: &ItemKind) -> f64 {
    match kind {
        ItemKind::Task => 1.0,
        ItemKind::Code => 0.9,
        ItemKind::Error => 0.8,
        ItemKind::SpecSection => 0.7,
        ItemKind::TestResult => 0.6,
        ItemKind::PrdSection => 0.5,
        ItemKind::Decision => 0.6,
        ItemKind::Other(_) => 0.5,
    }
}

/// `2^(-age_hours / 24)`. Items from the future (clock skew) count as brand new.
pub fn age_decay(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_ms = (now - created_at).num_milliseconds();
    if age_ms <= 0 {
        return 1.0;
    }
    let age_hours = age_ms as f64 / 3_600_000.0;
    2f64.powf(-age_hours / HALF_LIFE_HOURS).clamp(0.0, 1.0)
}

pub fn access_boost(access_count: u64) -> f64 {
    (ACCESS_BOOST_STEP * access_count as f64).min(ACCESS_BOOST_CAP)
}

pub fn score_parts(
    kind: &ItemKind,
    created_at: DateTime<Utc>,
    access_count: u64,
    now: DateTime<Utc>,
) -> f64 {
    let raw = TYPE_WEIGHT_FACTOR * type_weight(kind)
        + AGE_DECAY_FACTOR * age_decay(created_at, now)
        + ACCESS_BOOST_FACTOR * access_boost(access_count);
    raw.clamp(0.0, 1.0)
}

pub fn score(item: &MemoryItem, now: DateTime<Utc>) -> f64 {
    score_parts(&item.kind, item.created_at, item.access_count, now)
}
