use std::collections::BTreeMap;

use ctxkeep_state::{ItemId, MemoryItem};

/// Item ids that a restore from `snapshot` would add, remove and modify
/// relative to `live`.
///
/// An item counts as modified when anything but its derived score and tier
/// differs.
pub fn diff_memory(
    live: &[MemoryItem],
    snapshot: &[MemoryItem],
) -> (Vec<ItemId>, Vec<ItemId>, Vec<ItemId>) {
    let live: BTreeMap<&ItemId, &MemoryItem> = live.iter().map(|i| (&i.id, i)).collect();
    let saved: BTreeMap<&ItemId, &MemoryItem> = snapshot.iter().map(|i| (&i.id, i)).collect();

    let mut added = Vec::new();
    let mut modified = Vec::new();
    for (id, saved_item) in &saved {
        match live.get(id) {
            None => added.push((*id).clone()),
            Some(live_item) if !same_content(live_item, saved_item) => {
                modified.push((*id).clone())
            }
            Some(_) => {}
        }
    }
    let removed = live
        .keys()
        .filter(|id| !saved.contains_key(*id))
        .map(|id| (*id).clone())
        .collect();

    (added, removed, modified)
}

fn same_content(a: &MemoryItem, b: &MemoryItem) -> bool {
    a.agent_id == b.agent_id
        && a.kind == b.kind
        && a.content == b.content
        && a.created_at == b.created_at
        && a.last_accessed_at == b.last_accessed_at
        && a.access_count == b.access_count
}
