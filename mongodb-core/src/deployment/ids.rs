use std::collections::BTreeMap;

/// Assign member ids to the desired process names.
///
/// Names already present in `existing` keep their id. New names receive `max(existing) + 1`,
/// incrementing in the order they appear in `desired`, so adding members never renumbers the
/// members which are already running.
pub fn allocate_ids(desired: &[String], existing: &BTreeMap<String, u32>) -> BTreeMap<String, u32> {
    let mut next = existing.values().max().map(|max| max + 1).unwrap_or(0);
    let mut ids = BTreeMap::new();
    for name in desired {
        if ids.contains_key(name) {
            continue;
        }
        let id = match existing.get(name) {
            Some(id) => *id,
            None => {
                let id = next;
                next += 1;
                id
            }
        };
        ids.insert(name.clone(), id);
    }
    ids
}
