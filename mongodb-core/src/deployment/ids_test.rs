use std::collections::BTreeMap;

use proptest::prelude::*;

use crate::deployment::allocate_ids;

fn names(prefix: &str, count: usize) -> Vec<String> {
    (0..count).map(|idx| format!("{}-{}", prefix, idx)).collect()
}

#[test]
fn fresh_replica_set_is_numbered_from_zero() {
    let ids = allocate_ids(&names("rs", 3), &BTreeMap::new());
    assert_eq!(ids.get("rs-0"), Some(&0));
    assert_eq!(ids.get("rs-1"), Some(&1));
    assert_eq!(ids.get("rs-2"), Some(&2));
}

#[test]
fn new_members_continue_after_the_highest_existing_id() {
    // Multi-cluster layout: ids do not follow the process name suffixes.
    let existing: BTreeMap<String, u32> = vec![("a-0".to_string(), 0), ("b-0".to_string(), 1), ("c-0".to_string(), 4)].into_iter().collect();
    let desired = vec!["a-0".to_string(), "b-0".to_string(), "c-0".to_string(), "a-1".to_string(), "b-1".to_string()];

    let ids = allocate_ids(&desired, &existing);

    assert_eq!(ids.get("c-0"), Some(&4));
    assert_eq!(ids.get("a-1"), Some(&5));
    assert_eq!(ids.get("b-1"), Some(&6));
}

#[test]
fn removed_members_do_not_appear_in_the_result() {
    let existing = allocate_ids(&names("rs", 3), &BTreeMap::new());
    let ids = allocate_ids(&names("rs", 2), &existing);
    assert_eq!(ids.len(), 2);
    assert_eq!(ids.get("rs-2"), None);
}

proptest! {
    #[test]
    fn adding_one_name_changes_only_the_new_name(existing_count in 0usize..12, extra in "[a-z]{1,6}-x") {
        let current = names("rs", existing_count);
        let first = allocate_ids(&current, &BTreeMap::new());

        let mut desired = current.clone();
        desired.push(extra.clone());
        let second = allocate_ids(&desired, &first);

        for name in current.iter() {
            prop_assert_eq!(first.get(name), second.get(name));
        }
        let new_id = second.get(&extra).copied();
        prop_assert_eq!(new_id, Some(existing_count as u32));
        let unique: std::collections::BTreeSet<u32> = second.values().copied().collect();
        prop_assert_eq!(unique.len(), second.len());
    }
}
