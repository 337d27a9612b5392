use indexmap::IndexMap;

use super::model::Instance;

/// Concatenates `other` onto `instances`, duplicates are kept. O(n + m)
#[inline]
pub fn merge_append(mut instances: Vec<Instance>, other: Vec<Instance>) -> Vec<Instance> {
    instances.extend(other);
    instances
}

/// Merges by instance id, O(n + m).
///
/// `instances` are inserted first and `other` afterwards, so on the same id
/// the record from `other` wins. Every id is kept at the position it was
/// first seen at.
pub fn merge_by_id(instances: Vec<Instance>, other: Vec<Instance>) -> Vec<Instance> {
    let mut merged = IndexMap::with_capacity(instances.len() + other.len());

    for instance in instances.into_iter().chain(other) {
        merged.insert(instance.instance_id.clone(), instance);
    }

    merged.into_values().collect()
}
