//! Map payload for [`Value::Map`](super::Value::Map).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use indexmap::IndexMap;

use super::Value;

/// A mapping from [`Value`] to [`Value`] with keys unique by value equality.
///
/// Entries keep insertion order for display and encoding, but equality
/// ignores it: two maps are equal when they hold the same key/value pairs.
/// Lookups and inserts hash the key, so decoding a map is linear in its size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueMap {
    entries: IndexMap<Value, Value>,
}

impl ValueMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty map with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity),
        }
    }

    /// Insert an entry, returning the previous value stored under an equal key.
    ///
    /// A replaced entry keeps its original position.
    pub fn insert(&mut self, key: Value, value: Value) -> Option<Value> {
        self.entries.insert(key, value)
    }

    /// Look up the value stored under `key`.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Returns `true` if an entry with an equal key exists.
    pub fn contains_key(&self, key: &Value) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove the entry stored under `key`, keeping the order of the rest.
    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter()
    }
}

// Order-independent, to agree with `PartialEq`: entry hashes are summed.
impl Hash for ValueMap {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let combined = self.entries.iter().fold(0u64, |acc, entry| {
            let mut hasher = DefaultHasher::new();
            entry.hash(&mut hasher);
            acc.wrapping_add(hasher.finish())
        });
        state.write_usize(self.entries.len());
        state.write_u64(combined);
    }
}

impl FromIterator<(Value, Value)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ValueMap {
    type Item = (Value, Value);
    type IntoIter = indexmap::map::IntoIter<Value, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_map(pairs: &[(i64, i64)]) -> ValueMap {
        pairs
            .iter()
            .map(|&(k, v)| (Value::from(k), Value::from(v)))
            .collect()
    }

    #[test]
    fn test_equality_ignores_insertion_order() {
        let a = small_map(&[(1, 1), (2, 2), (3, 3)]);
        let b = small_map(&[(3, 3), (1, 1), (2, 2)]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_equality_checks_values() {
        let a = small_map(&[(1, 1), (2, 2)]);
        let b = small_map(&[(1, 1), (2, 3)]);
        assert_ne!(a, b);
        assert_ne!(a, small_map(&[(1, 1)]));
    }

    #[test]
    fn test_insert_replaces_equal_key() {
        let mut map = small_map(&[(1, 1)]);
        let previous = map.insert(Value::from(1), Value::from("one"));
        assert_eq!(previous, Some(Value::from(1)));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&Value::from(1)), Some(&Value::from("one")));
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut map = small_map(&[(1, 1), (2, 2), (3, 3)]);
        map.remove(&Value::from(2));
        let keys: Vec<i64> = map.iter().filter_map(|(k, _)| k.as_i64()).collect();
        assert_eq!(keys, vec![1, 3]);
    }

    #[test]
    fn test_equal_maps_hash_equal() {
        let hash = |map: &ValueMap| {
            let mut hasher = DefaultHasher::new();
            map.hash(&mut hasher);
            hasher.finish()
        };
        let a = small_map(&[(1, 1), (2, 2), (3, 3)]);
        let b = small_map(&[(3, 3), (2, 2), (1, 1)]);
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn test_structured_keys() {
        let key = Value::from(vec![Value::from(1), Value::from("x")]);
        let mut map = ValueMap::new();
        map.insert(key.clone(), Value::Boolean(true));
        assert!(map.contains_key(&key));
        assert_eq!(map.remove(&key), Some(Value::Boolean(true)));
        assert!(map.is_empty());
    }
}
