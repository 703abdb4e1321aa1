use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde_json::Value;

use errors::*;

/// `Key` is a result key emitted by user code during the map or reduce phase.
///
/// Keys are opaque to the engine. They only need to be hashable, so they can be grouped, and
/// ordered, so the reduce phase can partition them deterministically.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl Key {
    /// Converts a script value into a key. `null` is not a valid key.
    pub fn from_value(value: Value) -> Result<Key> {
        match value {
            Value::Null => Err(ErrorKind::InvalidKey("key cannot be null".to_owned()).into()),
            Value::Bool(b) => Ok(Key::Bool(b)),
            Value::String(s) => Ok(Key::Text(s)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(Key::Int(i)),
                None => Ok(Key::Text(n.to_string())),
            },
            other => Ok(Key::Text(other.to_string())),
        }
    }

    pub fn to_value(&self) -> Value {
        match *self {
            Key::Bool(b) => Value::Bool(b),
            Key::Int(i) => json!(i),
            Key::Text(ref s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Key::Bool(b) => write!(f, "{}", b),
            Key::Int(i) => write!(f, "{}", i),
            Key::Text(ref s) => write!(f, "{}", s),
        }
    }
}

impl<'a> From<&'a str> for Key {
    fn from(s: &'a str) -> Self {
        Key::Text(s.to_owned())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

impl From<bool> for Key {
    fn from(b: bool) -> Self {
        Key::Bool(b)
    }
}

/// Anything that can be validated and turned into a `Key`.
pub trait IntoKey {
    fn into_key(self) -> Result<Key>;
}

impl IntoKey for Key {
    fn into_key(self) -> Result<Key> {
        Ok(self)
    }
}

impl<'a> IntoKey for &'a Key {
    fn into_key(self) -> Result<Key> {
        Ok(self.clone())
    }
}

impl IntoKey for Value {
    fn into_key(self) -> Result<Key> {
        Key::from_value(self)
    }
}

impl<'a> IntoKey for &'a str {
    fn into_key(self) -> Result<Key> {
        Ok(Key::from(self))
    }
}

impl IntoKey for String {
    fn into_key(self) -> Result<Key> {
        Ok(Key::from(self))
    }
}

impl IntoKey for i64 {
    fn into_key(self) -> Result<Key> {
        Ok(Key::from(self))
    }
}

impl<K: IntoKey> IntoKey for Option<K> {
    fn into_key(self) -> Result<Key> {
        match self {
            Some(key) => key.into_key(),
            None => Err(ErrorKind::InvalidKey("key is absent".to_owned()).into()),
        }
    }
}

/// `ResultStore` is a multimap collecting values emitted by map and reduce workers.
///
/// The insertion order of values is preserved within a key; there is no ordering across keys.
/// The store is not synchronised: every worker owns a private store and the coordinating thread
/// merges them once the workers have been joined.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultStore {
    data: HashMap<Key, Vec<Value>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn add<K: IntoKey>(&mut self, key: K, value: Value) -> Result<()> {
        let key = key.into_key()?;
        self.data.entry(key).or_insert_with(Vec::new).push(value);
        Ok(())
    }

    pub fn add_all<K, I>(&mut self, key: K, values: I) -> Result<()>
    where
        K: IntoKey,
        I: IntoIterator<Item = Value>,
    {
        let key = key.into_key()?;
        self.data
            .entry(key)
            .or_insert_with(Vec::new)
            .extend(values);
        Ok(())
    }

    /// Appends every entry of `other` to this store.
    ///
    /// For each key the values of `other` follow the values already stored here. Taking `other`
    /// by value rules out merging a store into itself.
    pub fn merge(&mut self, other: ResultStore) {
        for (key, values) in other.data {
            self.data
                .entry(key)
                .or_insert_with(Vec::new)
                .extend(values);
        }
    }

    /// Removes a key and returns all of its values. Returns an empty list for an unknown key.
    pub fn remove(&mut self, key: &Key) -> Vec<Value> {
        self.data.remove(key).unwrap_or_default()
    }

    /// A snapshot of the current key set in natural key order.
    pub fn keys(&self) -> BTreeSet<Key> {
        self.data.keys().cloned().collect()
    }

    pub fn values(&self, key: &Key) -> Option<&[Value]> {
        self.data.get(key).map(|values| values.as_slice())
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.data.contains_key(key)
    }

    pub fn num_keys(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn iter(&self) -> ::std::collections::hash_map::Iter<Key, Vec<Value>> {
        self.data.iter()
    }
}
