use serde_json::Value;

use results::{Key, ResultStore};

/// `FinalResults` is the read-only view of the reduce output handed to the finish hook.
pub struct FinalResults<'a> {
    store: &'a ResultStore,
}

impl<'a> FinalResults<'a> {
    pub fn new(store: &'a ResultStore) -> Self {
        FinalResults { store }
    }

    pub fn get(&self, key: &Key) -> Option<&'a [Value]> {
        self.store.values(key)
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.store.contains(key)
    }

    /// All keys, sorted in natural key order when `sorted` is set.
    pub fn keys(&self, sorted: bool) -> Vec<Key> {
        if sorted {
            self.store.keys().into_iter().collect()
        } else {
            self.store.iter().map(|(key, _)| key.clone()).collect()
        }
    }

    pub fn num_keys(&self) -> usize {
        self.store.num_keys()
    }

    /// Calls `f` for every key with all of its values.
    pub fn each<F>(&self, sorted: bool, mut f: F)
    where
        F: FnMut(&Key, &[Value]),
    {
        for key in self.keys(sorted) {
            if let Some(values) = self.store.values(&key) {
                f(&key, values);
            }
        }
    }

    /// Renders the results as a list of `{"key": .., "values": [..]}` objects in key order.
    pub fn to_value(&self) -> Value {
        let mut entries = Vec::with_capacity(self.num_keys());
        self.each(true, |key, values| {
            entries.push(json!({
                "key": key.to_value(),
                "values": values
            }));
        });
        Value::Array(entries)
    }
}
