//! Keyspace shared by all connections, one map per logical database.

use std::collections::HashMap;

use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct Store {
    dbs: Mutex<HashMap<u32, HashMap<Vec<u8>, Vec<u8>>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, db: u32, key: &[u8]) -> Option<Vec<u8>> {
        self.dbs.lock().get(&db).and_then(|keys| keys.get(key).cloned())
    }

    pub fn set(&self, db: u32, key: Vec<u8>, value: Vec<u8>) {
        self.dbs.lock().entry(db).or_default().insert(key, value);
    }

    pub fn delete(&self, db: u32, key: &[u8]) -> bool {
        self.dbs
            .lock()
            .get_mut(&db)
            .is_some_and(|keys| keys.remove(key).is_some())
    }

    /// Keys across every database.
    pub fn len(&self) -> usize {
        self.dbs.lock().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn databases_are_isolated() {
        let store = Store::new();
        store.set(0, b"k".to_vec(), b"zero".to_vec());
        store.set(1, b"k".to_vec(), b"one".to_vec());
        assert_eq!(store.get(0, b"k"), Some(b"zero".to_vec()));
        assert_eq!(store.get(1, b"k"), Some(b"one".to_vec()));
        assert!(store.delete(1, b"k"));
        assert!(!store.delete(1, b"k"));
        assert!(!store.delete(7, b"k"));
        assert_eq!(store.len(), 1);
    }
}
