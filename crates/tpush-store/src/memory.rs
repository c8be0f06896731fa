use std::collections::HashMap;
use std::sync::RwLock;

use tpush_types::ObjectHash;

use crate::error::{StoreError, StoreResult};
use crate::object::StoredObject;
use crate::traits::LocalObjectSource;

/// In-memory, HashMap-based object source.
///
/// Intended for tests and embedding. Objects are held behind a `RwLock`;
/// payloads are reference-counted so reads do not copy bytes.
pub struct InMemoryObjectSource {
    objects: RwLock<HashMap<ObjectHash, StoredObject>>,
}

impl InMemoryObjectSource {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
        }
    }

    /// Insert an object under its computed hash and return the hash.
    ///
    /// Inserting the same content twice is a no-op.
    pub fn insert(&self, object: StoredObject) -> ObjectHash {
        let hash = object.compute_hash();
        self.objects
            .write()
            .expect("lock poisoned")
            .entry(hash)
            .or_insert(object);
        hash
    }

    /// Remove an object, simulating a truncated or damaged repository.
    pub fn remove(&self, hash: &ObjectHash) -> bool {
        self.objects
            .write()
            .expect("lock poisoned")
            .remove(hash)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Sorted list of all hashes held.
    pub fn all_hashes(&self) -> Vec<ObjectHash> {
        let map = self.objects.read().expect("lock poisoned");
        let mut hashes: Vec<ObjectHash> = map.keys().copied().collect();
        hashes.sort();
        hashes
    }
}

impl Default for InMemoryObjectSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalObjectSource for InMemoryObjectSource {
    fn get(&self, hash: &ObjectHash) -> StoreResult<StoredObject> {
        let map = self.objects.read().expect("lock poisoned");
        map.get(hash).cloned().ok_or(StoreError::ObjectMissing(*hash))
    }

    fn contains(&self, hash: &ObjectHash) -> StoreResult<bool> {
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.contains_key(hash))
    }
}

impl std::fmt::Debug for InMemoryObjectSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectSource")
            .field("object_count", &self.len())
            .finish()
    }
}
