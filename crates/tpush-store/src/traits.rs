use tpush_types::ObjectHash;

use crate::error::{StoreError, StoreResult};
use crate::object::{ObjectKind, StoredObject};

/// A local repository that resolves hashes to object bytes.
///
/// Implementations must satisfy these invariants:
/// - Objects are immutable: the same hash always yields the same bytes.
/// - `get` fails with [`StoreError::ObjectMissing`] when the hash is unknown,
///   never with an empty payload.
/// - Concurrent reads are safe.
pub trait LocalObjectSource: Send + Sync {
    /// Fetch an object by hash.
    fn get(&self, hash: &ObjectHash) -> StoreResult<StoredObject>;

    /// Check whether the source holds an object.
    fn contains(&self, hash: &ObjectHash) -> StoreResult<bool>;

    /// Fetch an object and check it has the kind its referrer expects.
    fn get_expecting(&self, hash: &ObjectHash, kind: ObjectKind) -> StoreResult<StoredObject> {
        let object = self.get(hash)?;
        if object.kind != kind {
            return Err(StoreError::KindMismatch {
                hash: *hash,
                expected: kind.to_string(),
                actual: object.kind.to_string(),
            });
        }
        Ok(object)
    }
}
