use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tpush_types::ObjectHash;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::object::{ObjectKind, StoredObject};
use crate::traits::LocalObjectSource;

const OBJECTS_DIR: &str = "objects";
const HEADS_DIR: &str = "refs/heads";

/// On-disk repository source.
///
/// Layout:
///
/// ```text
/// <root>/objects/<xx>/<62 hex>.<commit|dirtree|dirmeta|file>
/// <root>/refs/heads/<name>        (hex commit hash)
/// ```
///
/// The kind of an object is recovered from its file extension, so a lookup
/// by hash tries each extension in turn.
#[derive(Clone, Debug)]
pub struct DirObjectSource {
    root: PathBuf,
}

impl DirObjectSource {
    /// Open an existing repository. Fails if `<root>/objects` is missing.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        let objects = root.join(OBJECTS_DIR);
        if !objects.is_dir() {
            return Err(StoreError::Io(std::io::Error::new(
                ErrorKind::NotFound,
                format!("{} is not a repository (no objects/)", root.display()),
            )));
        }
        Ok(Self { root })
    }

    /// Create the repository skeleton if needed and open it.
    pub fn init(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(OBJECTS_DIR))?;
        fs::create_dir_all(root.join(HEADS_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, hash: &ObjectHash, kind: ObjectKind) -> PathBuf {
        let (prefix, rest) = hash.split_hex();
        self.root
            .join(OBJECTS_DIR)
            .join(prefix)
            .join(format!("{rest}.{}", kind.extension()))
    }

    fn head_path(&self, name: &str) -> StoreResult<PathBuf> {
        let valid = !name.is_empty()
            && name
                .split('/')
                .all(|part| !part.is_empty() && part != "." && part != "..");
        if !valid {
            return Err(StoreError::BadRef {
                name: name.to_string(),
                reason: "invalid ref name".into(),
            });
        }
        Ok(self.root.join(HEADS_DIR).join(name))
    }

    /// Write an object into the layout and return its hash.
    ///
    /// Writing an object that already exists is a no-op.
    pub fn write(&self, object: &StoredObject) -> StoreResult<ObjectHash> {
        let hash = object.compute_hash();
        let path = self.object_path(&hash, object.kind);
        if path.exists() {
            return Ok(hash);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write under a temporary name and rename so readers never observe a
        // partially written object.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &object.data)?;
        fs::rename(&tmp, &path)?;
        debug!(object = %hash.short_hex(), kind = %object.kind, "wrote object");
        Ok(hash)
    }

    /// Resolve `refs/heads/<name>` to the commit hash it points at.
    pub fn resolve_ref(&self, name: &str) -> StoreResult<ObjectHash> {
        let path = self.head_path(name)?;
        let content = fs::read_to_string(&path).map_err(|e| StoreError::BadRef {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        ObjectHash::from_hex(&content).map_err(|e| StoreError::BadRef {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Point `refs/heads/<name>` at a commit.
    pub fn write_ref(&self, name: &str, commit: &ObjectHash) -> StoreResult<()> {
        let path = self.head_path(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, format!("{}\n", commit.to_hex()))?;
        Ok(())
    }
}

impl LocalObjectSource for DirObjectSource {
    fn get(&self, hash: &ObjectHash) -> StoreResult<StoredObject> {
        for kind in ObjectKind::ALL {
            match fs::read(self.object_path(hash, kind)) {
                Ok(data) => return Ok(StoredObject::new(kind, data)),
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
        Err(StoreError::ObjectMissing(*hash))
    }

    fn contains(&self, hash: &ObjectHash) -> StoreResult<bool> {
        Ok(ObjectKind::ALL
            .into_iter()
            .any(|kind| self.object_path(hash, kind).is_file()))
    }
}
