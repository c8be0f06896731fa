use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tpush_types::ObjectHash;

use crate::error::{StoreError, StoreResult};

/// The kind of a repository object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Root of a snapshot.
    Commit,
    /// Directory listing.
    DirTree,
    /// Directory ownership, mode, and xattrs.
    DirMeta,
    /// Raw file content.
    File,
}

impl ObjectKind {
    /// Every kind, in the order sources try them.
    pub const ALL: [ObjectKind; 4] = [
        ObjectKind::Commit,
        ObjectKind::DirTree,
        ObjectKind::DirMeta,
        ObjectKind::File,
    ];

    /// File extension used by the `objects/xx/rest.<ext>` layout, locally and
    /// on the remote.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::DirTree => "dirtree",
            Self::DirMeta => "dirmeta",
            Self::File => "file",
        }
    }

    /// Parse a layout extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.extension() == ext)
    }

    fn hash_domain(&self) -> &'static str {
        match self {
            Self::Commit => "tpush-commit-v1",
            Self::DirTree => "tpush-dirtree-v1",
            Self::DirMeta => "tpush-dirmeta-v1",
            Self::File => "tpush-file-v1",
        }
    }
}

impl std::fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// A reference from one object to another, as parsed from the referrer's
/// payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Link {
    /// Hash of the referenced object.
    pub hash: ObjectHash,
    /// Kind the referrer expects the target to have.
    pub kind: ObjectKind,
    /// Optional links (a commit's parent) are followed only when the local
    /// repository actually holds the target.
    pub optional: bool,
}

impl Link {
    fn required(hash: ObjectHash, kind: ObjectKind) -> Self {
        Self { hash, kind, optional: false }
    }
}

/// A stored object: kind tag plus raw payload bytes.
///
/// `data` is reference-counted so in-flight transfers can hold the payload
/// without copying it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub kind: ObjectKind,
    pub data: Bytes,
}

impl StoredObject {
    pub fn new(kind: ObjectKind, data: impl Into<Bytes>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    /// Size of the payload in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Content hash of this object, domain-separated by kind.
    pub fn compute_hash(&self) -> ObjectHash {
        ObjectHash::digest_with_domain(self.kind.hash_domain(), &self.data)
    }

    /// Parse the payload and return the objects it references, in payload
    /// order. File contents and directory metadata reference nothing.
    pub fn links(&self, hash: &ObjectHash) -> StoreResult<Vec<Link>> {
        match self.kind {
            ObjectKind::Commit => Ok(CommitObject::decode(hash, &self.data)?.links()),
            ObjectKind::DirTree => Ok(DirTree::decode(hash, &self.data)?.links()),
            ObjectKind::DirMeta | ObjectKind::File => Ok(Vec::new()),
        }
    }
}

fn decode_json<'a, T: Deserialize<'a>>(hash: &ObjectHash, data: &'a [u8]) -> StoreResult<T> {
    serde_json::from_slice(data).map_err(|e| StoreError::CorruptObject {
        hash: *hash,
        reason: e.to_string(),
    })
}

fn encode_json<T: Serialize>(kind: ObjectKind, value: &T) -> StoreResult<StoredObject> {
    let data = serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(StoredObject::new(kind, data))
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// Root object of one filesystem-tree snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitObject {
    /// Root directory tree.
    pub tree_contents: ObjectHash,
    /// Metadata of the root directory.
    pub tree_meta: ObjectHash,
    /// Previous commit in history, if any.
    #[serde(default)]
    pub parent: Option<ObjectHash>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    /// Seconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: u64,
}

impl CommitObject {
    pub fn new(tree_contents: ObjectHash, tree_meta: ObjectHash) -> Self {
        Self {
            tree_contents,
            tree_meta,
            parent: None,
            subject: String::new(),
            body: String::new(),
            timestamp: 0,
        }
    }

    pub fn with_parent(mut self, parent: ObjectHash) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn to_stored_object(&self) -> StoreResult<StoredObject> {
        encode_json(ObjectKind::Commit, self)
    }

    pub fn decode(hash: &ObjectHash, data: &[u8]) -> StoreResult<Self> {
        decode_json(hash, data)
    }

    /// Root tree, root metadata, then the parent commit as an optional link.
    pub fn links(&self) -> Vec<Link> {
        let mut links = vec![
            Link::required(self.tree_contents, ObjectKind::DirTree),
            Link::required(self.tree_meta, ObjectKind::DirMeta),
        ];
        if let Some(parent) = self.parent {
            links.push(Link {
                hash: parent,
                kind: ObjectKind::Commit,
                optional: true,
            });
        }
        links
    }
}

// ---------------------------------------------------------------------------
// DirTree
// ---------------------------------------------------------------------------

/// A regular file entry in a directory tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    /// Hash of the file-content object.
    pub checksum: ObjectHash,
}

/// A subdirectory entry in a directory tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    /// Hash of the child directory tree.
    pub tree_checksum: ObjectHash,
    /// Hash of the child directory's metadata.
    pub meta_checksum: ObjectHash,
}

/// Directory listing object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirTree {
    #[serde(default)]
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub dirs: Vec<DirEntry>,
}

impl DirTree {
    /// Build a tree; entries are sorted by name for deterministic hashing.
    pub fn new(mut files: Vec<FileEntry>, mut dirs: Vec<DirEntry>) -> Self {
        files.sort_by(|a, b| a.name.cmp(&b.name));
        dirs.sort_by(|a, b| a.name.cmp(&b.name));
        Self { files, dirs }
    }

    pub fn to_stored_object(&self) -> StoreResult<StoredObject> {
        encode_json(ObjectKind::DirTree, self)
    }

    pub fn decode(hash: &ObjectHash, data: &[u8]) -> StoreResult<Self> {
        decode_json(hash, data)
    }

    /// File contents first, then each subdirectory's tree and metadata.
    pub fn links(&self) -> Vec<Link> {
        let files = self
            .files
            .iter()
            .map(|f| Link::required(f.checksum, ObjectKind::File));
        let dirs = self.dirs.iter().flat_map(|d| {
            [
                Link::required(d.tree_checksum, ObjectKind::DirTree),
                Link::required(d.meta_checksum, ObjectKind::DirMeta),
            ]
        });
        files.chain(dirs).collect()
    }

    pub fn len(&self) -> usize {
        self.files.len() + self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// DirMeta
// ---------------------------------------------------------------------------

/// Ownership and permission metadata of a directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirMeta {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
    #[serde(default)]
    pub xattrs: BTreeMap<String, Vec<u8>>,
}

impl DirMeta {
    pub fn new(uid: u32, gid: u32, mode: u32) -> Self {
        Self {
            uid,
            gid,
            mode,
            xattrs: BTreeMap::new(),
        }
    }

    pub fn to_stored_object(&self) -> StoreResult<StoredObject> {
        encode_json(ObjectKind::DirMeta, self)
    }
}
