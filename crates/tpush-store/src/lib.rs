//! Local object source for tpush.
//!
//! A filesystem-tree snapshot is a DAG of immutable, content-addressed
//! objects. This crate knows the four object kinds, how each kind's payload
//! names its dependencies, and how to fetch an object's bytes by hash from a
//! local repository.
//!
//! # Object Kinds
//!
//! - [`CommitObject`] -- root of a snapshot; references a root directory
//!   tree, its metadata, and optionally a parent commit
//! - [`DirTree`] -- directory listing; references file contents and child
//!   directory trees with their metadata
//! - [`DirMeta`] -- ownership, mode, and extended attributes of a directory
//! - file content -- raw bytes, references nothing
//!
//! # Sources
//!
//! All sources implement the [`LocalObjectSource`] trait:
//!
//! - [`InMemoryObjectSource`] -- `HashMap`-backed, for tests and embedding
//! - [`DirObjectSource`] -- on-disk repository using the
//!   `objects/<xx>/<rest>.<kind>` layout, with `refs/heads/` lookups

pub mod dir;
pub mod error;
pub mod memory;
pub mod object;
pub mod traits;

pub use dir::DirObjectSource;
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryObjectSource;
pub use object::{
    CommitObject, DirEntry, DirMeta, DirTree, FileEntry, Link, ObjectKind, StoredObject,
};
pub use traits::LocalObjectSource;
