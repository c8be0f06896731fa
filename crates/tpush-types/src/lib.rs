//! Foundation types for tpush.
//!
//! Every object in a filesystem-tree snapshot (commits, directory trees,
//! directory metadata, file contents) is identified solely by its
//! [`ObjectHash`]. Two objects with the same hash are interchangeable, which
//! is what makes uploads deduplicatable and resumable.

pub mod error;
pub mod hash;

pub use error::TypeError;
pub use hash::ObjectHash;
