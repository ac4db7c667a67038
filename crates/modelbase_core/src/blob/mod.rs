//! Content-addressed blob storage.
//!
//! # Responsibility
//! - Store arbitrary-size byte streams once per SHA-256 content hash.
//! - Serve stored blobs as seekable readers that load one chunk at a time.
//!
//! # Invariants
//! - A blob row becomes visible only after all its chunks are written and hashed.
//! - Identical bytes never occupy two blob rows.
//! - A put of content already stored writes nothing to the database.

mod blob_store;
mod reader;

pub(crate) use blob_store::fill_buffer;
pub use blob_store::{BlobHandle, BlobPut, BlobRepository, SqliteBlobStore};
pub use reader::BlobReader;
