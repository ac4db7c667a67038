//! Schema-driven model store on SQLite.
//! Typed modelitems, content-addressed blobs, text search and
//! multi-round derivation pipelines share one database file.

pub mod blob;
pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod repo;
pub mod schema;
pub mod search;
pub mod service;

pub use blob::{BlobHandle, BlobReader, BlobRepository, SqliteBlobStore};
pub use config::{ConfigError, ExecutorConfig, PipelineConfig, SearchConfig, StoreConfig};
pub use error::{ErrorKind, NotFound, StoreError, StoreResult};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::{
    BlobHash, EnumDefinition, FieldDefinition, FieldType, FieldValue, FieldValues, ItemId,
    ModelDefinition, Modelitem, ValidationError, Value,
};
pub use pipeline::{
    CancelToken, Pipeline, PipelineReport, PipelineState, Termination, Transform,
    TransformFailure, TransformInput, TransformOutput,
};
pub use repo::{ItemSelection, Predicate};
pub use schema::{RegisteredModel, SchemaError};
pub use search::{SearchError, SearchMatch, SearchQuery, SearchStrategy};
pub use service::store::Store;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
