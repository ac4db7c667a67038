//! Store facade: one connection, its schema registry and configuration.
//!
//! # Responsibility
//! - Provide stable entry points for schema, blob, item, search and
//!   pipeline operations.
//! - Delegate persistence to the repository implementations.
//!
//! # Invariants
//! - The configuration is validated before any storage is touched.
//! - The registry mirrors `_models` for the lifetime of the store.

use crate::blob::{BlobHandle, BlobReader, BlobRepository, SqliteBlobStore};
use crate::config::StoreConfig;
use crate::db::{open_db_in_memory, open_db_with_timeout};
use crate::error::StoreResult;
use crate::model::{BlobHash, FieldValues, InsertOrigin, ItemId, ModelDefinition, Modelitem};
use crate::pipeline::{self, MarkerStatus, Pipeline, PipelineReport, PipelineRun};
use crate::repo::{ItemRepository, ItemSelection, Predicate, SqliteItemRepository};
use crate::schema::{RegisteredModel, SchemaRegistry};
use crate::search::{self, IndexStats, SearchQuery, SearchResults};
use log::info;
use rusqlite::Connection;
use std::io::Read;
use std::path::Path;

/// A model store backed by one SQLite database.
pub struct Store {
    conn: Connection,
    registry: SchemaRegistry,
    config: StoreConfig,
}

impl Store {
    /// Opens (or creates) the store file at `path`.
    ///
    /// # Errors
    /// - `ConfigError` when `config` is invalid.
    /// - `StorageError` when the file cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let conn = open_db_with_timeout(path, config.busy_timeout())?;
        Self::with_connection(conn, config)
    }

    pub fn open_in_memory(config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let conn = open_db_in_memory()?;
        Self::with_connection(conn, config)
    }

    fn with_connection(conn: Connection, config: StoreConfig) -> StoreResult<Self> {
        let registry = SchemaRegistry::load(&conn)?;
        Ok(Self {
            conn,
            registry,
            config,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Repository view over this store's connection.
    pub fn items(&self) -> SqliteItemRepository<'_> {
        SqliteItemRepository::new(&self.conn, &self.registry, &self.config)
    }

    pub fn blobs(&self) -> SqliteBlobStore<'_> {
        SqliteBlobStore::new(&self.conn, self.config.blob_chunk_size)
    }

    // Schema

    pub fn register(&mut self, definition: ModelDefinition) -> StoreResult<RegisteredModel> {
        self.registry.register(&self.conn, definition)
    }

    pub fn lookup(&self, name: &str) -> StoreResult<RegisteredModel> {
        self.registry.lookup(name)
    }

    pub fn models(&self) -> impl Iterator<Item = &RegisteredModel> {
        self.registry.models()
    }

    // Blobs

    pub fn put_blob(&self, reader: &mut dyn Read) -> StoreResult<BlobHandle> {
        Ok(self.blobs().put_reader(reader)?.handle)
    }

    pub fn put_blob_bytes(&self, bytes: &[u8]) -> StoreResult<BlobHandle> {
        Ok(self.blobs().put_bytes(bytes)?.handle)
    }

    pub fn blob(&self, hash: &BlobHash) -> StoreResult<Option<BlobHandle>> {
        self.blobs().handle(hash)
    }

    pub fn open_blob(&self, hash: &BlobHash) -> StoreResult<BlobReader<'_>> {
        self.blobs().open_reader(hash)
    }

    pub fn blob_count(&self) -> StoreResult<u64> {
        self.blobs().count()
    }

    // Items

    /// Inserts a caller-supplied modelitem, applying the model's dedup policy.
    pub fn insert(&self, model: &RegisteredModel, values: FieldValues) -> StoreResult<ItemId> {
        Ok(self.items().insert(model, values, InsertOrigin::Caller)?.id)
    }

    /// Inserts a modelitem derived from other stored content.
    pub fn insert_derived(&self, model: &RegisteredModel, values: FieldValues) -> StoreResult<ItemId> {
        Ok(self.items().insert(model, values, InsertOrigin::Derived)?.id)
    }

    pub fn get(&self, model: &RegisteredModel, id: ItemId) -> StoreResult<Modelitem> {
        self.items().get(model, id)
    }

    pub fn update(&self, model: &RegisteredModel, id: ItemId, values: FieldValues) -> StoreResult<()> {
        self.items().update(model, id, values)
    }

    pub fn count(&self, model: &RegisteredModel, predicate: &Predicate) -> StoreResult<u64> {
        self.items().count(model, predicate)
    }

    /// Lazy, restartable sequence of matching items.
    pub fn find(&self, model: &RegisteredModel, predicate: &Predicate) -> StoreResult<ItemSelection<'_>> {
        self.items().select(model, predicate)
    }

    /// Dereferences a scalar reference field of `item`.
    pub fn resolve(&self, item: &Modelitem, field: &str) -> StoreResult<Option<Modelitem>> {
        self.items().resolve(item, field)
    }

    // Search

    pub fn search(&self, query: &SearchQuery) -> StoreResult<SearchResults<'_>> {
        search::prepare(self.items(), &self.registry, query)
    }

    /// Builds the text index; later writes keep it current.
    pub fn enable_search_index(&self) -> StoreResult<IndexStats> {
        if search::index::is_enabled(&self.conn)? {
            info!("event=search_index_build module=search status=skip reason=already_enabled");
            return Ok(IndexStats::default());
        }
        search::index::rebuild(&self.items(), &self.registry)
    }

    pub fn rebuild_search_index(&self) -> StoreResult<IndexStats> {
        search::index::rebuild(&self.items(), &self.registry)
    }

    pub fn search_index_enabled(&self) -> StoreResult<bool> {
        search::index::is_enabled(&self.conn)
    }

    // Pipelines

    pub fn start_pipeline<'p>(&self, pipeline: &'p Pipeline) -> PipelineRun<'p, '_> {
        pipeline.start(self.items())
    }

    pub fn run_pipeline(&self, pipeline: &Pipeline) -> StoreResult<PipelineReport> {
        self.start_pipeline(pipeline).run()
    }

    /// Clears failed markers of every stage of `pipeline`.
    pub fn reset_pipeline_failures(&self, pipeline: &Pipeline) -> StoreResult<u64> {
        pipeline.reset_failed(&self.items())
    }

    pub fn marker_status(
        &self,
        stage: &str,
        model: &str,
        id: ItemId,
    ) -> StoreResult<Option<MarkerStatus>> {
        Ok(pipeline::marker_status(&self.conn, stage, model, id)?.map(|(status, _)| status))
    }

    /// Detail message recorded with a failed marker.
    pub fn marker_detail(&self, stage: &str, model: &str, id: ItemId) -> StoreResult<Option<String>> {
        Ok(pipeline::marker_status(&self.conn, stage, model, id)?.and_then(|(_, detail)| detail))
    }

    pub fn marker_count(&self, stage: &str, status: MarkerStatus) -> StoreResult<u64> {
        pipeline::marker_count(&self.conn, stage, status)
    }
}
