//! Modelitem repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist typed modelitems into their model's table and side tables.
//! - Apply the model's dedup policy through the indexed fingerprint column.
//! - Check blob and cross-model references at write time.
//!
//! # Invariants
//! - Every insert and update runs in its own savepoint; failures leave no
//!   partial rows behind.
//! - Read paths reject malformed stored values instead of masking them.

use super::predicate::{compile, Predicate};
use super::selection::{ItemSelection, RawRow};
use crate::blob::{BlobRepository, SqliteBlobStore};
use crate::codec::{
    decode, decode_timestamp, encode, encode_timestamp, fingerprint, CodecError, StoredField,
};
use crate::config::StoreConfig;
use crate::db::Savepoint;
use crate::error::{NotFound, StoreError, StoreResult};
use crate::model::{
    DedupAction, FieldDefinition, FieldType, FieldValue, FieldValues, InsertOrigin, ItemId,
    Modelitem, ValidationError, Value,
};
use crate::schema::{RegisteredModel, SchemaRegistry};
use crate::search::index;
use log::{debug, info, warn};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use time::OffsetDateTime;
use uuid::Uuid;

/// Identity returned by an insert, and whether a new row was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    pub id: ItemId,
    pub created: bool,
}

/// Object store contract over registered models.
pub trait ItemRepository {
    fn insert(
        &self,
        model: &RegisteredModel,
        values: FieldValues,
        origin: InsertOrigin,
    ) -> StoreResult<InsertOutcome>;
    fn get(&self, model: &RegisteredModel, id: ItemId) -> StoreResult<Modelitem>;
    fn update(&self, model: &RegisteredModel, id: ItemId, values: FieldValues) -> StoreResult<()>;
    fn count(&self, model: &RegisteredModel, predicate: &Predicate) -> StoreResult<u64>;
    fn exists(&self, model: &RegisteredModel, id: ItemId) -> StoreResult<bool>;
}

/// SQLite-backed modelitem repository.
#[derive(Clone, Copy)]
pub struct SqliteItemRepository<'conn> {
    conn: &'conn Connection,
    registry: &'conn SchemaRegistry,
    config: &'conn StoreConfig,
}

impl<'conn> SqliteItemRepository<'conn> {
    pub fn new(
        conn: &'conn Connection,
        registry: &'conn SchemaRegistry,
        config: &'conn StoreConfig,
    ) -> Self {
        Self {
            conn,
            registry,
            config,
        }
    }

    pub(crate) fn conn(&self) -> &'conn Connection {
        self.conn
    }

    pub(crate) fn config(&self) -> &'conn StoreConfig {
        self.config
    }

    pub(crate) fn registry(&self) -> &'conn SchemaRegistry {
        self.registry
    }

    pub(crate) fn blobs(&self) -> SqliteBlobStore<'conn> {
        SqliteBlobStore::new(self.conn, self.config.blob_chunk_size)
    }

    /// Lazy, restartable selection of items matching `predicate`.
    pub fn select(
        &self,
        model: &RegisteredModel,
        predicate: &Predicate,
    ) -> StoreResult<ItemSelection<'conn>> {
        Ok(ItemSelection::new(*self, model.clone(), compile(model, predicate)?, None))
    }

    /// Like [`Self::select`], skipping items that already carry a marker for `stage`.
    pub(crate) fn select_unmarked(
        &self,
        model: &RegisteredModel,
        predicate: &Predicate,
        stage: &str,
    ) -> StoreResult<ItemSelection<'conn>> {
        Ok(ItemSelection::new(
            *self,
            model.clone(),
            compile(model, predicate)?,
            Some(stage.to_string()),
        ))
    }

    /// Follows a scalar reference field; `None` when the field is empty.
    ///
    /// # Errors
    /// - `NotFound` when the referenced item no longer exists.
    pub fn resolve(&self, item: &Modelitem, field: &str) -> StoreResult<Option<Modelitem>> {
        let model = self.registry.lookup(&item.model)?;
        let def = known_field(&model, field)?;
        let target = match (&def.field_type, def.sequence) {
            (FieldType::Reference { model }, false) => model,
            _ => {
                return Err(ValidationError::TypeMismatch {
                    field: field.to_string(),
                    expected: "scalar reference",
                    found: def.field_type.label(),
                }
                .into())
            }
        };
        match item.reference(field) {
            None => Ok(None),
            Some(id) => {
                let target = self.registry.lookup(target)?;
                self.get(&target, id).map(Some)
            }
        }
    }

    pub(crate) fn select_sql(model: &RegisteredModel) -> String {
        let columns = model
            .fields()
            .iter()
            .map(|field| format!(", t.\"{}\"", model.column(&field.name)))
            .collect::<String>();
        format!(
            "SELECT t.id, t.uuid, t.created_at, t.updated_at{columns} FROM \"{}\" t",
            model.table()
        )
    }

    /// Decodes a raw row, loading sequence elements from their side tables.
    pub(crate) fn decode_row(&self, model: &RegisteredModel, raw: RawRow) -> StoreResult<Modelitem> {
        let id = parse_uuid(&raw.uuid)?;
        let mut values = FieldValues::new();
        for (def, column) in model.fields().iter().zip(raw.columns) {
            let elements = if def.sequence && !matches!(column, SqlValue::Null) {
                self.load_elements(model, &def.name, raw.rowid)?
            } else {
                Vec::new()
            };
            values.set(def.name.clone(), decode(def, column, elements)?);
        }
        Ok(Modelitem {
            id,
            model: model.name().to_string(),
            values,
            created_at: decode_timestamp(&raw.created_at)?,
            updated_at: decode_timestamp(&raw.updated_at)?,
        })
    }

    fn load_elements(
        &self,
        model: &RegisteredModel,
        field: &str,
        rowid: i64,
    ) -> StoreResult<Vec<SqlValue>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT value FROM \"{}\" WHERE item_id = ?1 ORDER BY position;",
            model.sequence_table(field)
        ))?;
        let rows = stmt.query_map([rowid], |row| row.get::<_, SqlValue>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn load_by_uuid(
        &self,
        model: &RegisteredModel,
        id: ItemId,
    ) -> StoreResult<Option<(i64, Modelitem)>> {
        let sql = format!("{} WHERE t.uuid = ?1;", Self::select_sql(model));
        let raw = self
            .conn
            .query_row(&sql, [id.to_string()], |row| RawRow::read(row, model.fields().len()))
            .optional()?;
        match raw {
            None => Ok(None),
            Some(raw) => {
                let rowid = raw.rowid;
                Ok(Some((rowid, self.decode_row(model, raw)?)))
            }
        }
    }

    /// Routes raw bytes through the blob store, encodes, and checks links.
    fn prepare_field(&self, def: &FieldDefinition, value: FieldValue) -> StoreResult<StoredField> {
        let value = self.route_blob_bytes(def, value)?;
        let stored = encode(def, &value)?;
        for element in value.values() {
            self.check_link(def, element)?;
        }
        Ok(stored)
    }

    fn route_blob_bytes(&self, def: &FieldDefinition, value: FieldValue) -> StoreResult<FieldValue> {
        if def.field_type != FieldType::Blob {
            return Ok(value);
        }
        let route = |value: Value| -> StoreResult<Value> {
            match value {
                Value::Bytes(bytes) => Ok(Value::Blob(self.blobs().put_bytes(&bytes)?.handle.hash)),
                other => Ok(other),
            }
        };
        Ok(match value {
            FieldValue::Null => FieldValue::Null,
            FieldValue::One(value) => FieldValue::One(route(value)?),
            FieldValue::Many(values) => FieldValue::Many(
                values
                    .into_iter()
                    .map(route)
                    .collect::<StoreResult<Vec<_>>>()?,
            ),
        })
    }

    fn check_link(&self, def: &FieldDefinition, value: &Value) -> StoreResult<()> {
        match (&def.field_type, value) {
            (FieldType::Blob, Value::Blob(hash)) => {
                if !self.blobs().exists(hash)? {
                    return Err(ValidationError::UnknownBlob {
                        field: def.name.clone(),
                        hash: hash.clone(),
                    }
                    .into());
                }
            }
            (FieldType::Reference { model }, Value::Reference(id)) => {
                let target = self.registry.lookup(model)?;
                if !self.exists(&target, *id)? {
                    return Err(ValidationError::DanglingReference {
                        field: def.name.clone(),
                        model: model.clone(),
                        id: *id,
                    }
                    .into());
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn find_by_fingerprint(
        &self,
        model: &RegisteredModel,
        fingerprint: &str,
    ) -> StoreResult<Option<ItemId>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                &format!(
                    "SELECT uuid FROM \"{}\" WHERE fingerprint = ?1 ORDER BY id LIMIT 1;",
                    model.table()
                ),
                [fingerprint],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.map(|uuid| parse_uuid(&uuid)).transpose()?)
    }

    fn write_sequences(
        &self,
        model: &RegisteredModel,
        rowid: i64,
        fields: &[(&FieldDefinition, &StoredField)],
    ) -> StoreResult<()> {
        for (def, stored) in fields.iter().filter(|(def, _)| def.sequence) {
            let side = model.sequence_table(&def.name);
            self.conn.execute(
                &format!("DELETE FROM \"{side}\" WHERE item_id = ?1;"),
                [rowid],
            )?;
            let mut insert = self.conn.prepare_cached(&format!(
                "INSERT INTO \"{side}\" (item_id, position, value) VALUES (?1, ?2, ?3);"
            ))?;
            for (position, element) in stored.elements.iter().enumerate() {
                insert.execute(params![rowid, position as i64, element])?;
            }
        }
        Ok(())
    }

    fn refresh_search_index(&self, model: &RegisteredModel, id: ItemId) -> StoreResult<()> {
        if !index::is_enabled(self.conn)? {
            return Ok(());
        }
        let item = self.get(model, id)?;
        index::refresh_item(self.conn, &self.blobs(), &self.config.search, &item)
    }
}

impl ItemRepository for SqliteItemRepository<'_> {
    fn insert(
        &self,
        model: &RegisteredModel,
        mut values: FieldValues,
        origin: InsertOrigin,
    ) -> StoreResult<InsertOutcome> {
        reject_unknown_fields(model, &values)?;
        let savepoint = Savepoint::begin(self.conn, "item_insert")?;

        let mut stored = Vec::with_capacity(model.fields().len());
        for def in model.fields() {
            let value = values.remove(&def.name).unwrap_or_default();
            stored.push(self.prepare_field(def, value)?);
        }
        let pairs = model.fields().iter().zip(&stored).collect::<Vec<_>>();
        let named = pairs
            .iter()
            .map(|(def, stored)| (def.name.as_str(), *stored))
            .collect::<Vec<_>>();
        let fingerprint = fingerprint(model.definition(), &named);

        let action = model.definition().dedup_policy().action(origin);
        if action != DedupAction::InsertNew {
            if let Some(existing) = self.find_by_fingerprint(model, &fingerprint)? {
                savepoint.rollback()?;
                return match action {
                    DedupAction::RejectDuplicate => {
                        info!(
                            "event=item_insert module=repo status=error outcome=rejected model={} existing={existing}",
                            model.name()
                        );
                        Err(StoreError::Duplicate {
                            model: model.name().to_string(),
                            existing,
                        })
                    }
                    DedupAction::ReuseAndReport => {
                        warn!(
                            "event=item_insert module=repo status=ok outcome=duplicate_reused model={} existing={existing}",
                            model.name()
                        );
                        Ok(InsertOutcome {
                            id: existing,
                            created: false,
                        })
                    }
                    DedupAction::ReuseExisting | DedupAction::InsertNew => {
                        debug!(
                            "event=item_insert module=repo status=ok outcome=reused model={} existing={existing}",
                            model.name()
                        );
                        Ok(InsertOutcome {
                            id: existing,
                            created: false,
                        })
                    }
                };
            }
        }

        let id = Uuid::new_v4();
        let now = encode_timestamp(OffsetDateTime::now_utc())?;
        let column_list = model
            .fields()
            .iter()
            .map(|def| format!(", \"{}\"", model.column(&def.name)))
            .collect::<String>();
        let slots = ", ?".repeat(model.fields().len());
        let mut row_params = vec![
            SqlValue::Text(id.to_string()),
            SqlValue::Text(fingerprint),
            SqlValue::Text(now.clone()),
            SqlValue::Text(now),
        ];
        row_params.extend(stored.iter().map(|stored| stored.column.clone()));
        self.conn.execute(
            &format!(
                "INSERT INTO \"{}\" (uuid, fingerprint, created_at, updated_at{column_list}) VALUES (?, ?, ?, ?{slots});",
                model.table()
            ),
            params_from_iter(row_params),
        )?;
        let rowid = self.conn.last_insert_rowid();
        self.write_sequences(model, rowid, &pairs)?;
        self.refresh_search_index(model, id)?;
        savepoint.commit()?;

        debug!(
            "event=item_insert module=repo status=ok outcome=created model={} id={id}",
            model.name()
        );
        Ok(InsertOutcome { id, created: true })
    }

    fn get(&self, model: &RegisteredModel, id: ItemId) -> StoreResult<Modelitem> {
        self.load_by_uuid(model, id)?
            .map(|(_, item)| item)
            .ok_or_else(|| {
                NotFound::Item {
                    model: model.name().to_string(),
                    id,
                }
                .into()
            })
    }

    fn update(&self, model: &RegisteredModel, id: ItemId, mut values: FieldValues) -> StoreResult<()> {
        reject_unknown_fields(model, &values)?;
        let savepoint = Savepoint::begin(self.conn, "item_update")?;
        let (rowid, current) = self.load_by_uuid(model, id)?.ok_or_else(|| NotFound::Item {
            model: model.name().to_string(),
            id,
        })?;

        let mut stored = Vec::with_capacity(model.fields().len());
        let mut changed = Vec::new();
        for def in model.fields() {
            match values.remove(&def.name) {
                Some(value) => {
                    stored.push(self.prepare_field(def, value)?);
                    changed.push(stored.len() - 1);
                }
                None => stored.push(encode(def, current.field(&def.name))?),
            }
        }
        let pairs = model.fields().iter().zip(&stored).collect::<Vec<_>>();
        let named = pairs
            .iter()
            .map(|(def, stored)| (def.name.as_str(), *stored))
            .collect::<Vec<_>>();

        let mut assignments = String::from("fingerprint = ?, updated_at = ?");
        let mut row_params = vec![
            SqlValue::Text(fingerprint(model.definition(), &named)),
            SqlValue::Text(encode_timestamp(OffsetDateTime::now_utc())?),
        ];
        for &position in &changed {
            let (def, stored) = pairs[position];
            assignments.push_str(&format!(", \"{}\" = ?", model.column(&def.name)));
            row_params.push(stored.column.clone());
        }
        row_params.push(SqlValue::Integer(rowid));
        self.conn.execute(
            &format!(
                "UPDATE \"{}\" SET {assignments} WHERE id = ?;",
                model.table()
            ),
            params_from_iter(row_params),
        )?;
        let changed_pairs = changed.iter().map(|&position| pairs[position]).collect::<Vec<_>>();
        self.write_sequences(model, rowid, &changed_pairs)?;
        self.refresh_search_index(model, id)?;
        savepoint.commit()?;

        debug!(
            "event=item_update module=repo status=ok model={} id={id} fields={}",
            model.name(),
            changed.len()
        );
        Ok(())
    }

    fn count(&self, model: &RegisteredModel, predicate: &Predicate) -> StoreResult<u64> {
        let compiled = compile(model, predicate)?;
        let count: i64 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM \"{}\" t WHERE {};",
                model.table(),
                compiled.sql
            ),
            params_from_iter(compiled.params),
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn exists(&self, model: &RegisteredModel, id: ItemId) -> StoreResult<bool> {
        let exists: i64 = self.conn.query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM \"{}\" WHERE uuid = ?1);",
                model.table()
            ),
            [id.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }
}

fn known_field<'m>(model: &'m RegisteredModel, field: &str) -> Result<&'m FieldDefinition, ValidationError> {
    model.field(field).ok_or_else(|| ValidationError::UnknownField {
        model: model.name().to_string(),
        field: field.to_string(),
    })
}

fn reject_unknown_fields(model: &RegisteredModel, values: &FieldValues) -> Result<(), ValidationError> {
    match values.names().find(|name| model.field(name).is_none()) {
        Some(name) => Err(ValidationError::UnknownField {
            model: model.name().to_string(),
            field: name.to_string(),
        }),
        None => Ok(()),
    }
}

fn parse_uuid(raw: &str) -> Result<ItemId, CodecError> {
    Uuid::parse_str(raw).map_err(|err| CodecError::Malformed {
        field: "uuid".to_string(),
        message: err.to_string(),
    })
}
