//! Optional FTS5 trigram index over searchable field contents.
//!
//! # Invariants
//! - Every row covers at most `index_chunk_size` bytes of one value; adjacent
//!   rows of the same value overlap by `max_query_len - 1` bytes, so any
//!   occurrence of a valid query lies inside a single row.
//! - While the index table exists, item writes refresh the item's rows in the
//!   same savepoint.

use super::{has_searchable_fields, SearchError};
use crate::blob::{fill_buffer, BlobRepository, SqliteBlobStore};
use crate::codec::CodecError;
use crate::config::SearchConfig;
use crate::db::{table_exists, DbError, Savepoint};
use crate::error::StoreResult;
use crate::model::{FieldValue, ItemId, Modelitem, Value};
use crate::repo::{Predicate, SqliteItemRepository};
use crate::schema::SchemaRegistry;
use log::info;
use rusqlite::{params, Connection};
use std::io::Read;
use std::time::Instant;
use uuid::Uuid;

pub(crate) const INDEX_TABLE: &str = "_search_index";

/// Counts reported by an index build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexStats {
    pub items: u64,
    pub rows: u64,
}

pub(crate) fn is_enabled(conn: &Connection) -> StoreResult<bool> {
    Ok(table_exists(conn, INDEX_TABLE)?)
}

/// Drops and rebuilds the index from every stored item.
pub(crate) fn rebuild(
    repo: &SqliteItemRepository<'_>,
    registry: &SchemaRegistry,
) -> StoreResult<IndexStats> {
    let started_at = Instant::now();
    let conn = repo.conn();
    let savepoint = Savepoint::begin(conn, "search_index_build")?;
    create_table(conn)?;

    let blobs = repo.blobs();
    let config = &repo.config().search;
    let mut stats = IndexStats::default();
    for model in registry.models() {
        if !has_searchable_fields(model) {
            continue;
        }
        for item in repo.select(model, &Predicate::all())?.iter() {
            stats.rows += write_item_rows(conn, &blobs, config, &item?)?;
            stats.items += 1;
        }
    }
    savepoint.commit()?;

    info!(
        "event=search_index_build module=search status=ok items={} rows={} duration_ms={}",
        stats.items,
        stats.rows,
        started_at.elapsed().as_millis()
    );
    Ok(stats)
}

fn create_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {INDEX_TABLE};
         CREATE VIRTUAL TABLE {INDEX_TABLE} USING fts5(
             body,
             model UNINDEXED,
             item_uuid UNINDEXED,
             field UNINDEXED,
             tokenize = 'trigram case_sensitive 1'
         );"
    ))?;
    Ok(())
}

/// Replaces the index rows of one item.
pub(crate) fn refresh_item(
    conn: &Connection,
    blobs: &SqliteBlobStore<'_>,
    config: &SearchConfig,
    item: &Modelitem,
) -> StoreResult<()> {
    conn.execute(
        &format!("DELETE FROM {INDEX_TABLE} WHERE model = ?1 AND item_uuid = ?2;"),
        params![item.model, item.id.to_string()],
    )?;
    write_item_rows(conn, blobs, config, item)?;
    Ok(())
}

/// Items whose indexed text contains `query`, as `(model, id)` pairs.
///
/// `query` must hold at least three characters; shorter queries produce no
/// trigrams and would match nothing.
pub(crate) fn candidates(conn: &Connection, query: &str) -> StoreResult<Vec<(String, ItemId)>> {
    let phrase = escape_fts_phrase(query);
    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT model, item_uuid FROM {INDEX_TABLE} WHERE {INDEX_TABLE} MATCH ?1;"
    ))?;
    let rows = stmt
        .query_map([phrase.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(|err| map_query_error(err, query))?;

    let mut found = Vec::new();
    for row in rows {
        let (model, uuid) = row.map_err(|err| map_query_error(err, query))?;
        let id = Uuid::parse_str(&uuid).map_err(|err| CodecError::Malformed {
            field: "item_uuid".to_string(),
            message: format!("index row holds `{uuid}`: {err}"),
        })?;
        found.push((model, id));
    }
    Ok(found)
}

fn write_item_rows(
    conn: &Connection,
    blobs: &SqliteBlobStore<'_>,
    config: &SearchConfig,
    item: &Modelitem,
) -> StoreResult<u64> {
    let mut insert = conn.prepare_cached(&format!(
        "INSERT INTO {INDEX_TABLE} (body, model, item_uuid, field) VALUES (?1, ?2, ?3, ?4);"
    ))?;
    let uuid = item.id.to_string();
    let mut rows = 0;
    let mut emit = |field: &str, chunk: &[u8]| -> StoreResult<()> {
        insert.execute(params![index_text(chunk), item.model, uuid, field])?;
        rows += 1;
        Ok(())
    };

    for (field, value) in item.values.iter() {
        let elements = match value {
            FieldValue::Null => continue,
            FieldValue::One(value) => std::slice::from_ref(value),
            FieldValue::Many(values) => values.as_slice(),
        };
        for element in elements {
            match element {
                Value::String(text) => {
                    chunk_stream(&mut text.as_bytes(), config, |chunk| emit(field, chunk))?
                }
                Value::Bytes(bytes) => {
                    chunk_stream(&mut bytes.as_slice(), config, |chunk| emit(field, chunk))?
                }
                Value::Blob(hash) => {
                    let mut reader = blobs.open(hash)?;
                    chunk_stream(&mut reader, config, |chunk| emit(field, chunk))?
                }
                _ => {}
            }
        }
    }
    Ok(rows)
}

/// Cuts a stream into overlapping windows without holding more than one window.
fn chunk_stream(
    reader: &mut dyn Read,
    config: &SearchConfig,
    mut emit: impl FnMut(&[u8]) -> StoreResult<()>,
) -> StoreResult<()> {
    let chunk_size = config.index_chunk_size.max(1);
    let overlap = config.max_query_len.saturating_sub(1).min(chunk_size - 1);
    let mut window = Vec::with_capacity(chunk_size);
    let mut fresh = vec![0_u8; chunk_size];

    loop {
        let wanted = chunk_size - window.len();
        let read = fill_buffer(reader, &mut fresh[..wanted]).map_err(DbError::Io)?;
        if read == 0 {
            break;
        }
        window.extend_from_slice(&fresh[..read]);
        emit(&window)?;
        if read < wanted {
            break;
        }
        window.drain(..window.len() - overlap);
    }
    Ok(())
}

/// FTS5 text cannot carry NUL; lossy decoding keeps valid UTF-8 runs intact.
fn index_text(chunk: &[u8]) -> String {
    String::from_utf8_lossy(chunk).replace('\0', "\u{FFFD}")
}

fn escape_fts_phrase(raw: &str) -> String {
    format!("\"{}\"", raw.replace('"', "\"\""))
}

fn map_query_error(err: rusqlite::Error, query: &str) -> crate::error::StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(_, Some(message))
            if message.to_lowercase().contains("fts5") =>
        {
            SearchError::InvalidQuery {
                reason: format!("index rejected query of {} bytes: {message}", query.len()),
            }
            .into()
        }
        _ => err.into(),
    }
}
