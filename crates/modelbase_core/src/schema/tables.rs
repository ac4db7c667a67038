//! DDL for per-model storage.

use super::names::{column_for, sequence_table_for};
use super::SchemaError;
use crate::db::table_exists;
use crate::error::StoreResult;
use crate::model::ModelDefinition;
use rusqlite::Connection;

/// Creates the main table and one side table per sequence field.
///
/// Field columns are declared without a type so SQLite keeps each value's
/// storage class exactly as the codec wrote it.
pub(crate) fn create_model_tables(
    conn: &Connection,
    table: &str,
    definition: &ModelDefinition,
) -> StoreResult<()> {
    ensure_free(conn, &definition.name, table)?;

    let columns = definition
        .fields
        .iter()
        .map(|field| format!(",\n    \"{}\"", column_for(&field.name)))
        .collect::<String>();
    conn.execute_batch(&format!(
        "CREATE TABLE \"{table}\" (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    fingerprint TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL{columns}
);
CREATE INDEX \"{table}__fingerprint\" ON \"{table}\"(fingerprint);"
    ))?;

    for field in definition.fields.iter().filter(|field| field.sequence) {
        let side = sequence_table_for(table, &field.name);
        ensure_free(conn, &definition.name, &side)?;
        conn.execute_batch(&format!(
            "CREATE TABLE \"{side}\" (
    item_id INTEGER NOT NULL REFERENCES \"{table}\"(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    value,
    PRIMARY KEY (item_id, position)
) WITHOUT ROWID;
CREATE INDEX \"{side}__value\" ON \"{side}\"(value);"
        ))?;
    }
    Ok(())
}

fn ensure_free(conn: &Connection, model: &str, table: &str) -> StoreResult<()> {
    if table_exists(conn, table)? {
        return Err(SchemaError::TableNameCollision {
            model: model.to_string(),
            table: table.to_string(),
        }
        .into());
    }
    Ok(())
}
