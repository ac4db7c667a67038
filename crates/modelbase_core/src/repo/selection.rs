//! Lazy, restartable item sequences.

use super::item_repo::SqliteItemRepository;
use super::predicate::CompiledPredicate;
use crate::error::StoreResult;
use crate::model::{ItemId, Modelitem};
use crate::schema::RegisteredModel;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Row};
use std::collections::VecDeque;

/// Undecoded main-table row.
pub(crate) struct RawRow {
    pub rowid: i64,
    pub uuid: String,
    pub created_at: String,
    pub updated_at: String,
    pub columns: Vec<SqlValue>,
}

impl RawRow {
    /// Reads the leading `id, uuid, created_at, updated_at` plus `fields` columns.
    pub fn read(row: &Row<'_>, fields: usize) -> rusqlite::Result<Self> {
        let mut columns = Vec::with_capacity(fields);
        for index in 0..fields {
            columns.push(row.get::<_, SqlValue>(index + 4)?);
        }
        Ok(Self {
            rowid: row.get(0)?,
            uuid: row.get(1)?,
            created_at: row.get(2)?,
            updated_at: row.get(3)?,
            columns,
        })
    }
}

/// Items of one model matching a predicate, fetched page by page in rowid order.
///
/// Each [`ItemSelection::iter`] call starts again from the first row, so the
/// same selection can be walked many times.
#[derive(Clone)]
pub struct ItemSelection<'conn> {
    repo: SqliteItemRepository<'conn>,
    model: RegisteredModel,
    filter: CompiledPredicate,
    unmarked_for: Option<String>,
}

impl<'conn> ItemSelection<'conn> {
    pub(crate) fn new(
        repo: SqliteItemRepository<'conn>,
        model: RegisteredModel,
        filter: CompiledPredicate,
        unmarked_for: Option<String>,
    ) -> Self {
        Self {
            repo,
            model,
            filter,
            unmarked_for,
        }
    }

    pub fn model(&self) -> &RegisteredModel {
        &self.model
    }

    pub fn iter(&self) -> ItemIter<'conn> {
        ItemIter {
            selection: self.clone(),
            after: 0,
            page: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn count(&self) -> StoreResult<u64> {
        let (sql, params) = self.query("COUNT(*)", None);
        let count: i64 = self
            .repo
            .conn()
            .query_row(&sql, params_from_iter(params), |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Identities of every selected item, in rowid order.
    pub fn ids(&self) -> StoreResult<Vec<ItemId>> {
        self.iter().map(|item| item.map(|item| item.id)).collect()
    }

    fn query(&self, projection: &str, page: Option<(i64, usize)>) -> (String, Vec<SqlValue>) {
        let mut sql = format!(
            "{} WHERE ({})",
            if projection == "*" {
                SqliteItemRepository::select_sql(&self.model)
            } else {
                format!("SELECT {projection} FROM \"{}\" t", self.model.table())
            },
            self.filter.sql
        );
        let mut params = self.filter.params.clone();
        if let Some(stage) = &self.unmarked_for {
            sql.push_str(
                " AND NOT EXISTS (SELECT 1 FROM _pipeline_markers pm \
                 WHERE pm.stage = ? AND pm.model = ? AND pm.item_uuid = t.uuid)",
            );
            params.push(SqlValue::Text(stage.clone()));
            params.push(SqlValue::Text(self.model.name().to_string()));
        }
        if let Some((after, limit)) = page {
            sql.push_str(" AND t.id > ? ORDER BY t.id LIMIT ?");
            params.push(SqlValue::Integer(after));
            params.push(SqlValue::Integer(limit as i64));
        }
        (sql, params)
    }

    fn fetch_page(&self, after: i64) -> StoreResult<Vec<RawRow>> {
        let page_size = self.repo.config().page_size.max(1);
        let (sql, params) = self.query("*", Some((after, page_size)));
        let fields = self.model.fields().len();
        let mut stmt = self.repo.conn().prepare_cached(&sql)?;
        let rows = stmt.query_map(params_from_iter(params), |row| RawRow::read(row, fields))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

/// Iterator over an [`ItemSelection`]; yields decoding or storage errors inline.
pub struct ItemIter<'conn> {
    selection: ItemSelection<'conn>,
    after: i64,
    page: VecDeque<Modelitem>,
    exhausted: bool,
}

impl ItemIter<'_> {
    fn refill(&mut self) -> StoreResult<()> {
        let rows = self.selection.fetch_page(self.after)?;
        let page_size = self.selection.repo.config().page_size.max(1);
        if rows.len() < page_size {
            self.exhausted = true;
        }
        for raw in rows {
            self.after = raw.rowid;
            let item = self.selection.repo.decode_row(&self.selection.model, raw)?;
            self.page.push_back(item);
        }
        Ok(())
    }
}

impl Iterator for ItemIter<'_> {
    type Item = StoreResult<Modelitem>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.exhausted {
            if let Err(err) = self.refill() {
                self.exhausted = true;
                self.page.clear();
                return Some(Err(err));
            }
        }
        self.page.pop_front().map(Ok)
    }
}
