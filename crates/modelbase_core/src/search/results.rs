//! Lazy search result sequences.

use super::index;
use super::scan::{Hit, Scanner};
use super::SearchMatch;
use crate::blob::{BlobRepository, SqliteBlobStore};
use crate::error::StoreResult;
use crate::model::{ItemId, Modelitem, Value};
use crate::repo::{ItemIter, ItemRepository, Predicate, SqliteItemRepository};
use crate::schema::RegisteredModel;
use log::debug;
use std::collections::{HashSet, VecDeque};

/// Matches of one query; each [`SearchResults::iter`] call searches again
/// from the start.
///
/// An items-only query yields the first hit of each matching item.
#[derive(Clone)]
pub struct SearchResults<'conn> {
    repo: SqliteItemRepository<'conn>,
    scope: Vec<RegisteredModel>,
    scanner: Scanner,
    index_terms: Option<Vec<String>>,
    items_only: bool,
}

impl<'conn> SearchResults<'conn> {
    pub(crate) fn new(
        repo: SqliteItemRepository<'conn>,
        scope: Vec<RegisteredModel>,
        scanner: Scanner,
        index_terms: Option<Vec<String>>,
        items_only: bool,
    ) -> Self {
        Self {
            repo,
            scope,
            scanner,
            index_terms,
            items_only,
        }
    }

    /// Whether candidates come from the index rather than a full scan.
    pub fn uses_index(&self) -> bool {
        self.index_terms.is_some()
    }

    pub fn iter(&self) -> SearchIter<'conn> {
        self.iter_with(self.items_only)
    }

    /// Distinct `(model, id)` pairs of matching items, reading each item only
    /// up to its first hit.
    pub fn items(&self) -> ItemHits<'conn> {
        ItemHits {
            inner: self.iter_with(true),
        }
    }

    fn iter_with(&self, first_only: bool) -> SearchIter<'conn> {
        let source = match &self.index_terms {
            Some(terms) => Source::Unresolved(terms.clone()),
            None => Source::Scan {
                models: self.scope.iter().cloned().collect(),
                current: None,
            },
        };
        SearchIter {
            results: self.clone(),
            first_only,
            source,
            pending: VecDeque::new(),
            reported: 0,
            done: false,
        }
    }

    /// Runs the search to completion.
    pub fn to_vec(&self) -> StoreResult<Vec<SearchMatch>> {
        self.iter().collect()
    }

    /// Hits of one item in field order; with `first_only`, at most one.
    fn match_item(
        &self,
        model: &RegisteredModel,
        item: &Modelitem,
        first_only: bool,
    ) -> StoreResult<Vec<SearchMatch>> {
        let blobs = SqliteBlobStore::new(self.repo.conn(), self.repo.config().blob_chunk_size);
        let buffer_size = self.repo.config().search.scan_buffer_size;
        let mut found = Vec::new();

        for def in model.fields().iter().filter(|def| def.field_type.is_searchable()) {
            for (position, value) in item.field(&def.name).values().iter().enumerate() {
                let mut hits: Vec<Hit> = match value {
                    Value::String(text) => self.scanner.hits(text.as_bytes()),
                    Value::Bytes(bytes) => self.scanner.hits(bytes),
                    Value::Blob(hash) if first_only => {
                        let mut reader = blobs.open(hash)?;
                        self.scanner
                            .first_in_reader(&mut reader, buffer_size)?
                            .into_iter()
                            .collect()
                    }
                    Value::Blob(hash) => {
                        let mut reader = blobs.open(hash)?;
                        self.scanner.scan_reader(&mut reader, buffer_size)?
                    }
                    _ => continue,
                };
                if first_only {
                    hits.truncate(1);
                }
                found.extend(hits.into_iter().map(|hit| SearchMatch {
                    model: model.name().to_string(),
                    item_id: item.id,
                    field: def.name.clone(),
                    element: def.sequence.then_some(position),
                    offset: hit.offset,
                    length: hit.bytes.len(),
                    bytes: hit.bytes,
                }));
                if first_only && !found.is_empty() {
                    return Ok(found);
                }
            }
        }
        Ok(found)
    }

    /// Items whose index rows hold every term, in the first term's order.
    fn index_candidates(&self, terms: &[String]) -> StoreResult<VecDeque<(RegisteredModel, ItemId)>> {
        let conn = self.repo.conn();
        let mut lists = Vec::with_capacity(terms.len());
        for term in terms {
            lists.push(index::candidates(conn, term)?);
        }
        let Some((first, rest)) = lists.split_first() else {
            return Ok(VecDeque::new());
        };
        let rest = rest
            .iter()
            .map(|list| list.iter().collect::<HashSet<_>>())
            .collect::<Vec<_>>();
        Ok(first
            .iter()
            .filter(|candidate| rest.iter().all(|set| set.contains(candidate)))
            .filter_map(|(name, id)| {
                self.scope
                    .iter()
                    .find(|model| model.name() == name.as_str())
                    .map(|model| (model.clone(), *id))
            })
            .collect())
    }
}

enum Source<'conn> {
    Scan {
        models: VecDeque<RegisteredModel>,
        current: Option<(RegisteredModel, ItemIter<'conn>)>,
    },
    /// Index terms not looked up yet.
    Unresolved(Vec<String>),
    Candidates(VecDeque<(RegisteredModel, ItemId)>),
}

/// Iterator over [`SearchResults`]; a storage error ends the sequence.
pub struct SearchIter<'conn> {
    results: SearchResults<'conn>,
    first_only: bool,
    source: Source<'conn>,
    pending: VecDeque<SearchMatch>,
    reported: u64,
    done: bool,
}

impl SearchIter<'_> {
    fn next_item(&mut self) -> StoreResult<Option<(RegisteredModel, Modelitem)>> {
        loop {
            match &mut self.source {
                Source::Unresolved(terms) => {
                    let candidates = self.results.index_candidates(terms)?;
                    self.source = Source::Candidates(candidates);
                }
                Source::Candidates(candidates) => {
                    let Some((model, id)) = candidates.pop_front() else {
                        return Ok(None);
                    };
                    let item = self.results.repo.get(&model, id)?;
                    return Ok(Some((model, item)));
                }
                Source::Scan { models, current } => {
                    if let Some((model, items)) = current {
                        if let Some(item) = items.next() {
                            return Ok(Some((model.clone(), item?)));
                        }
                    }
                    let Some(model) = models.pop_front() else {
                        return Ok(None);
                    };
                    let items = self.results.repo.select(&model, &Predicate::all())?.iter();
                    *current = Some((model, items));
                }
            }
        }
    }
}

impl Iterator for SearchIter<'_> {
    type Item = StoreResult<SearchMatch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(found) = self.pending.pop_front() {
                self.reported += 1;
                return Some(Ok(found));
            }
            if self.done {
                return None;
            }
            let step = self.next_item().and_then(|next| match next {
                Some((model, item)) => self
                    .results
                    .match_item(&model, &item, self.first_only)
                    .map(Some),
                None => Ok(None),
            });
            match step {
                Ok(Some(found)) => self.pending.extend(found),
                Ok(None) => {
                    self.done = true;
                    debug!(
                        "event=search module=search status=ok index_used={} matches={}",
                        self.results.uses_index(),
                        self.reported
                    );
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// Iterator over matching items of [`SearchResults::items`].
pub struct ItemHits<'conn> {
    inner: SearchIter<'conn>,
}

impl Iterator for ItemHits<'_> {
    type Item = StoreResult<(String, ItemId)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|found| found.map(|found| (found.model, found.item_id)))
    }
}
