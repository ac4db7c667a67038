//! Free-text search over string, bytes and blob fields.
//!
//! # Responsibility
//! - Validate literal byte queries and `*`-separated multi-term queries.
//! - Run either a substring scan over stored items or an index-assisted
//!   search whose candidates are verified by the same scanner.
//! - Report either every hit or only the matching items.
//!
//! # Invariants
//! - Both strategies report the same set of matches for the same store and query.
//! - Blob contents are streamed, never loaded whole.

pub(crate) mod index;
mod results;
mod scan;

pub use index::IndexStats;
pub use results::{ItemHits, SearchIter, SearchResults};
pub use scan::{Hit, Scanner};

use crate::config::SearchConfig;
use crate::error::StoreResult;
use crate::model::ItemId;
use crate::repo::SqliteItemRepository;
use crate::schema::{RegisteredModel, SchemaRegistry};
use log::debug;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors for search query and index operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    /// Query is empty, too long, or otherwise unusable.
    InvalidQuery { reason: String },
    /// Indexed search was requested before the index was built.
    IndexNotEnabled,
}

impl Display for SearchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidQuery { reason } => write!(f, "invalid search query: {reason}"),
            Self::IndexNotEnabled => write!(f, "search index is not enabled"),
        }
    }
}

impl Error for SearchError {}

/// How matching items are located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchStrategy {
    /// Reads every searchable value of the models in scope.
    #[default]
    Scan,
    /// Selects candidates through the trigram index, then verifies them.
    Indexed,
}

impl SearchStrategy {
    fn label(self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Indexed => "indexed",
        }
    }
}

/// Default upper bound on the length of a multi-term hit.
pub const DEFAULT_HIT_SPAN: usize = 4096;
/// Largest accepted hit span.
pub const MAX_HIT_SPAN: usize = 16384;

/// Case-sensitive search request for one literal or several ordered terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    terms: Vec<Vec<u8>>,
    max_span: usize,
    strategy: SearchStrategy,
    models: Option<Vec<String>>,
    items_only: bool,
}

impl SearchQuery {
    pub fn new(needle: impl Into<Vec<u8>>) -> Self {
        Self::all_of([needle])
    }

    /// Terms that must occur in this order inside one value, with the whole
    /// hit no longer than [`SearchQuery::max_span`].
    pub fn all_of<I, T>(terms: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Vec<u8>>,
    {
        Self {
            terms: terms.into_iter().map(Into::into).collect(),
            max_span: DEFAULT_HIT_SPAN,
            strategy: SearchStrategy::Scan,
            models: None,
            items_only: false,
        }
    }

    /// Splits `pattern` on `*`; empty parts are dropped.
    pub fn from_pattern(pattern: &str) -> Self {
        Self::all_of(
            pattern
                .split('*')
                .filter(|part| !part.is_empty())
                .map(str::as_bytes),
        )
    }

    /// Upper bound on the length of a multi-term hit; a single literal
    /// ignores it.
    pub fn max_span(mut self, max_span: usize) -> Self {
        self.max_span = max_span;
        self
    }

    /// Report one hit per matching item instead of every hit.
    pub fn items_only(mut self) -> Self {
        self.items_only = true;
        self
    }

    pub fn strategy(mut self, strategy: SearchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn indexed(self) -> Self {
        self.strategy(SearchStrategy::Indexed)
    }

    /// Restricts the search to `model`; may be called repeatedly.
    pub fn in_model(mut self, model: impl Into<String>) -> Self {
        self.models.get_or_insert_with(Vec::new).push(model.into());
        self
    }

    pub fn terms(&self) -> &[Vec<u8>] {
        &self.terms
    }

    pub fn reports_items_only(&self) -> bool {
        self.items_only
    }

    pub fn selected_strategy(&self) -> SearchStrategy {
        self.strategy
    }
}

/// One occurrence of the query inside a stored value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SearchMatch {
    pub model: String,
    pub item_id: ItemId,
    pub field: String,
    /// Position inside a sequence field; `None` for scalar fields.
    pub element: Option<usize>,
    /// Byte offset inside the value.
    pub offset: u64,
    pub length: usize,
    /// The matched bytes; for a multi-term hit this includes the gaps.
    pub bytes: Vec<u8>,
}

pub(crate) fn validate_query(query: &SearchQuery, config: &SearchConfig) -> Result<(), SearchError> {
    let invalid = |reason: String| Err(SearchError::InvalidQuery { reason });
    if query.terms.is_empty() {
        return invalid("query is empty".to_string());
    }
    for term in &query.terms {
        if term.is_empty() {
            return invalid("query is empty".to_string());
        }
        if term.contains(&0) {
            return invalid("query contains a NUL byte".to_string());
        }
        if term.len() > config.max_query_len {
            return invalid(format!(
                "query is {} bytes, limit is {}",
                term.len(),
                config.max_query_len
            ));
        }
    }
    if query.terms.len() > 1 {
        if query.max_span > MAX_HIT_SPAN {
            return invalid(format!(
                "hit span {} exceeds {MAX_HIT_SPAN}",
                query.max_span
            ));
        }
        let total = query.terms.iter().map(Vec::len).sum::<usize>();
        if total > query.max_span {
            return invalid(format!(
                "terms need {total} bytes, hit span is {}",
                query.max_span
            ));
        }
    }
    Ok(())
}

/// Validates `query` and prepares a restartable result sequence.
///
/// # Errors
/// - `SearchError::InvalidQuery` for unusable queries.
/// - `SearchError::IndexNotEnabled` for indexed search without an index.
/// - `NotFound` when the query names an unregistered model.
pub(crate) fn prepare<'conn>(
    repo: SqliteItemRepository<'conn>,
    registry: &SchemaRegistry,
    query: &SearchQuery,
) -> StoreResult<SearchResults<'conn>> {
    let config = &repo.config().search;
    validate_query(query, config)?;
    let scanner = match query.terms.as_slice() {
        [needle] => Scanner::new(needle),
        terms => Scanner::spanning(terms, query.max_span),
    }
    .ok_or_else(|| SearchError::InvalidQuery {
        reason: "query cannot be compiled".to_string(),
    })?;

    if query.strategy == SearchStrategy::Indexed && !index::is_enabled(repo.conn())? {
        return Err(SearchError::IndexNotEnabled.into());
    }

    let scope = match &query.models {
        Some(names) => names
            .iter()
            .map(|name| registry.lookup(name))
            .collect::<StoreResult<Vec<_>>>()?,
        None => registry.models().cloned().collect(),
    };
    let scope = scope
        .into_iter()
        .filter(has_searchable_fields)
        .collect::<Vec<RegisteredModel>>();

    let index_terms = match query.strategy {
        SearchStrategy::Indexed => trigram_terms(&query.terms),
        SearchStrategy::Scan => None,
    };
    debug!(
        "event=search module=search status=start strategy={} models={} terms={} items_only={} index_used={}",
        query.strategy.label(),
        scope.len(),
        query.terms.len(),
        query.items_only,
        index_terms.is_some()
    );
    Ok(SearchResults::new(
        repo,
        scope,
        scanner,
        index_terms,
        query.items_only,
    ))
}

pub(crate) fn has_searchable_fields(model: &RegisteredModel) -> bool {
    model
        .fields()
        .iter()
        .any(|field| field.field_type.is_searchable())
}

/// The index can only answer queries of at least one trigram.
fn trigram_query(needle: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(needle).ok()?;
    (text.chars().count() >= 3).then(|| text.to_string())
}

/// Terms the index can answer; `None` when none can, so the search scans.
fn trigram_terms(terms: &[Vec<u8>]) -> Option<Vec<String>> {
    let usable = terms
        .iter()
        .filter_map(|term| trigram_query(term))
        .collect::<Vec<_>>();
    (!usable.is_empty()).then_some(usable)
}
