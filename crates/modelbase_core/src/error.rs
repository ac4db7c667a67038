//! Store-level error umbrella.
//!
//! Layer errors convert into [`StoreError`] with `?`; [`StoreError::kind`]
//! reduces any failure to the category callers branch on.

use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::db::DbError;
use crate::model::{BlobHash, ItemId, ValidationError};
use crate::schema::SchemaError;
use crate::search::SearchError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

/// What could not be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFound {
    Model(String),
    Item { model: String, id: ItemId },
    Blob(BlobHash),
}

impl Display for NotFound {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Model(name) => write!(f, "model `{name}` is not registered"),
            Self::Item { model, id } => write!(f, "`{model}` item {id} does not exist"),
            Self::Blob(hash) => write!(f, "blob {hash} does not exist"),
        }
    }
}

/// Failure category, stable across variants' payload changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SchemaError,
    ValidationError,
    DuplicateError,
    NotFound,
    CodecError,
    StorageError,
    SearchError,
    ConfigError,
}

#[derive(Debug)]
pub enum StoreError {
    Schema(SchemaError),
    Validation(ValidationError),
    /// Insert rejected by `fail_on_dup`; `existing` is the matching item.
    Duplicate { model: String, existing: ItemId },
    NotFound(NotFound),
    Codec(CodecError),
    Storage(DbError),
    Search(SearchError),
    Config(ConfigError),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Schema(_) => ErrorKind::SchemaError,
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::Duplicate { .. } => ErrorKind::DuplicateError,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Codec(_) => ErrorKind::CodecError,
            Self::Storage(_) => ErrorKind::StorageError,
            Self::Search(_) => ErrorKind::SearchError,
            Self::Config(_) => ErrorKind::ConfigError,
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Schema(err) => write!(f, "schema error: {err}"),
            Self::Validation(err) => write!(f, "validation error: {err}"),
            Self::Duplicate { model, existing } => write!(
                f,
                "duplicate `{model}` content; existing item {existing}"
            ),
            Self::NotFound(what) => write!(f, "not found: {what}"),
            Self::Codec(err) => write!(f, "codec error: {err}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
            Self::Search(err) => write!(f, "search error: {err}"),
            Self::Config(err) => write!(f, "config error: {err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Schema(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::Codec(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::Search(err) => Some(err),
            Self::Config(err) => Some(err),
            Self::Duplicate { .. } | Self::NotFound(_) => None,
        }
    }
}

impl From<SchemaError> for StoreError {
    fn from(value: SchemaError) -> Self {
        Self::Schema(value)
    }
}

impl From<ValidationError> for StoreError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<NotFound> for StoreError {
    fn from(value: NotFound) -> Self {
        Self::NotFound(value)
    }
}

impl From<CodecError> for StoreError {
    fn from(value: CodecError) -> Self {
        Self::Codec(value)
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Storage(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(DbError::Sqlite(value))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Storage(DbError::Io(value))
    }
}

impl From<SearchError> for StoreError {
    fn from(value: SearchError) -> Self {
        Self::Search(value)
    }
}

impl From<ConfigError> for StoreError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}
