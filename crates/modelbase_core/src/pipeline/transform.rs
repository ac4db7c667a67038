//! Contract between the derivation pipeline and transformation models.

use crate::model::{FieldValues, Modelitem};
use crate::repo::Predicate;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::{Read, Seek};

/// Seekable byte source handed to transforms.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek + ?Sized> ReadSeek for T {}

/// What a transform sees for one item.
pub struct TransformInput<'a> {
    pub item: &'a Modelitem,
    /// Contents of the transform's payload field, when it declares one and
    /// the item holds a blob there.
    pub payload: Option<&'a mut dyn ReadSeek>,
}

impl TransformInput<'_> {
    /// Reads the whole payload; empty when there is none.
    pub fn read_payload(&mut self) -> std::io::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        if let Some(payload) = self.payload.as_mut() {
            payload.read_to_end(&mut bytes)?;
        }
        Ok(bytes)
    }
}

/// A derived modelitem to insert into `model`.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertRequest {
    pub model: String,
    pub values: FieldValues,
}

/// Result of one successful transform call.
///
/// An empty output is a valid no-op: the item is still marked processed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformOutput {
    pub inserts: Vec<InsertRequest>,
    /// Field values replaced on the source item.
    pub update: Option<FieldValues>,
}

impl TransformOutput {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn insert(mut self, model: impl Into<String>, values: FieldValues) -> Self {
        self.inserts.push(InsertRequest {
            model: model.into(),
            values,
        });
        self
    }

    pub fn update(mut self, values: FieldValues) -> Self {
        self.update = Some(values);
        self
    }

    pub fn is_no_op(&self) -> bool {
        self.inserts.is_empty() && self.update.as_ref().map_or(true, FieldValues::is_empty)
    }
}

/// Reported per-item transform error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformFailure {
    message: String,
}

impl TransformFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for TransformFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for TransformFailure {}

impl From<std::io::Error> for TransformFailure {
    fn from(value: std::io::Error) -> Self {
        Self::new(format!("payload read failed: {value}"))
    }
}

/// A transformation model driven by the pipeline.
///
/// `transform` may run on worker threads, so implementations must be `Sync`.
pub trait Transform: Sync {
    /// Stable key under which processed markers are stored.
    fn name(&self) -> &str;

    fn source_model(&self) -> &str;

    /// Filter pushed into the storage query when scanning for work.
    fn candidates(&self) -> Predicate {
        Predicate::all()
    }

    /// Final in-process eligibility check on a candidate.
    fn is_eligible(&self, _item: &Modelitem) -> bool {
        true
    }

    /// Blob field whose size is the cost estimate and whose bytes become the payload.
    fn payload_field(&self) -> Option<&str> {
        None
    }

    fn transform(&self, input: TransformInput<'_>) -> Result<TransformOutput, TransformFailure>;
}
