//! Insert policies derived from `implicit_dedup` / `fail_on_dup`.

/// The four insert behaviours a model can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupPolicy {
    /// Every insert creates a new identity.
    Plain,
    /// Matching content resolves to the existing identity.
    Reuse,
    /// Matching content is a duplicate error.
    Reject,
    /// Caller inserts of matching content fail; derived inserts reuse and log.
    ReuseDerived,
}

/// Who is inserting: a caller directly, or a pipeline transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOrigin {
    Caller,
    Derived,
}

/// What the object store does for one insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupAction {
    InsertNew,
    ReuseExisting,
    RejectDuplicate,
    ReuseAndReport,
}

impl DedupPolicy {
    pub fn from_flags(implicit_dedup: bool, fail_on_dup: bool) -> Self {
        match (implicit_dedup, fail_on_dup) {
            (false, false) => Self::Plain,
            (true, false) => Self::Reuse,
            (false, true) => Self::Reject,
            (true, true) => Self::ReuseDerived,
        }
    }

    /// Action taken when content already exists; `InsertNew` means no lookup is needed.
    pub fn action(self, origin: InsertOrigin) -> DedupAction {
        match (self, origin) {
            (Self::Plain, _) => DedupAction::InsertNew,
            (Self::Reuse, _) => DedupAction::ReuseExisting,
            (Self::Reject, _) | (Self::ReuseDerived, InsertOrigin::Caller) => {
                DedupAction::RejectDuplicate
            }
            (Self::ReuseDerived, InsertOrigin::Derived) => DedupAction::ReuseAndReport,
        }
    }
}
