//! Store error type

/// Errors from repository and storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Collection has not been registered
    #[error("collection not registered: {0}")]
    CollectionNotFound(String),

    /// A record with this id already exists
    #[error("duplicate id {id} in collection {collection}")]
    DuplicateId { collection: String, id: String },

    /// The record is not usable (for example, not a JSON object)
    #[error("invalid record for collection {collection}: {reason}")]
    InvalidRecord { collection: String, reason: String },
}
