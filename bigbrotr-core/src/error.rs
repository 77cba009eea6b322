//! Error kinds shared across the sync engine, store, monitor probe and finder.
//!
//! The taxonomy follows the handling policy each kind implies: transient DB
//! errors are retried at the store boundary, permanent DB errors and relay
//! misbehavior surface to the scheduler, invalid events are dropped and
//! counted, and config errors abort startup.

use thiserror::Error;

/// Errors surfaced by the [`crate::store::Store`] trait.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transient database error: {0}")]
    Transient(#[source] sqlx::Error),

    #[error("permanent database error: {0}")]
    Permanent(#[source] sqlx::Error),

    #[error("database pool acquire timed out after {0:?}")]
    AcquireTimeout(std::time::Duration),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Classify a raw `sqlx::Error` per the retry policy in the cross-cutting
    /// design: connection loss and serialization failures are transient,
    /// everything else (constraint violations, bad SQL, auth) is permanent.
    pub fn classify(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Transient(err)
            }
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("40001") => {
                // serialization_failure
                StoreError::Transient(err)
            }
            _ => StoreError::Permanent(err),
        }
    }

    /// Whether the caller is allowed to retry this error under the backoff
    /// policy.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_) | StoreError::AcquireTimeout(_))
    }
}

/// Reasons an event is rejected before insertion.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidEvent {
    #[error("event id {0} does not match its content hash")]
    IdMismatch(String),

    #[error("signature invalid for event {0}")]
    BadSignature(String),

    #[error("created_at {0} outside the accepted range")]
    TimestampOutOfRange(i64),

    #[error("kind {0} outside the accepted range [0, 65535]")]
    KindOutOfRange(u32),

    #[error("content exceeds the maximum accepted length ({0} bytes)")]
    ContentTooLarge(usize),

    #[error("tags are not an array of string arrays")]
    MalformedTags,
}

/// Errors from a single `sync()` call, scoped to one relay.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("relay timed out: {0}")]
    RelayTimeout(String),

    #[error("relay misbehaved: {0}")]
    RelayMisbehavior(String),
}

/// Errors from the monitor probe. Individual stage failures are not
/// modeled as errors — they become `false`/`null` fields on the snapshot —
/// this enum only covers failures that prevent producing a snapshot at all.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("probe deadline exceeded")]
    DeadlineExceeded,
}

/// Errors from the finder.
#[derive(Debug, Error)]
pub enum FinderError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("fetch of relay directory {url} failed: {source}")]
    Fetch {
        url: String,
        #[source]
        source: crate::http_fetcher::HttpFetchError,
    },
}

/// Fatal configuration errors that abort startup before any worker runs.
#[derive(Debug, Error)]
pub enum FatalConfigError {
    #[error("missing required configuration: {0}")]
    Missing(String),

    #[error("unparseable configuration: {0}")]
    Parse(String),
}
