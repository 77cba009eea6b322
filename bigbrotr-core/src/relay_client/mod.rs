//! `RelayClient`: the Nostr wire-protocol collaborator.
//!
//! Uses a scoped-acquisition model rather than a boolean connected/
//! disconnected flag: `open()` returns an owned connection that is
//! guaranteed closed on every exit path (including `Drop`), and there is no
//! connection-state flag exposed to callers — `sync()` never has to ask
//! "is this still open?", it simply uses the handle until it drops it.

pub mod ws;

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::types::Event;

/// A single subscription filter, restricted to the fields the sync engine
/// and monitor probe actually need.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<u32>,
    pub kinds: Option<Vec<u32>>,
    pub authors: Option<Vec<String>>,
    pub ids: Option<Vec<String>>,
}

/// A single message read from a relay subscription.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    Event(Event),
    EndOfStoredEvents,
    Notice(String),
    Ok { event_id: String, accepted: bool, message: String },
    Closed(String),
}

/// An open connection to one relay. Dropping it closes the underlying
/// socket; there is no separate `close()` callers must remember to invoke,
/// and no `is_connected()` flag to go stale.
#[async_trait]
pub trait RelayConnection: Send {
    /// Subscribe with `filter`, returning a stream of messages until the
    /// relay sends `EOSE`/`CLOSED` or the stream is dropped.
    async fn subscribe(&mut self, filter: Filter) -> Result<BoxStream<'_, RelayMessage>, RelayClientError>;

    /// Publish a signed event and wait for the relay's `OK`/`NOTICE` reply.
    async fn publish(&mut self, event: &Event) -> Result<RelayMessage, RelayClientError>;
}

#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Open a connection to `relay_url`, bounded by `timeout`. The returned
    /// connection owns the socket for its entire lifetime.
    async fn open(
        &self,
        relay_url: &str,
        timeout: Duration,
    ) -> Result<Box<dyn RelayConnection>, RelayClientError>;

    /// Fetch the relay's NIP-11 information document, if any.
    async fn fetch_nip11(
        &self,
        relay_url: &str,
        timeout: Duration,
    ) -> Result<Option<crate::types::Nip11Doc>, RelayClientError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RelayClientError {
    #[error("connection timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("relay url rejected: {0}")]
    UnsafeUrl(#[from] crate::url_safety::UrlSafetyError),
}
