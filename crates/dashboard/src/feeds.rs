//! Polled endpoints and how their payloads decode into records.

use crate::api::{HISTORICAL_DATA_PATH, STATUS_PATH, TOKEN_EVENTS_PATH, WALLET_ALERTS_PATH};
use crate::error::SyncError;
use crate::normalize::normalize_as;
use common::types::{EventRecord, StatusRecord};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;

/// A backend endpoint a [`crate::poller::Poller`] can keep mirrored.
pub trait Feed: Send + Sync + 'static {
    type Record: Clone + Send + Sync + 'static;

    /// Low-cardinality label used in logs and metrics.
    fn name(&self) -> &'static str;

    fn path(&self) -> &'static str;

    /// Whether the view's filter is sent with each request.
    fn uses_filters(&self) -> bool {
        true
    }

    fn decode(&self, payload: Value) -> Result<Vec<Self::Record>, SyncError>;
}

/// A list endpoint whose envelope is reconciled by [`normalize_as`].
pub struct ListFeed<R> {
    name: &'static str,
    path: &'static str,
    filtered: bool,
    _record: PhantomData<fn() -> R>,
}

impl<R> ListFeed<R> {
    pub fn new(name: &'static str, path: &'static str, filtered: bool) -> Self {
        Self {
            name,
            path,
            filtered,
            _record: PhantomData,
        }
    }
}

impl ListFeed<EventRecord> {
    /// Recent launch events.
    pub fn token_events() -> Self {
        Self::new("token_events", TOKEN_EVENTS_PATH, true)
    }

    pub fn historical() -> Self {
        Self::new("historical_data", HISTORICAL_DATA_PATH, true)
    }
}

impl ListFeed<String> {
    /// Plain-text alerts for watched wallets. The endpoint takes no filters.
    pub fn wallet_alerts() -> Self {
        Self::new("wallet_alerts", WALLET_ALERTS_PATH, false)
    }
}

impl<R> Feed for ListFeed<R>
where
    R: DeserializeOwned + Clone + Send + Sync + 'static,
{
    type Record = R;

    fn name(&self) -> &'static str {
        self.name
    }

    fn path(&self) -> &'static str {
        self.path
    }

    fn uses_filters(&self) -> bool {
        self.filtered
    }

    fn decode(&self, payload: Value) -> Result<Vec<R>, SyncError> {
        Ok(normalize_as(payload))
    }
}

/// Backend health line, `{"status": "..."}`.
pub struct StatusFeed;

impl Feed for StatusFeed {
    type Record = StatusRecord;

    fn name(&self) -> &'static str {
        "status"
    }

    fn path(&self) -> &'static str {
        STATUS_PATH
    }

    fn uses_filters(&self) -> bool {
        false
    }

    fn decode(&self, payload: Value) -> Result<Vec<StatusRecord>, SyncError> {
        serde_json::from_value::<StatusRecord>(payload)
            .map(|s| vec![s])
            .map_err(|e| SyncError::Shape(format!("status payload: {e}")))
    }
}
