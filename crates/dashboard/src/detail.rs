//! On-demand token detail for the currently selected record.

use crate::api::{token_detail_path, ApiClient, ApiRequest, Transport};
use crate::error::SyncError;
use crate::session::SessionReader;
use common::types::{DetailRecord, EventRecord};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub enum DetailState {
    #[default]
    Empty,
    Loading,
    Ready(Arc<DetailRecord>),
    NotFound,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailPane {
    pub key: Option<String>,
    pub state: DetailState,
    generation: u64,
}

/// Fetches `/api/token/{key}`. Any non-2xx reply means the backend has no
/// detail for `key`.
pub async fn fetch_detail<T: Transport>(
    api: &ApiClient<T>,
    key: &str,
    bearer: Option<String>,
) -> Result<DetailRecord, SyncError> {
    let request = ApiRequest::get("token_detail", token_detail_path(key)).with_bearer(bearer);
    let resp = api.send(request).await?;
    if !resp.is_success() {
        return Err(SyncError::NotFound(key.to_string()));
    }
    let body = resp.into_json()?;
    serde_json::from_value(body).map_err(|e| SyncError::Shape(format!("token detail: {e}")))
}

/// Tracks one selection at a time. Only the most recent selection's result
/// is ever shown.
pub struct DetailFetcher<T> {
    api: ApiClient<T>,
    session: SessionReader,
    pane: Arc<watch::Sender<DetailPane>>,
}

impl<T: Transport> DetailFetcher<T> {
    pub fn new(api: ApiClient<T>, session: SessionReader) -> Self {
        let (pane, _) = watch::channel(DetailPane::default());
        Self {
            api,
            session,
            pane: Arc::new(pane),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DetailPane> {
        self.pane.subscribe()
    }

    pub fn current(&self) -> DetailPane {
        self.pane.borrow().clone()
    }

    /// Selecting the key already shown is a no-op. A record with no usable
    /// key clears the pane without a request.
    pub fn select(&self, record: Option<&EventRecord>) {
        let key = record.and_then(EventRecord::selection_key).map(str::to_string);
        let Some(key) = key else {
            self.clear();
            return;
        };
        if self.pane.borrow().key.as_deref() == Some(key.as_str()) {
            return;
        }
        self.load(key);
    }

    /// Re-fetches the current selection, if any. This is the retry path for
    /// a pane left in `Loading` by a transport fault.
    pub fn refresh(&self) {
        let key = self.pane.borrow().key.clone();
        if let Some(key) = key {
            self.load(key);
        }
    }

    pub fn clear(&self) {
        self.pane.send_modify(|p| {
            p.generation += 1;
            p.key = None;
            p.state = DetailState::Empty;
        });
    }

    fn load(&self, key: String) {
        let mut generation = 0;
        self.pane.send_modify(|p| {
            p.generation += 1;
            generation = p.generation;
            p.key = Some(key.clone());
            p.state = DetailState::Loading;
        });

        let api = self.api.clone();
        let bearer = self.session.bearer();
        let pane = Arc::clone(&self.pane);
        tokio::spawn(async move {
            let next = match fetch_detail(&api, &key, bearer).await {
                Ok(detail) => Some(DetailState::Ready(Arc::new(detail))),
                Err(SyncError::NotFound(_)) => Some(DetailState::NotFound),
                Err(e) => {
                    warn!(key = %key, error = %e, "token detail fetch failed");
                    None
                }
            };
            let outcome = match next {
                None => "failed",
                Some(state) => {
                    let label = match state {
                        DetailState::NotFound => "not_found",
                        _ => "ready",
                    };
                    let applied = pane.send_if_modified(|p| {
                        if p.generation != generation {
                            return false;
                        }
                        p.state = state;
                        true
                    });
                    if applied {
                        label
                    } else {
                        debug!(key = %key, "selection changed, dropping detail");
                        "superseded"
                    }
                }
            };
            metrics::counter!("dashboard_detail_fetches_total", "outcome" => outcome).increment(1);
        });
    }
}

impl<T> Drop for DetailFetcher<T> {
    fn drop(&mut self) {
        self.pane.send_modify(|p| p.generation += 1);
    }
}
