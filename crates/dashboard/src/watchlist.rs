use crate::api::{
    ApiClient, ApiRequest, Transport, WATCHLIST_ADD_PATH, WATCHLIST_PATH, WATCHLIST_REMOVE_PATH,
};
use crate::error::SyncError;
use crate::normalize::normalize_as;
use crate::session::SessionReader;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchlistState {
    /// Exactly as last returned by the backend.
    pub addresses: Vec<String>,
    /// Display text of the last failed operation; cleared by the next success.
    pub fault: Option<String>,
    pub busy: bool,
}

/// Reads and edits the watched-wallet list. The backend's reply is
/// authoritative: every success replaces the local list with it.
pub struct WatchlistController<T> {
    api: ApiClient<T>,
    session: SessionReader,
    state: watch::Sender<WatchlistState>,
}

impl<T: Transport> WatchlistController<T> {
    pub fn new(api: ApiClient<T>, session: SessionReader) -> Self {
        let (state, _) = watch::channel(WatchlistState::default());
        Self {
            api,
            session,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<WatchlistState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> WatchlistState {
        self.state.borrow().clone()
    }

    pub async fn list(&self) -> Result<Vec<String>, SyncError> {
        self.run("watchlist", ApiRequest::get("watchlist", WATCHLIST_PATH))
            .await
    }

    /// A blank address is ignored without contacting the backend.
    pub async fn add(&self, address: &str) -> Result<Vec<String>, SyncError> {
        let address = address.trim();
        if address.is_empty() {
            return Ok(self.state.borrow().addresses.clone());
        }
        let request = ApiRequest::post("watchlist_add", WATCHLIST_ADD_PATH)
            .with_query(vec![("address".to_string(), address.to_string())]);
        self.run("add", request).await
    }

    pub async fn remove(&self, address: &str) -> Result<Vec<String>, SyncError> {
        let address = address.trim();
        if address.is_empty() {
            return Ok(self.state.borrow().addresses.clone());
        }
        let request = ApiRequest::post("watchlist_remove", WATCHLIST_REMOVE_PATH)
            .with_query(vec![("address".to_string(), address.to_string())]);
        self.run("remove", request).await
    }

    async fn run(&self, op: &'static str, request: ApiRequest) -> Result<Vec<String>, SyncError> {
        self.state.send_modify(|s| s.busy = true);
        let result = self
            .api
            .json(request.with_bearer(self.session.bearer()))
            .await
            .map(normalize_as::<String>);

        match result {
            Ok(addresses) => {
                info!(op, count = addresses.len(), "watchlist updated");
                self.state.send_modify(|s| {
                    s.addresses.clone_from(&addresses);
                    s.fault = None;
                    s.busy = false;
                });
                Ok(addresses)
            }
            Err(e) => {
                warn!(op, error = %e, "watchlist operation failed");
                self.state.send_modify(|s| {
                    s.fault = Some(e.to_string());
                    s.busy = false;
                });
                Err(e)
            }
        }
    }
}
