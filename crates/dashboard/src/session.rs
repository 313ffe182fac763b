//! Credential lifecycle: login, registration, logout and profile resolution.
//!
//! [`SessionManager`] is the only reader and writer of the persisted
//! credential. Everything else gets a [`SessionReader`].

use crate::api::{ApiClient, ApiRequest, Transport, LOGIN_PATH, PROFILE_PATH, REGISTER_PATH};
use crate::error::SyncError;
use common::kv::KvStore;
use common::types::{Credentials, LoginResponse, ProfileResponse};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub token: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Anonymous,
    Authenticating,
    Authenticated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub session: Session,
    pub phase: SessionPhase,
}

impl SessionState {
    pub fn anonymous() -> Self {
        Self {
            session: Session::default(),
            phase: SessionPhase::Anonymous,
        }
    }

    fn from_token(token: Option<String>) -> Self {
        match token {
            Some(token) => Self {
                session: Session {
                    token: Some(token),
                    username: None,
                },
                phase: SessionPhase::Authenticated,
            },
            None => Self::anonymous(),
        }
    }
}

/// Read-only view of the current session.
#[derive(Clone)]
pub struct SessionReader {
    rx: watch::Receiver<SessionState>,
}

impl SessionReader {
    /// A reader that never authorizes requests.
    pub fn anonymous() -> Self {
        let (_, rx) = watch::channel(SessionState::anonymous());
        Self { rx }
    }

    /// A reader pinned to `token`.
    pub fn with_token(token: impl Into<String>) -> Self {
        let (_, rx) = watch::channel(SessionState::from_token(Some(token.into())));
        Self { rx }
    }

    pub fn bearer(&self) -> Option<String> {
        self.rx.borrow().session.token.clone()
    }

    pub fn session(&self) -> Session {
        self.rx.borrow().session.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.rx.borrow().phase
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.rx.clone()
    }
}

/// Outcome of the best-effort `/api/me` lookup after a login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileStatus {
    Resolved(String),
    /// Login still succeeded; the display name is simply unknown.
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub session: Session,
    pub profile: ProfileStatus,
}

/// Key-value persistence for the single bearer credential.
pub trait CredentialStore: Send + Sync + 'static {
    fn load(&self) -> impl Future<Output = Result<Option<String>, SyncError>> + Send;
    fn save(&self, token: &str) -> impl Future<Output = Result<(), SyncError>> + Send;
    fn clear(&self) -> impl Future<Output = Result<(), SyncError>> + Send;
}

/// Credential persisted in the SQLite key-value store; survives restarts.
#[derive(Clone)]
pub struct SqliteCredentialStore {
    kv: KvStore,
    key: String,
}

impl SqliteCredentialStore {
    pub fn new(kv: KvStore, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
        }
    }
}

impl CredentialStore for SqliteCredentialStore {
    async fn load(&self) -> Result<Option<String>, SyncError> {
        self.kv
            .get(&self.key)
            .await
            .map_err(|e| SyncError::Storage(format!("{e:#}")))
    }

    async fn save(&self, token: &str) -> Result<(), SyncError> {
        self.kv
            .set(&self.key, token)
            .await
            .map_err(|e| SyncError::Storage(format!("{e:#}")))
    }

    async fn clear(&self) -> Result<(), SyncError> {
        self.kv
            .remove(&self.key)
            .await
            .map(|_| ())
            .map_err(|e| SyncError::Storage(format!("{e:#}")))
    }
}

/// Process-local credential slot. Clones share the slot.
#[derive(Clone, Default)]
pub struct MemoryCredentialStore {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peek(&self) -> Option<String> {
        self.slot.lock().ok().and_then(|s| s.clone())
    }

    fn write(&self, value: Option<String>) -> Result<(), SyncError> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|e| SyncError::Storage(format!("credential slot poisoned: {e}")))?;
        *slot = value;
        Ok(())
    }
}

impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<String>, SyncError> {
        Ok(self.peek())
    }

    async fn save(&self, token: &str) -> Result<(), SyncError> {
        self.write(Some(token.to_string()))
    }

    async fn clear(&self) -> Result<(), SyncError> {
        self.write(None)
    }
}

fn credentials(username: &str, password: &str) -> Result<Value, SyncError> {
    serde_json::to_value(Credentials { username, password })
        .map_err(|e| SyncError::Shape(format!("credentials: {e}")))
}

pub struct SessionManager<T, S> {
    api: ApiClient<T>,
    store: S,
    state: watch::Sender<SessionState>,
    /// Bumped by every login, registration and logout. An attempt only
    /// writes the session while it is still the latest.
    epoch: AtomicU64,
}

/// Snapshot taken when an authentication attempt starts.
struct Attempt {
    epoch: u64,
    previous: SessionState,
}

impl<T: Transport, S: CredentialStore> SessionManager<T, S> {
    /// Loads the persisted credential as the initial token. The token is not
    /// validated; a stale one surfaces as a rejected request later.
    pub async fn startup(api: ApiClient<T>, store: S) -> Self {
        let token = match store.load().await {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, "failed to load persisted credential, starting anonymous");
                None
            }
        };
        let initial = SessionState::from_token(token);
        info!(phase = ?initial.phase, "session restored");
        let (state, _) = watch::channel(initial);
        Self {
            api,
            store,
            state,
            epoch: AtomicU64::new(0),
        }
    }

    pub fn reader(&self) -> SessionReader {
        SessionReader {
            rx: self.state.subscribe(),
        }
    }

    pub fn session(&self) -> Session {
        self.state.borrow().session.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.borrow().phase
    }

    /// On failure the prior session is restored unchanged, unless a logout
    /// or a newer login ran in the meantime.
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginOutcome, SyncError> {
        let attempt = self.begin_authenticating();
        match self.authenticate(&attempt, username, password).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(username, error = %e, "login failed");
                self.restore(attempt);
                Err(e)
            }
        }
    }

    /// Registration never grants a token by itself: success chains into
    /// [`Self::login`] with the same credentials, failure stops here.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
    ) -> Result<LoginOutcome, SyncError> {
        let request =
            ApiRequest::post("register", REGISTER_PATH).with_json(credentials(username, password)?);
        let attempt = self.begin_authenticating();

        let registered = match self.api.send(request).await {
            Ok(resp) if resp.is_success() => Ok(()),
            Ok(resp) => Err(SyncError::Auth {
                status: resp.status,
                message: resp.body.trim().to_string(),
            }),
            Err(e) => Err(e),
        };
        let superseded = !self.restore(attempt);
        if let Err(e) = registered {
            warn!(username, error = %e, "registration failed");
            return Err(e);
        }
        if superseded {
            info!(username, "registered, session changed meanwhile so not logging in");
            return Err(SyncError::Superseded);
        }

        info!(username, "registered, logging in");
        self.login(username, password).await
    }

    /// Always succeeds; a storage failure is logged. Any login still in
    /// flight loses to this call.
    pub async fn logout(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(SessionState::anonymous());
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "failed to clear persisted credential");
        }
        info!("logged out");
    }

    /// Looks up the display name for the current token, e.g. one restored
    /// by [`Self::startup`]. The token itself is kept either way.
    pub async fn refresh_profile(&self) -> ProfileStatus {
        let Some(token) = self.session().token else {
            return ProfileStatus::Unresolved;
        };
        let profile = self.resolve_profile(&token).await;
        if let ProfileStatus::Resolved(name) = &profile {
            let name = name.clone();
            self.state.send_if_modified(|s| {
                // A login or logout may have raced this lookup.
                if s.session.token.as_deref() != Some(token.as_str()) {
                    return false;
                }
                s.session.username = Some(name);
                true
            });
        }
        profile
    }

    fn begin_authenticating(&self) -> Attempt {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.state.borrow().clone();
        self.state
            .send_modify(|s| s.phase = SessionPhase::Authenticating);
        Attempt { epoch, previous }
    }

    fn is_current(&self, attempt: &Attempt) -> bool {
        self.epoch.load(Ordering::SeqCst) == attempt.epoch
    }

    /// Puts back the pre-attempt session if nothing replaced it since.
    fn restore(&self, attempt: Attempt) -> bool {
        let Attempt { epoch, previous } = attempt;
        self.state.send_if_modified(|s| {
            if self.epoch.load(Ordering::SeqCst) != epoch
                || s.phase != SessionPhase::Authenticating
            {
                return false;
            }
            *s = previous;
            true
        })
    }

    async fn authenticate(
        &self,
        attempt: &Attempt,
        username: &str,
        password: &str,
    ) -> Result<LoginOutcome, SyncError> {
        let request =
            ApiRequest::post("login", LOGIN_PATH).with_json(credentials(username, password)?);
        let body = self
            .api
            .json(request)
            .await
            .map_err(SyncError::into_auth)?;

        let login: LoginResponse = serde_json::from_value(body)
            .map_err(|e| SyncError::Shape(format!("login response: {e}")))?;
        let token = login
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(SyncError::MissingToken)?;

        if !self.is_current(attempt) {
            return Err(SyncError::Superseded);
        }
        if let Err(e) = self.store.save(&token).await {
            warn!(error = %e, "failed to persist credential; session is in-memory only");
        }

        let profile = self.resolve_profile(&token).await;
        let session = Session {
            token: Some(token),
            username: match &profile {
                ProfileStatus::Resolved(name) => Some(name.clone()),
                ProfileStatus::Unresolved => None,
            },
        };
        let applied = self.state.send_if_modified(|s| {
            if !self.is_current(attempt) {
                return false;
            }
            *s = SessionState {
                session: session.clone(),
                phase: SessionPhase::Authenticated,
            };
            true
        });
        if !applied {
            return Err(SyncError::Superseded);
        }
        info!(username, resolved = matches!(profile, ProfileStatus::Resolved(_)), "logged in");
        Ok(LoginOutcome { session, profile })
    }

    async fn resolve_profile(&self, token: &str) -> ProfileStatus {
        let request =
            ApiRequest::get("profile", PROFILE_PATH).with_bearer(Some(token.to_string()));
        let profile = self
            .api
            .json(request)
            .await
            .and_then(|v| {
                serde_json::from_value::<ProfileResponse>(v)
                    .map_err(|e| SyncError::Shape(format!("profile response: {e}")))
            });
        match profile {
            Ok(ProfileResponse {
                username: Some(name),
            }) if !name.is_empty() => ProfileStatus::Resolved(name),
            Ok(_) => ProfileStatus::Unresolved,
            Err(e) => {
                warn!(error = %e, "profile lookup failed, username left unset");
                ProfileStatus::Unresolved
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Method;
    use crate::testing::ScriptedTransport;
    use serde_json::json;
    use std::time::Duration;

    async fn manager(
        transport: ScriptedTransport,
        store: MemoryCredentialStore,
    ) -> (SessionManager<ScriptedTransport, MemoryCredentialStore>, Arc<ScriptedTransport>) {
        let transport = Arc::new(transport);
        let api = ApiClient::from_arc(Arc::clone(&transport));
        (SessionManager::startup(api, store).await, transport)
    }

    #[tokio::test]
    async fn test_startup_without_credential_is_anonymous() {
        let (mgr, transport) = manager(ScriptedTransport::new(), MemoryCredentialStore::new()).await;
        assert_eq!(mgr.phase(), SessionPhase::Anonymous);
        assert_eq!(mgr.reader().bearer(), None);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_startup_loads_persisted_token_without_validation() {
        let store = MemoryCredentialStore::new();
        store.save("persisted").await.unwrap();
        let (mgr, transport) = manager(ScriptedTransport::new(), store).await;
        assert_eq!(mgr.phase(), SessionPhase::Authenticated);
        assert_eq!(mgr.reader().bearer().as_deref(), Some("persisted"));
        assert_eq!(mgr.session().username, None);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_login_persists_token_and_resolves_profile() {
        let t = ScriptedTransport::new();
        t.respond(Method::Post, LOGIN_PATH, 200, &json!({"access_token": "tok-1", "token_type": "bearer"}));
        t.respond(Method::Get, PROFILE_PATH, 200, &json!({"username": "alice", "watchlist": []}));
        let store = MemoryCredentialStore::new();
        let (mgr, transport) = manager(t, store.clone()).await;

        let outcome = mgr.login("alice", "pw").await.unwrap();
        assert_eq!(outcome.profile, ProfileStatus::Resolved("alice".into()));
        assert_eq!(outcome.session.token.as_deref(), Some("tok-1"));
        assert_eq!(mgr.phase(), SessionPhase::Authenticated);
        assert_eq!(mgr.session().username.as_deref(), Some("alice"));
        assert_eq!(store.peek().as_deref(), Some("tok-1"));

        let login = &transport.requests_to(LOGIN_PATH)[0];
        assert_eq!(login.json, Some(json!({"username": "alice", "password": "pw"})));
        let me = &transport.requests_to(PROFILE_PATH)[0];
        assert_eq!(me.bearer.as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn test_login_succeeds_when_profile_lookup_fails() {
        let t = ScriptedTransport::new();
        t.respond(Method::Post, LOGIN_PATH, 200, &json!({"access_token": "tok-1"}));
        t.respond_text(Method::Get, PROFILE_PATH, 401, "Not authenticated");
        let (mgr, _) = manager(t, MemoryCredentialStore::new()).await;

        let outcome = mgr.login("bob", "pw").await.unwrap();
        assert_eq!(outcome.profile, ProfileStatus::Unresolved);
        assert_eq!(mgr.phase(), SessionPhase::Authenticated);
        assert_eq!(mgr.session().token.as_deref(), Some("tok-1"));
        assert_eq!(mgr.session().username, None);
    }

    #[tokio::test]
    async fn test_login_rejected_surfaces_status_and_message() {
        let t = ScriptedTransport::new();
        t.respond_text(Method::Post, LOGIN_PATH, 401, r#"{"detail":"Invalid credentials"}"#);
        let store = MemoryCredentialStore::new();
        let (mgr, transport) = manager(t, store.clone()).await;

        let err = mgr.login("bob", "wrong").await.unwrap_err();
        assert_eq!(
            err,
            SyncError::Auth {
                status: 401,
                message: r#"{"detail":"Invalid credentials"}"#.into()
            }
        );
        assert_eq!(mgr.phase(), SessionPhase::Anonymous);
        assert_eq!(store.peek(), None);
        assert!(transport.requests_to(PROFILE_PATH).is_empty());
    }

    #[tokio::test]
    async fn test_login_without_token_in_body_fails() {
        let t = ScriptedTransport::new();
        t.respond(Method::Post, LOGIN_PATH, 200, &json!({"token_type": "bearer"}));
        let (mgr, _) = manager(t, MemoryCredentialStore::new()).await;
        assert_eq!(mgr.login("u", "p").await.unwrap_err(), SyncError::MissingToken);
        assert_eq!(mgr.phase(), SessionPhase::Anonymous);
    }

    #[tokio::test]
    async fn test_failed_login_keeps_existing_session() {
        let t = ScriptedTransport::new();
        t.fail(Method::Post, LOGIN_PATH, SyncError::Network("connection reset".into()));
        let store = MemoryCredentialStore::new();
        store.save("old").await.unwrap();
        let (mgr, _) = manager(t, store.clone()).await;

        assert!(mgr.login("u", "p").await.is_err());
        assert_eq!(mgr.phase(), SessionPhase::Authenticated);
        assert_eq!(mgr.reader().bearer().as_deref(), Some("old"));
        assert_eq!(store.peek().as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn test_register_chains_into_login_before_profile() {
        let t = ScriptedTransport::new();
        // The register body carries a token; it must not be used.
        t.respond(Method::Post, REGISTER_PATH, 200, &json!({"access_token": "from-register"}));
        t.respond(Method::Post, LOGIN_PATH, 200, &json!({"access_token": "from-login"}));
        t.respond(Method::Get, PROFILE_PATH, 200, &json!({"username": "carol"}));
        let (mgr, transport) = manager(t, MemoryCredentialStore::new()).await;

        let outcome = mgr.register("carol", "pw").await.unwrap();
        assert_eq!(outcome.session.token.as_deref(), Some("from-login"));

        let paths: Vec<String> = transport.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec![REGISTER_PATH, LOGIN_PATH, PROFILE_PATH]);
        let me = &transport.requests_to(PROFILE_PATH)[0];
        assert_eq!(me.bearer.as_deref(), Some("from-login"));
    }

    #[tokio::test]
    async fn test_register_failure_does_not_attempt_login() {
        let t = ScriptedTransport::new();
        t.respond_text(Method::Post, REGISTER_PATH, 400, "Username already exists");
        let (mgr, transport) = manager(t, MemoryCredentialStore::new()).await;

        let err = mgr.register("dave", "pw").await.unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.kind(), "auth");
        assert!(transport.requests_to(LOGIN_PATH).is_empty());
        assert_eq!(mgr.phase(), SessionPhase::Anonymous);
    }

    #[tokio::test]
    async fn test_logout_clears_persisted_credential_for_next_startup() {
        let t = ScriptedTransport::new();
        t.respond(Method::Post, LOGIN_PATH, 200, &json!({"access_token": "tok-1"}));
        t.respond(Method::Get, PROFILE_PATH, 200, &json!({"username": "erin"}));
        let store = MemoryCredentialStore::new();
        let (mgr, _) = manager(t, store.clone()).await;
        let reader = mgr.reader();

        mgr.login("erin", "pw").await.unwrap();
        assert_eq!(reader.bearer().as_deref(), Some("tok-1"));

        mgr.logout().await;
        assert_eq!(reader.bearer(), None);
        assert_eq!(reader.phase(), SessionPhase::Anonymous);
        assert_eq!(store.peek(), None);

        let (fresh, _) = manager(ScriptedTransport::new(), store).await;
        assert_eq!(fresh.phase(), SessionPhase::Anonymous);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_wins_over_failing_login_in_flight() {
        let t = ScriptedTransport::new();
        t.respond_after(
            Method::Post,
            LOGIN_PATH,
            Duration::from_secs(2),
            401,
            &json!({"detail": "Invalid credentials"}),
        );
        let store = MemoryCredentialStore::new();
        store.save("old").await.unwrap();
        let (mgr, _) = manager(t, store.clone()).await;

        let (login, ()) = tokio::join!(mgr.login("u", "wrong"), async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            mgr.logout().await;
        });

        assert_eq!(login.unwrap_err().status(), Some(401));
        assert_eq!(mgr.phase(), SessionPhase::Anonymous);
        assert_eq!(mgr.reader().bearer(), None);
        assert_eq!(store.peek(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_wins_over_succeeding_login_in_flight() {
        let t = ScriptedTransport::new();
        t.respond_after(
            Method::Post,
            LOGIN_PATH,
            Duration::from_secs(2),
            200,
            &json!({"access_token": "late"}),
        );
        let store = MemoryCredentialStore::new();
        let (mgr, transport) = manager(t, store.clone()).await;

        let (login, ()) = tokio::join!(mgr.login("u", "pw"), async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            mgr.logout().await;
        });

        assert_eq!(login.unwrap_err(), SyncError::Superseded);
        assert_eq!(mgr.phase(), SessionPhase::Anonymous);
        assert_eq!(store.peek(), None);
        assert!(transport.requests_to(PROFILE_PATH).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_during_registration_skips_login() {
        let t = ScriptedTransport::new();
        t.respond_after(
            Method::Post,
            REGISTER_PATH,
            Duration::from_secs(2),
            200,
            &json!({"message": "User created"}),
        );
        let (mgr, transport) = manager(t, MemoryCredentialStore::new()).await;

        let (registered, ()) = tokio::join!(mgr.register("gina", "pw"), async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            mgr.logout().await;
        });

        assert_eq!(registered.unwrap_err(), SyncError::Superseded);
        assert_eq!(mgr.phase(), SessionPhase::Anonymous);
        assert!(transport.requests_to(LOGIN_PATH).is_empty());
    }

    #[tokio::test]
    async fn test_refresh_profile_names_restored_session() {
        let t = ScriptedTransport::new();
        t.respond(Method::Get, PROFILE_PATH, 200, &json!({"username": "frank"}));
        let store = MemoryCredentialStore::new();
        store.save("persisted").await.unwrap();
        let (mgr, transport) = manager(t, store).await;

        assert_eq!(mgr.refresh_profile().await, ProfileStatus::Resolved("frank".into()));
        assert_eq!(mgr.session().username.as_deref(), Some("frank"));
        assert_eq!(
            transport.requests_to(PROFILE_PATH)[0].bearer.as_deref(),
            Some("persisted")
        );
    }

    #[tokio::test]
    async fn test_refresh_profile_without_token_makes_no_request() {
        let (mgr, transport) = manager(ScriptedTransport::new(), MemoryCredentialStore::new()).await;
        assert_eq!(mgr.refresh_profile().await, ProfileStatus::Unresolved);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_store_round_trips_through_kv() {
        let kv = KvStore::open_memory().await.unwrap();
        let store = SqliteCredentialStore::new(kv, "ethbot_token");
        assert_eq!(store.load().await.unwrap(), None);
        store.save("tok").await.unwrap();
        assert_eq!(store.load().await.unwrap().as_deref(), Some("tok"));
        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[test]
    fn test_pinned_readers() {
        assert_eq!(SessionReader::anonymous().bearer(), None);
        let reader = SessionReader::with_token("t");
        assert_eq!(reader.bearer().as_deref(), Some("t"));
        assert_eq!(reader.phase(), SessionPhase::Authenticated);
    }
}
