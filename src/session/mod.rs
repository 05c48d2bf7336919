//! Session lifecycle management.
//!
//! A session is the per-client logical connection: initialisation state,
//! negotiated protocol version, client capabilities, auth context, and
//! activity tracking. Sessions are minted at `initialize` (or lazily for
//! stdio, see [`SessionManager::create`]) and removed on idle expiry,
//! explicit termination, or server stop.
//!
//! # Reaping invariant
//!
//! The reaper serialises with request acceptance: acceptance re-fetches
//! the session from the map and bumps its in-flight counter under the
//! session lock, while the reaper holds the map write lock and skips any
//! session whose in-flight counter is non-zero. A just-accepted request
//! can therefore never be dispatched against a removed session, and
//! expiry always fires after the last accepted request completes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::auth::AuthContext;
use crate::config::TransportKind;
use crate::protocol::{ClientInfo, InitializeParams, ProtocolVersion};

/// Why an `initialize` call was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitializeOutcome {
    /// The session transitioned to initialised.
    Initialized,
    /// The client repeated `initialize` with identical parameters.
    AlreadyInitialized,
    /// The client repeated `initialize` with different parameters.
    Conflict,
}

/// Mutable per-session state, guarded by the session lock.
#[derive(Debug)]
struct SessionState {
    client_info: Option<ClientInfo>,
    protocol_version: Option<ProtocolVersion>,
    capabilities: Option<Value>,
    initialized: bool,
    auth: Option<AuthContext>,
    last_activity: Instant,
    in_flight: u32,
    total_requests: u64,
}

/// A per-client session.
#[derive(Debug)]
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// The transport this session arrived on.
    pub transport: TransportKind,
    /// Creation time.
    pub created_at: Instant,
    state: Mutex<SessionState>,
}

impl Session {
    fn new(transport: TransportKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            transport,
            created_at: Instant::now(),
            state: Mutex::new(SessionState {
                client_info: None,
                protocol_version: None,
                capabilities: None,
                initialized: false,
                auth: None,
                last_activity: Instant::now(),
                in_flight: 0,
                total_requests: 0,
            }),
        }
    }

    /// Whether the `initialize` handshake has completed.
    ///
    /// # Panics
    ///
    /// Panics if the session lock is poisoned.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.lock().unwrap().initialized
    }

    /// Binds client info, protocol version, and capabilities.
    ///
    /// Rejects a second `initialize` unless the client repeats identical
    /// parameters, which is treated as idempotent.
    ///
    /// # Panics
    ///
    /// Panics if the session lock is poisoned.
    pub fn initialize(&self, params: &InitializeParams) -> InitializeOutcome {
        let mut state = self.state.lock().unwrap();

        if state.initialized {
            let identical = state.protocol_version == Some(params.protocol_version)
                && state.client_info == params.client_info
                && state.capabilities.as_ref() == Some(&params.capabilities);
            return if identical {
                InitializeOutcome::AlreadyInitialized
            } else {
                InitializeOutcome::Conflict
            };
        }

        state.client_info = params.client_info.clone();
        state.protocol_version = Some(params.protocol_version);
        state.capabilities = Some(params.capabilities.clone());
        state.initialized = true;
        state.last_activity = Instant::now();
        InitializeOutcome::Initialized
    }

    /// The negotiated protocol version, immutable after `initialize`.
    ///
    /// # Panics
    ///
    /// Panics if the session lock is poisoned.
    #[must_use]
    pub fn protocol_version(&self) -> Option<ProtocolVersion> {
        self.state.lock().unwrap().protocol_version
    }

    /// Attaches the auth context produced by credential validation.
    ///
    /// # Panics
    ///
    /// Panics if the session lock is poisoned.
    pub fn set_auth(&self, context: AuthContext) {
        self.state.lock().unwrap().auth = Some(context);
    }

    /// The session's auth context, when one is attached.
    ///
    /// # Panics
    ///
    /// Panics if the session lock is poisoned.
    #[must_use]
    pub fn auth(&self) -> Option<AuthContext> {
        self.state.lock().unwrap().auth.clone()
    }

    /// Marks a request accepted: bumps activity and the in-flight gauge.
    ///
    /// Activity updates are serialised per session by the lock, so a
    /// later-accepted request can never be observed with an older
    /// `last_activity` than an earlier one.
    ///
    /// # Panics
    ///
    /// Panics if the session lock is poisoned.
    pub fn begin_request(&self) {
        let mut state = self.state.lock().unwrap();
        state.last_activity = Instant::now();
        state.in_flight += 1;
        state.total_requests += 1;
    }

    /// Marks an accepted request complete.
    ///
    /// # Panics
    ///
    /// Panics if the session lock is poisoned.
    pub fn end_request(&self) {
        let mut state = self.state.lock().unwrap();
        state.in_flight = state.in_flight.saturating_sub(1);
        state.last_activity = Instant::now();
    }

    /// Bumps `last_activity` without admitting a request.
    ///
    /// # Panics
    ///
    /// Panics if the session lock is poisoned.
    pub fn update_activity(&self) {
        self.state.lock().unwrap().last_activity = Instant::now();
    }

    /// Time since the last accepted activity.
    ///
    /// # Panics
    ///
    /// Panics if the session lock is poisoned.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.state.lock().unwrap().last_activity.elapsed()
    }

    /// Requests currently dispatched on this session.
    ///
    /// # Panics
    ///
    /// Panics if the session lock is poisoned.
    #[must_use]
    pub fn in_flight(&self) -> u32 {
        self.state.lock().unwrap().in_flight
    }

    /// Total requests accepted over the session lifetime.
    ///
    /// # Panics
    ///
    /// Panics if the session lock is poisoned.
    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.state.lock().unwrap().total_requests
    }
}

/// Session counters surfaced by `system/health`.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SessionMetrics {
    /// Sessions created over the process lifetime.
    pub total: u64,
    /// Sessions currently tracked.
    pub active: usize,
    /// Tracked sessions holding a non-anonymous auth context.
    pub authenticated: usize,
    /// Sessions reaped after exceeding the idle window.
    pub expired: u64,
}

/// Creates, looks up, expires, and terminates sessions.
#[derive(Debug)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    timeout: Duration,
    created_total: AtomicU64,
    expired_total: AtomicU64,
}

impl SessionManager {
    /// Creates a manager with the given idle timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            timeout,
            created_total: AtomicU64::new(0),
            expired_total: AtomicU64::new(0),
        }
    }

    /// Mints an id and an empty, uninitialised session.
    ///
    /// The stdio fast-path uses this lazily on the first request so the
    /// −32002 contract holds for non-`initialize` calls.
    ///
    /// # Panics
    ///
    /// Panics if the map lock is poisoned.
    pub fn create(&self, transport: TransportKind) -> Arc<Session> {
        let session = Arc::new(Session::new(transport));
        self.sessions
            .write()
            .unwrap()
            .insert(session.id.clone(), Arc::clone(&session));
        self.created_total.fetch_add(1, Ordering::Relaxed);
        session
    }

    /// Looks up a session by id.
    ///
    /// # Panics
    ///
    /// Panics if the map lock is poisoned.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().unwrap().get(id).cloned()
    }

    /// Snapshot of currently tracked sessions.
    ///
    /// # Panics
    ///
    /// Panics if the map lock is poisoned.
    #[must_use]
    pub fn active(&self) -> Vec<Arc<Session>> {
        self.sessions.read().unwrap().values().cloned().collect()
    }

    /// Idempotent termination.
    ///
    /// # Panics
    ///
    /// Panics if the map lock is poisoned.
    pub fn remove(&self, id: &str) -> bool {
        self.sessions.write().unwrap().remove(id).is_some()
    }

    /// Removes every tracked session. Used during server stop.
    ///
    /// # Panics
    ///
    /// Panics if the map lock is poisoned.
    pub fn clear(&self) {
        self.sessions.write().unwrap().clear();
    }

    /// Removes sessions idle beyond the configured window.
    ///
    /// Sessions with in-flight requests are skipped; they are picked up
    /// on a later sweep once the requests complete.
    ///
    /// # Panics
    ///
    /// Panics if the map lock is poisoned.
    pub fn reap_expired(&self) -> Vec<String> {
        let mut sessions = self.sessions.write().unwrap();
        let expired: Vec<String> = sessions
            .values()
            .filter(|s| s.in_flight() == 0 && s.idle_for() > self.timeout)
            .map(|s| s.id.clone())
            .collect();

        for id in &expired {
            sessions.remove(id);
        }
        self.expired_total
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        expired
    }

    /// The configured idle window.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Current session counters.
    ///
    /// # Panics
    ///
    /// Panics if the map lock is poisoned.
    #[must_use]
    pub fn metrics(&self) -> SessionMetrics {
        let sessions = self.sessions.read().unwrap();
        let authenticated = sessions
            .values()
            .filter(|s| s.auth().is_some_and(|ctx| !ctx.is_anonymous()))
            .count();
        SessionMetrics {
            total: self.created_total.load(Ordering::Relaxed),
            active: sessions.len(),
            authenticated,
            expired: self.expired_total.load(Ordering::Relaxed),
        }
    }
}
