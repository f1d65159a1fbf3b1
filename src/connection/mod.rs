//! Connection Manager (C4): realtime connection bookkeeping, handshake
//! authentication, and IP rate limiting.

mod rate_limiter;

pub use rate_limiter::ConnectionRateLimiter;

use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::model::{ConnectionId, Principal, SessionId};

/// Join state machine per §4.5.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    Unbound,
    Joining,
    Bound,
    Leaving,
}

/// Per-connection metadata tracked outside the transport itself.
pub struct ConnectionState {
    pub connection_id: ConnectionId,
    pub principal: Principal,
    pub authenticated: bool,
    pub session_id: Mutex<Option<SessionId>>,
    pub join_state: Mutex<JoinState>,
}

impl ConnectionState {
    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id.lock().clone()
    }

    pub fn state(&self) -> JoinState {
        *self.join_state.lock()
    }
}

/// Registry of live realtime connections plus the shared rate limiter.
pub struct ConnectionManager {
    connections: DashMap<ConnectionId, Arc<ConnectionState>>,
    rate_limiter: ConnectionRateLimiter,
}

impl ConnectionManager {
    pub fn new(rate_limiter: ConnectionRateLimiter) -> Self {
        Self {
            connections: DashMap::new(),
            rate_limiter,
        }
    }

    /// Consult the rate limiter at handshake time, before any connection
    /// state is created.
    pub fn admit(&self, addr: IpAddr) -> bool {
        self.rate_limiter.try_admit(addr)
    }

    pub fn register(&self, connection_id: ConnectionId, principal: Principal, authenticated: bool) -> Arc<ConnectionState> {
        let state = Arc::new(ConnectionState {
            connection_id: connection_id.clone(),
            principal,
            authenticated,
            session_id: Mutex::new(None),
            join_state: Mutex::new(JoinState::Unbound),
        });
        self.connections.insert(connection_id, state.clone());
        state
    }

    pub fn get(&self, connection_id: &str) -> Option<Arc<ConnectionState>> {
        self.connections.get(connection_id).map(|e| e.value().clone())
    }

    /// Bind a connection to a session. Rejects if already bound (single-
    /// session connections, per §4.5.2).
    pub fn bind_session(&self, connection: &ConnectionState, session_id: SessionId) -> bool {
        let mut current = connection.session_id.lock();
        if current.is_some() {
            return false;
        }
        *current = Some(session_id);
        *connection.join_state.lock() = JoinState::Bound;
        true
    }

    pub fn unbind_session(&self, connection: &ConnectionState) {
        *connection.session_id.lock() = None;
        *connection.join_state.lock() = JoinState::Unbound;
    }

    /// Remove a connection on transport close; the caller still owes an
    /// implicit `leave_session` if it was bound.
    pub fn remove(&self, connection_id: &str, addr: Option<IpAddr>) {
        self.connections.remove(connection_id);
        if let Some(addr) = addr {
            self.rate_limiter.cleanup(&addr);
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }
}
