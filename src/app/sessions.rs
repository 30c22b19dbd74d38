//! Session directory: bounded map from connection handle to protocol
//! session id.
//!
//! Ids come from a wrapping 16-bit counter that skips ids still in use, so a
//! controller that reconnects never inherits the id of a session that just
//! went away.  Lookups are linear; the table never holds more than
//! [`MAX_SESSIONS_LIMIT`] entries.

use core::fmt;

use log::{debug, warn};

use crate::config::MAX_SESSIONS_LIMIT;
use crate::identity::address::BleAddress;
use crate::protocol::{ConnHandle, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub handle: ConnHandle,
    pub id: SessionId,
    /// Resolved on first use and cached.
    peer_address: Option<BleAddress>,
}

impl Session {
    pub fn peer_address(&self) -> Option<BleAddress> {
        self.peer_address
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    CapacityExceeded,
    DuplicateHandle,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityExceeded => write!(f, "session capacity exceeded"),
            Self::DuplicateHandle => write!(f, "connection handle already has a session"),
        }
    }
}

pub struct SessionDirectory {
    sessions: heapless::Vec<Session, MAX_SESSIONS_LIMIT>,
    max_sessions: usize,
    next_id: SessionId,
}

impl SessionDirectory {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: heapless::Vec::new(),
            max_sessions: max_sessions.clamp(1, MAX_SESSIONS_LIMIT),
            next_id: 1,
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.max_sessions
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    /// Open a session for a new connection.
    pub fn on_connect(&mut self, handle: ConnHandle) -> Result<SessionId, SessionError> {
        if self.sessions.iter().any(|s| s.handle == handle) {
            warn!("Sessions: handle {handle} connected twice");
            return Err(SessionError::DuplicateHandle);
        }
        if self.is_full() {
            return Err(SessionError::CapacityExceeded);
        }

        let id = self.allocate_id();
        let session = Session {
            handle,
            id,
            peer_address: None,
        };
        self.sessions
            .push(session)
            .map_err(|_| SessionError::CapacityExceeded)?;
        debug!("Sessions: handle {handle} -> session {id} ({}/{})", self.len(), self.max_sessions);
        Ok(id)
    }

    /// Close the session on `handle`.  Returns it if one existed.
    pub fn on_disconnect(&mut self, handle: ConnHandle) -> Option<Session> {
        let index = self.sessions.iter().position(|s| s.handle == handle)?;
        let session = self.sessions.swap_remove(index);
        debug!("Sessions: session {} closed ({} left)", session.id, self.len());
        Some(session)
    }

    pub fn session_id_of(&self, handle: ConnHandle) -> Option<SessionId> {
        self.sessions.iter().find(|s| s.handle == handle).map(|s| s.id)
    }

    pub fn handle_of(&self, id: SessionId) -> Option<ConnHandle> {
        self.sessions.iter().find(|s| s.id == id).map(|s| s.handle)
    }

    /// Peer address of `handle`, resolving and caching it on first use.
    pub fn peer_address<F>(&mut self, handle: ConnHandle, resolve: F) -> Option<BleAddress>
    where
        F: Fn(ConnHandle) -> Option<BleAddress>,
    {
        let session = self.sessions.iter_mut().find(|s| s.handle == handle)?;
        Self::resolved(session, &resolve)
    }

    /// Session whose peer is `address`.
    pub fn find_by_address<F>(&mut self, address: &BleAddress, resolve: F) -> Option<Session>
    where
        F: Fn(ConnHandle) -> Option<BleAddress>,
    {
        for session in &mut self.sessions {
            if Self::resolved(session, &resolve).as_ref() == Some(address) {
                return Some(*session);
            }
        }
        None
    }

    fn resolved<F>(session: &mut Session, resolve: &F) -> Option<BleAddress>
    where
        F: Fn(ConnHandle) -> Option<BleAddress>,
    {
        if session.peer_address.is_none() {
            session.peer_address = resolve(session.handle);
        }
        session.peer_address
    }

    fn allocate_id(&mut self) -> SessionId {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if !self.sessions.iter().any(|s| s.id == id) {
                return id;
            }
        }
    }
}
