//! Session registry: the public session list and cached member lists.

use std::collections::BTreeMap;

use parley_core::{Backend, PeerId, SessionId, SessionInfo, env::Environment};

use crate::{ClientError, Orchestrator, state::ConnectionState};

/// Public sessions and member lists keyed by session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRegistry {
    sessions: Vec<SessionInfo>,
    members: BTreeMap<SessionId, Vec<PeerId>>,
}

impl SessionRegistry {
    /// Public session list, as last pushed or fetched.
    pub fn sessions(&self) -> &[SessionInfo] {
        &self.sessions
    }

    /// Look up a listed session.
    pub fn find(&self, session_id: &str) -> Option<&SessionInfo> {
        self.sessions.iter().find(|s| s.id == session_id)
    }

    /// Cached members of a session.
    pub fn members(&self, session_id: &str) -> Option<&[PeerId]> {
        self.members.get(session_id).map(Vec::as_slice)
    }

    pub(crate) fn replace_sessions(&mut self, sessions: Vec<SessionInfo>) {
        self.sessions = sessions;
    }

    pub(crate) fn set_members(&mut self, session_id: SessionId, members: Vec<PeerId>) {
        self.members.insert(session_id, members);
    }

    pub(crate) fn clear_members(&mut self, session_id: &str) {
        self.members.remove(session_id);
    }

    pub(crate) fn clear(&mut self) {
        self.sessions.clear();
        self.members.clear();
    }

    /// Listed member count differs from the cached member list.
    pub(crate) fn membership_stale(&self, session_id: &str) -> bool {
        let Some(listed) = self.find(session_id) else {
            return false;
        };
        let cached = self.members(session_id).map_or(0, <[PeerId]>::len);
        listed.member_count as usize != cached
    }
}

impl<B: Backend, E: Environment> Orchestrator<B, E> {
    fn require_connected(&self) -> Result<(), ClientError> {
        self.with_state(|s| match s.connection {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Connecting | ConnectionState::Disconnected => {
                Err(ClientError::NotConnected)
            },
        })
    }

    /// Fetch the public session list.
    pub async fn refresh_sessions(&self) {
        if let Err(error) = self.require_connected() {
            self.surface(error);
            return;
        }

        match self.backend.list_sessions().await {
            Ok(sessions) => self.with_state(|s| {
                if s.connection == ConnectionState::Connected {
                    s.registry.replace_sessions(sessions);
                }
            }),
            Err(e) => self.surface(ClientError::rpc(&e)),
        }
    }

    /// Fetch and cache the members of a session.
    pub async fn fetch_members(&self, session_id: &str) {
        if let Err(error) = self.require_connected() {
            self.surface(error);
            return;
        }

        match self.backend.get_members(session_id).await {
            Ok(members) => {
                tracing::trace!(session = session_id, count = members.len(), "members fetched");
                self.with_state(|s| {
                    if s.connection == ConnectionState::Connected {
                        s.registry.set_members(session_id.to_string(), members);
                    }
                });
            },
            Err(e) => self.surface(ClientError::rpc(&e)),
        }
    }

    /// Replace the session list from a push and refetch our own members if
    /// the listed count disagrees with the cache.
    pub(crate) async fn apply_session_list(&self, sessions: Vec<SessionInfo>) {
        let stale = self.with_state(|s| {
            s.registry.replace_sessions(sessions);
            let current = s.session.current_id()?;
            s.registry.membership_stale(&current).then_some(current)
        });

        if let Some(session_id) = stale {
            tracing::debug!(session = %session_id, "member count changed");
            self.fetch_members(&session_id).await;
        }
    }
}
