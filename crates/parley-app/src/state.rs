//! Client state.
//!
//! [`ClientState`] is the single mutable record behind the orchestrator. It is
//! only touched under the orchestrator's lock and never across an await.
//! Observers read it through [`ClientView`] snapshots or the accessors on
//! [`Store`](crate::Store).

use std::collections::{BTreeMap, BTreeSet};

use parley_core::{
    ChannelKind, LinkState, PeerId, ServerInfo, SessionId, SessionInfo, SessionPayload,
    SubscriptionId, Visibility,
};
use serde::{Deserialize, Serialize};

use crate::{
    ClientError,
    log::{LogKind, MessageLog},
    registry::SessionRegistry,
    stream::StreamSlots,
};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport session.
    #[default]
    Disconnected,
    /// Transport opening, server info not yet fetched.
    Connecting,
    /// Ready.
    Connected,
}

/// Channel that outgoing chat is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveChannel {
    /// The global channel.
    #[default]
    Global,
    /// The current session.
    Session,
}

/// The session the client is currently in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Session identifier (also the join code).
    pub id: SessionId,
    /// Display name.
    pub name: String,
    /// Visibility.
    pub visibility: Visibility,
    /// Maximum number of members.
    pub capacity: u32,
    /// Peers present when the session was joined.
    pub existing_peers: Vec<PeerId>,
}

impl From<&SessionPayload> for Session {
    fn from(payload: &SessionPayload) -> Self {
        Self {
            id: payload.id.clone(),
            name: payload.name.clone(),
            visibility: payload.visibility,
            capacity: payload.capacity,
            existing_peers: payload.existing_peers.clone(),
        }
    }
}

/// Server the user may connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedServer {
    /// Display label.
    pub label: String,
    /// Host name or address.
    pub host: String,
    /// Port.
    pub port: u16,
}

impl SavedServer {
    /// Create a saved server entry.
    pub fn new(label: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self { label: label.into(), host: host.into(), port }
    }

    /// Whether this entry points at `host:port`.
    pub fn matches(&self, host: &str, port: u16) -> bool {
        self.host == host && self.port == port
    }
}

/// Surfaced error with the instant it was raised.
#[derive(Debug, Clone)]
pub(crate) struct ErrorBanner<I> {
    pub error: ClientError,
    pub raised_at: I,
}

/// Everything scoped to the current session.
///
/// Reset as a unit on every commit, leave and disconnect.
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionSlice {
    pub current: Option<Session>,
    pub host: Option<PeerId>,
    pub is_owner: bool,
    pub peer_links: BTreeMap<PeerId, LinkState>,
    /// Peers announced as connecting whose link has not opened yet.
    pub pending: BTreeSet<PeerId>,
    /// Peers whose failure was already reported.
    pub failed: BTreeSet<PeerId>,
    /// Peers that left this session.
    pub left: BTreeSet<PeerId>,
}

impl SessionSlice {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_current(&self, session_id: &str) -> bool {
        self.current.as_ref().is_some_and(|s| s.id == session_id)
    }

    pub fn current_id(&self) -> Option<SessionId> {
        self.current.as_ref().map(|s| s.id.clone())
    }

    /// Commit a freshly joined session.
    pub fn commit(&mut self, payload: &SessionPayload, identity: Option<&str>) {
        *self = Self {
            current: Some(Session::from(payload)),
            host: Some(payload.host.clone()),
            is_owner: identity == Some(payload.host.as_str()),
            ..Self::default()
        };
    }

    /// Whether any peer other than `except` has an open link.
    pub fn any_other_open(&self, except: &str) -> bool {
        self.peer_links.iter().any(|(peer, state)| peer != except && *state == LinkState::Open)
    }
}

/// Mutable client state.
#[derive(Debug)]
pub(crate) struct ClientState<I> {
    pub identity: Option<PeerId>,
    pub connection: ConnectionState,
    pub server: Option<ServerInfo>,
    pub relay: Option<String>,
    pub saved_servers: Vec<SavedServer>,
    pub session: SessionSlice,
    pub registry: SessionRegistry,
    pub presence: Vec<PeerId>,
    pub global_log: MessageLog,
    pub session_log: MessageLog,
    pub active_channel: ActiveChannel,
    pub error: Option<ErrorBanner<I>>,
    pub join_in_flight: bool,
    pub leaving: bool,
    /// Bumped by every connect attempt and every disconnect. An attempt only
    /// touches state while the counter still holds the value it set.
    pub connect_generation: u64,
    pub streams: StreamSlots,
}

impl<I> Default for ClientState<I> {
    fn default() -> Self {
        Self {
            identity: None,
            connection: ConnectionState::Disconnected,
            server: None,
            relay: None,
            saved_servers: Vec::new(),
            session: SessionSlice::default(),
            registry: SessionRegistry::default(),
            presence: Vec::new(),
            global_log: MessageLog::new(),
            session_log: MessageLog::new(),
            active_channel: ActiveChannel::Global,
            error: None,
            join_in_flight: false,
            leaving: false,
            connect_generation: 0,
            streams: StreamSlots::default(),
        }
    }
}

impl<I> ClientState<I> {
    pub fn log_mut(&mut self, kind: LogKind) -> &mut MessageLog {
        match kind {
            LogKind::Global => &mut self.global_log,
            LogKind::Session => &mut self.session_log,
        }
    }

    /// Clear every field owned by a live connection.
    ///
    /// Saved servers, the relay choice, the error banner, the transition
    /// flags and the connect generation survive.
    pub fn reset_connection(&mut self) {
        self.identity = None;
        self.connection = ConnectionState::Disconnected;
        self.server = None;
        self.session.reset();
        self.registry.clear();
        self.presence.clear();
        self.global_log.clear();
        self.session_log.clear();
        self.active_channel = ActiveChannel::Global;
    }

    /// Clear every field owned by the current session.
    pub fn reset_session(&mut self) {
        if let Some(id) = self.session.current_id() {
            self.registry.clear_members(&id);
        }
        self.session.reset();
        self.session_log.clear();
        self.active_channel = ActiveChannel::Global;
    }
}

/// Read-only snapshot of the observable client state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientView {
    /// Identity used for the current connection.
    pub identity: Option<PeerId>,
    /// Connection lifecycle.
    pub connection: ConnectionState,
    /// Server info, present once connected.
    pub server: Option<ServerInfo>,
    /// Selected relay.
    pub relay: Option<String>,
    /// Saved servers.
    pub saved_servers: Vec<SavedServer>,
    /// Current session.
    pub session: Option<Session>,
    /// Current host.
    pub host: Option<PeerId>,
    /// Whether the local identity hosts the current session.
    pub is_owner: bool,
    /// Link state per peer.
    pub peer_links: BTreeMap<PeerId, LinkState>,
    /// Peers still announced as connecting.
    pub pending_connect: BTreeSet<PeerId>,
    /// Peers that left the current session.
    pub left_peers: BTreeSet<PeerId>,
    /// Public session list.
    pub sessions: Vec<SessionInfo>,
    /// Member list of the current session.
    pub members: Vec<PeerId>,
    /// Online identities.
    pub presence: Vec<PeerId>,
    /// Global channel log.
    pub global_log: MessageLog,
    /// Session channel log.
    pub session_log: MessageLog,
    /// Outgoing chat route.
    pub active_channel: ActiveChannel,
    /// Visible error text.
    pub error: Option<String>,
    /// Whether a create or enter is running.
    pub join_in_flight: bool,
    /// Live subscription per channel kind.
    pub subscriptions: BTreeMap<ChannelKind, SubscriptionId>,
}

impl<I> ClientState<I> {
    pub fn view(&self, error: Option<String>) -> ClientView {
        let members = self
            .session
            .current
            .as_ref()
            .and_then(|s| self.registry.members(&s.id))
            .map(<[PeerId]>::to_vec)
            .unwrap_or_default();

        ClientView {
            identity: self.identity.clone(),
            connection: self.connection,
            server: self.server.clone(),
            relay: self.relay.clone(),
            saved_servers: self.saved_servers.clone(),
            session: self.session.current.clone(),
            host: self.session.host.clone(),
            is_owner: self.session.is_owner,
            peer_links: self.session.peer_links.clone(),
            pending_connect: self.session.pending.clone(),
            left_peers: self.session.left.clone(),
            sessions: self.registry.sessions().to_vec(),
            members,
            presence: self.presence.clone(),
            global_log: self.global_log.clone(),
            session_log: self.session_log.clone(),
            active_channel: self.active_channel,
            error,
            join_in_flight: self.join_in_flight,
            subscriptions: self.streams.ids(),
        }
    }
}
