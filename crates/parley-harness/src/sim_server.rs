//! In-memory session server shared by simulated clients.
//!
//! [`SimServer`] models the remote side of the transport: online identities,
//! sessions with members and a host, and push fan-out to every connected
//! client's subscriptions. Each client talks to it through its own
//! [`SimBackend`](crate::SimBackend).
//!
//! Sessions may also contain phantom members: identities with no client
//! behind them, driven directly by the test through
//! [`SimServer::add_phantom_member`] and [`SimServer::remove_phantom_member`].

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use parley_core::{
    Channel, ChatMessage, EventSink, LinkState, MemberEvent, PeerId, PushEvent, RelayOption,
    ServerInfo, SessionId, SessionInfo, SessionPayload, SubscriptionId, Visibility,
    env::Environment,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::{Call, SimBackend, SimEnv, SimError};

/// Characters used in generated session codes.
const SESSION_CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of a generated session code.
const SESSION_CODE_LEN: usize = 8;

/// Server-side member bounds.
pub const SESSION_MIN_MEMBERS: u32 = 2;
/// See [`SESSION_MIN_MEMBERS`].
pub const SESSION_MAX_MEMBERS: u32 = 16;

/// How peer links behave after `establish_peer_links`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkPolicy {
    /// Every requested link opens immediately, on both ends.
    #[default]
    AutoOpen,
    /// Links only change when the test pushes a state.
    Manual,
}

/// Server-side view of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimSession {
    /// Session code.
    pub id: SessionId,
    /// Visibility.
    pub visibility: Visibility,
    /// Clamped capacity.
    pub capacity: u32,
    /// Current host.
    pub host: PeerId,
    /// Members in join order.
    pub members: Vec<PeerId>,
}

impl SimSession {
    fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            name: self.id.clone(),
            member_count: self.members.len() as u32,
            visibility: self.visibility,
            capacity: self.capacity,
        }
    }

    fn payload(&self, joining: &str) -> SessionPayload {
        SessionPayload {
            id: self.id.clone(),
            name: self.id.clone(),
            visibility: self.visibility,
            capacity: self.capacity,
            host: self.host.clone(),
            existing_peers: self.members.iter().filter(|m| *m != joining).cloned().collect(),
        }
    }
}

/// Per-client transport state, shared between the server and one backend.
#[derive(Debug, Default)]
pub(crate) struct ClientLink {
    pub identity: Option<PeerId>,
    pub session: Option<SessionId>,
    pub relay: Option<String>,
    pub sinks: BTreeMap<SubscriptionId, (Channel, EventSink)>,
    pub released: BTreeMap<SubscriptionId, EventSink>,
    pub producing: HashSet<Channel>,
    /// Link opens completed before a link-state listener existed.
    pub deferred_links: Vec<PushEvent>,
    pub calls: Vec<Call>,
    pub failures: Vec<crate::Op>,
}

impl ClientLink {
    /// Push `event` to every listener on exactly `channel`.
    ///
    /// Produced channels only deliver while the server is producing them.
    pub fn deliver(&self, channel: &Channel, event: &PushEvent) -> usize {
        if channel.is_produced() && !self.producing.contains(channel) {
            return 0;
        }
        let mut delivered = 0;
        for (_, sink) in self.sinks.values().filter(|(c, _)| c == channel) {
            if sink.push(event.clone()) {
                delivered += 1;
            }
        }
        delivered
    }
}

pub(crate) type SharedLink = Arc<Mutex<ClientLink>>;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub(crate) struct ServerState {
    pub info: ServerInfo,
    pub env: SimEnv,
    pub clients: BTreeMap<PeerId, SharedLink>,
    pub sessions: BTreeMap<SessionId, SimSession>,
    pub link_policy: LinkPolicy,
    rng: ChaCha8Rng,
}

impl ServerState {
    fn broadcast(&self, channel: &Channel, event: &PushEvent) {
        for link in self.clients.values() {
            lock(link).deliver(channel, event);
        }
    }

    pub fn send_to(&self, identity: &str, channel: &Channel, event: &PushEvent) {
        if let Some(link) = self.clients.get(identity) {
            lock(link).deliver(channel, event);
        }
    }

    pub fn public_sessions(&self) -> Vec<SessionInfo> {
        self.sessions.values().filter(|s| s.visibility.is_public()).map(SimSession::info).collect()
    }

    pub fn online(&self) -> Vec<PeerId> {
        self.clients.keys().cloned().collect()
    }

    pub fn notify_sessions_changed(&self) {
        self.broadcast(&Channel::SessionList, &PushEvent::SessionList(self.public_sessions()));
    }

    pub fn notify_presence(&self) {
        self.broadcast(&Channel::Presence, &PushEvent::Presence(self.online()));
    }

    pub fn chat(&self, author: &str, text: &str) -> ChatMessage {
        ChatMessage {
            author: author.to_string(),
            text: text.to_string(),
            timestamp: self.env.timestamp(),
        }
    }

    fn generate_code(&mut self) -> SessionId {
        loop {
            let code: String = (0..SESSION_CODE_LEN)
                .map(|_| {
                    let index = self.rng.gen_range(0..SESSION_CODE_CHARS.len());
                    SESSION_CODE_CHARS[index] as char
                })
                .collect();
            if !self.sessions.contains_key(&code) {
                return code;
            }
        }
    }

    pub fn create_session(&mut self, host: &str, public: bool, capacity: u32) -> SessionPayload {
        self.remove_member_everywhere(host);

        let id = self.generate_code();
        let session = SimSession {
            id: id.clone(),
            visibility: if public { Visibility::Public } else { Visibility::Private },
            capacity: capacity.clamp(SESSION_MIN_MEMBERS, SESSION_MAX_MEMBERS),
            host: host.to_string(),
            members: vec![host.to_string()],
        };
        let payload = session.payload(host);
        self.sessions.insert(id.clone(), session);
        self.set_client_session(host, Some(id));

        if public {
            self.notify_sessions_changed();
        }
        payload
    }

    pub fn join_session(
        &mut self,
        identity: &str,
        session_id: &str,
    ) -> Result<SessionPayload, SimError> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| SimError::SessionNotFound(session_id.to_string()))?;
        if session.members.iter().any(|m| m == identity) {
            return Ok(session.payload(identity));
        }
        if session.members.len() as u32 >= session.capacity {
            return Err(SimError::SessionFull);
        }

        self.remove_member_everywhere(identity);

        let Some(session) = self.sessions.get_mut(session_id) else {
            return Err(SimError::SessionNotFound(session_id.to_string()));
        };
        session.members.push(identity.to_string());
        let payload = session.payload(identity);
        let public = session.visibility.is_public();
        let others = payload.existing_peers.clone();
        self.set_client_session(identity, Some(session_id.to_string()));

        let event =
            PushEvent::Membership(MemberEvent { identity: identity.to_string(), joined: true });
        for peer in &others {
            self.send_to(peer, &Channel::Membership, &event);
        }
        if public {
            self.notify_sessions_changed();
        }
        Ok(payload)
    }

    /// Remove `identity` from `session_id`, migrating the host and deleting
    /// the session once empty. Returns `false` if it was not a member.
    pub fn remove_member(&mut self, session_id: &str, identity: &str) -> bool {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return false;
        };
        let before = session.members.len();
        session.members.retain(|m| m != identity);
        if session.members.len() == before {
            return false;
        }

        let public = session.visibility.is_public();
        let remaining = session.members.clone();
        let new_host = (session.host == identity)
            .then(|| remaining.first().cloned())
            .flatten();
        if let Some(host) = &new_host {
            session.host = host.clone();
        }
        if remaining.is_empty() {
            self.sessions.remove(session_id);
        }
        self.set_client_session(identity, None);

        let left =
            PushEvent::Membership(MemberEvent { identity: identity.to_string(), joined: false });
        for peer in &remaining {
            self.send_to(peer, &Channel::Membership, &left);
        }
        if let Some(host) = new_host {
            let event = PushEvent::HostChanged { host };
            for peer in &remaining {
                self.send_to(peer, &Channel::HostChanged, &event);
            }
        }
        if public {
            self.notify_sessions_changed();
        }
        true
    }

    fn remove_member_everywhere(&mut self, identity: &str) {
        let joined: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.members.iter().any(|m| m == identity))
            .map(|s| s.id.clone())
            .collect();
        for session_id in joined {
            self.remove_member(&session_id, identity);
        }
    }

    fn set_client_session(&self, identity: &str, session: Option<SessionId>) {
        if let Some(link) = self.clients.get(identity) {
            let mut link = lock(link);
            link.session = session;
            link.deferred_links.clear();
        }
    }

    /// Drop a client entirely: its memberships, its presence and its
    /// server-side stream production.
    pub fn remove_client(&mut self, identity: &str) -> Option<SharedLink> {
        let link = self.clients.remove(identity)?;
        {
            let mut link = lock(&link);
            link.identity = None;
            link.producing.clear();
            link.deferred_links.clear();
        }
        self.remove_member_everywhere(identity);
        self.notify_presence();
        Some(link)
    }

    /// Open links between `identity` and each peer, on both ends.
    ///
    /// Negotiation finishes asynchronously, so opens for a client that has
    /// no link-state listener yet are held until it subscribes one.
    pub fn open_links(&self, identity: &str, peers: &[PeerId]) {
        if self.link_policy != LinkPolicy::AutoOpen {
            return;
        }
        let Some(own) = self.clients.get(identity) else {
            return;
        };
        for peer in peers {
            let event = PushEvent::LinkState { peer: peer.clone(), state: LinkState::Open };
            let mut link = lock(own);
            if link.deliver(&Channel::LinkState, &event) == 0 {
                link.deferred_links.push(event);
            }
            drop(link);
            self.send_to(
                peer,
                &Channel::LinkState,
                &PushEvent::LinkState { peer: identity.to_string(), state: LinkState::Open },
            );
        }
    }
}

/// Shared handle to the simulated server.
#[derive(Debug, Clone)]
pub struct SimServer {
    state: Arc<Mutex<ServerState>>,
}

impl Default for SimServer {
    fn default() -> Self {
        Self::new(SimEnv::new())
    }
}

impl SimServer {
    /// Relay offered alongside the public STUN entry.
    pub const TURN_RELAY: &'static str = "Frankfurt";

    /// Create a server with one STUN and one TURN relay.
    pub fn new(env: SimEnv) -> Self {
        Self::with_seed(env, 0x5eed_cafe_f00d_d00d)
    }

    /// Create a server with a specific session-code seed.
    pub fn with_seed(env: SimEnv, seed: u64) -> Self {
        let info = ServerInfo {
            name: "Parley Sim".to_string(),
            motd: "Welcome to the simulation".to_string(),
            relays: vec![
                RelayOption::new("Google STUN", "stun:stun.l.google.com:19302"),
                RelayOption::new(Self::TURN_RELAY, "turn:fra.relay.example:3478"),
            ],
        };
        let state = ServerState {
            info,
            env,
            clients: BTreeMap::new(),
            sessions: BTreeMap::new(),
            link_policy: LinkPolicy::default(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ServerState> {
        lock(&self.state)
    }

    /// Create a new client transport bound to this server.
    pub fn backend(&self) -> Arc<SimBackend> {
        Arc::new(SimBackend::new(self.clone()))
    }

    /// Change how peer links behave.
    pub fn set_link_policy(&self, policy: LinkPolicy) {
        self.lock().link_policy = policy;
    }

    /// Server-side view of a session.
    pub fn session(&self, session_id: &str) -> Option<SimSession> {
        self.lock().sessions.get(session_id).cloned()
    }

    /// Identities currently online.
    pub fn online(&self) -> Vec<PeerId> {
        self.lock().online()
    }

    /// Add an identity with no client behind it to a session.
    pub fn add_phantom_member(&self, session_id: &str, identity: &str) -> Result<(), SimError> {
        self.lock().join_session(identity, session_id).map(|_| ())
    }

    /// Remove a phantom member.
    pub fn remove_phantom_member(&self, session_id: &str, identity: &str) -> bool {
        self.lock().remove_member(session_id, identity)
    }

    /// Deliver a link-state change for `peer` to `observer`.
    pub fn push_link_state(&self, observer: &str, peer: &str, state: LinkState) {
        self.lock().send_to(
            observer,
            &Channel::LinkState,
            &PushEvent::LinkState { peer: peer.to_string(), state },
        );
    }

    /// Deliver a host change to every client in a session.
    pub fn migrate_host(&self, session_id: &str, host: &str) {
        let mut state = self.lock();
        let Some(session) = state.sessions.get_mut(session_id) else {
            return;
        };
        session.host = host.to_string();
        let members = session.members.clone();
        let event = PushEvent::HostChanged { host: host.to_string() };
        for member in &members {
            state.send_to(member, &Channel::HostChanged, &event);
        }
    }

    /// Simulate the transport losing `identity`.
    ///
    /// The client is told through its connection-lost listener, then removed
    /// from the server as if its streams had closed.
    pub fn drop_client(&self, identity: &str) -> bool {
        let mut state = self.lock();
        state.send_to(identity, &Channel::ConnectionLost, &PushEvent::ConnectionLost);
        state.remove_client(identity).is_some()
    }

    /// Post a global chat message as `author`.
    pub fn post_global(&self, author: &str, text: &str) {
        let state = self.lock();
        let message = PushEvent::GlobalChat(state.chat(author, text));
        state.broadcast(&Channel::GlobalChat, &message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_use_code_alphabet() {
        let server = SimServer::default();
        let mut state = server.lock();
        for _ in 0..32 {
            let code = state.generate_code();
            assert_eq!(code.len(), SESSION_CODE_LEN);
            assert!(code.bytes().all(|b| SESSION_CODE_CHARS.contains(&b)));
        }
    }

    #[test]
    fn capacity_is_clamped_server_side() {
        let server = SimServer::default();
        let payload = server.lock().create_session("alice", true, 99);
        assert_eq!(payload.capacity, SESSION_MAX_MEMBERS);
        assert_eq!(payload.host, "alice");
        assert!(payload.existing_peers.is_empty());
    }

    #[test]
    fn host_migrates_to_remaining_member() {
        let server = SimServer::default();
        let id = server.lock().create_session("alice", false, 4).id;
        server.add_phantom_member(&id, "bob").ok();

        assert!(server.remove_phantom_member(&id, "alice"));

        let session = server.session(&id);
        assert_eq!(session.map(|s| s.host), Some("bob".to_string()));
    }

    #[test]
    fn empty_session_is_deleted() {
        let server = SimServer::default();
        let id = server.lock().create_session("alice", true, 4).id;
        server.remove_phantom_member(&id, "alice");
        assert!(server.session(&id).is_none());
    }

    #[test]
    fn full_session_rejects_join() {
        let server = SimServer::default();
        let id = server.lock().create_session("alice", true, 2).id;
        assert!(server.add_phantom_member(&id, "bob").is_ok());
        assert!(matches!(server.add_phantom_member(&id, "carol"), Err(SimError::SessionFull)));
    }
}
