//! Simulated transport implementing [`Backend`].
//!
//! Every call is recorded in order, may be scripted to fail once, and is
//! applied to the shared [`SimServer`]. Slow operations can be held at a gate
//! so tests can overlap operations deterministically.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use parley_core::{
    Backend, Channel, ChannelKind, EventSink, PeerId, PushEvent, ServerInfo, SessionId,
    SessionInfo, SessionPayload, SubscriptionId,
};
use thiserror::Error;
use tokio::sync::watch;

use crate::sim_server::{ClientLink, SharedLink, SimServer, lock};

/// Errors returned by the simulated transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// No transport session.
    #[error("not connected")]
    NotConnected,

    /// Identity already online, or this transport is already connected.
    #[error("identity {0} is already online")]
    AlreadyConnected(PeerId),

    /// Unknown session code.
    #[error("Session '{0}' not found")]
    SessionNotFound(SessionId),

    /// Session at capacity.
    #[error("Session is full")]
    SessionFull,

    /// Session operation outside a session.
    #[error("not in a session")]
    NotInSession,

    /// Relay not advertised by the server.
    #[error("unknown relay {0}")]
    UnknownRelay(String),

    /// Scripted failure.
    #[error("injected failure in {0:?}")]
    Injected(Op),
}

/// Backend operation, used to script failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// [`Backend::connect`]
    Connect,
    /// [`Backend::disconnect`]
    Disconnect,
    /// [`Backend::get_server_info`]
    GetServerInfo,
    /// [`Backend::list_sessions`]
    ListSessions,
    /// [`Backend::get_members`]
    GetMembers,
    /// [`Backend::create_session`]
    CreateSession,
    /// [`Backend::join_session`]
    JoinSession,
    /// [`Backend::leave_session`]
    LeaveSession,
    /// [`Backend::establish_peer_links`]
    EstablishPeerLinks,
    /// [`Backend::teardown_peer_links`]
    TeardownPeerLinks,
    /// [`Backend::close_peer_link`]
    ClosePeerLink,
    /// [`Backend::set_relay`]
    SetRelay,
    /// [`Backend::send_global_message`]
    SendGlobalMessage,
    /// [`Backend::send_session_message`]
    SendSessionMessage,
    /// [`Backend::subscribe`]
    Subscribe,
    /// [`Backend::start_stream`]
    StartStream,
    /// [`Backend::stop_stream`]
    StopStream,
}

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// Transport opened.
    Connect {
        /// Host.
        host: String,
        /// Port.
        port: u16,
        /// Identity.
        identity: String,
    },
    /// Transport closed.
    Disconnect,
    /// Server info fetched.
    GetServerInfo,
    /// Session list fetched.
    ListSessions,
    /// Members fetched.
    GetMembers(SessionId),
    /// Session created.
    CreateSession {
        /// Requested visibility.
        public: bool,
        /// Requested capacity.
        capacity: u32,
    },
    /// Session joined.
    JoinSession(SessionId),
    /// Session left.
    LeaveSession(SessionId),
    /// Peer links requested.
    EstablishPeerLinks {
        /// Session.
        session_id: SessionId,
        /// Peers to link with.
        peers: Vec<PeerId>,
        /// Relay in use.
        relay: Option<String>,
    },
    /// All peer links closed.
    TeardownPeerLinks,
    /// One peer link closed.
    ClosePeerLink(PeerId),
    /// Relay selected.
    SetRelay(Option<String>),
    /// Global chat sent.
    SendGlobalMessage(String),
    /// Session chat sent.
    SendSessionMessage(String),
    /// Listener registered.
    Subscribe(ChannelKind, SubscriptionId),
    /// Listener removed.
    Unsubscribe(SubscriptionId),
    /// Stream production started.
    StartStream(ChannelKind),
    /// Stream production stopped.
    StopStream(ChannelKind),
}

/// Client transport bound to a [`SimServer`].
#[derive(Debug)]
pub struct SimBackend {
    server: SimServer,
    link: SharedLink,
    held: watch::Sender<HashSet<Op>>,
}

impl SimBackend {
    pub(crate) fn new(server: SimServer) -> Self {
        let (held, _) = watch::channel(HashSet::new());
        Self { server, link: Arc::new(Mutex::new(ClientLink::default())), held }
    }

    /// Server this transport talks to.
    pub fn server(&self) -> &SimServer {
        &self.server
    }

    /// Identity of the open transport session.
    pub fn identity(&self) -> Option<PeerId> {
        lock(&self.link).identity.clone()
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        lock(&self.link).calls.clone()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        lock(&self.link).calls.clear();
    }

    /// Make the next call of `op` fail.
    pub fn fail_next(&self, op: Op) {
        lock(&self.link).failures.push(op);
    }

    /// Park calls of `op` until [`release`](Self::release).
    ///
    /// Applies to connect, server-info fetches, create, join, leave, member
    /// fetches and peer-link establishment. The call is recorded before it
    /// parks, and a parked connect registers its identity only once released.
    pub fn hold(&self, op: Op) {
        self.held.send_modify(|held| {
            held.insert(op);
        });
    }

    /// Let parked calls of `op` proceed.
    pub fn release(&self, op: Op) {
        self.held.send_modify(|held| {
            held.remove(&op);
        });
    }

    /// Number of registered listeners.
    pub fn subscription_count(&self) -> usize {
        lock(&self.link).sinks.len()
    }

    /// Number of registered listeners of one kind.
    pub fn subscriptions_of(&self, kind: ChannelKind) -> usize {
        lock(&self.link).sinks.values().filter(|(c, _)| c.kind() == kind).count()
    }

    /// Channels the server is currently producing for this client.
    pub fn producing(&self) -> HashSet<Channel> {
        lock(&self.link).producing.clone()
    }

    /// Deliver an event through a listener that was already unsubscribed,
    /// as a transport would for an event in flight during the unsubscribe.
    pub fn push_released(&self, id: SubscriptionId, event: PushEvent) -> bool {
        lock(&self.link).released.get(&id).is_some_and(|sink| sink.push(event))
    }

    /// Deliver an event through every live listener of its kind, bypassing
    /// the server.
    pub fn push(&self, event: PushEvent) -> usize {
        let link = lock(&self.link);
        let kind = event.kind();
        let mut delivered = 0;
        for (_, sink) in link.sinks.values().filter(|(c, _)| c.kind() == kind) {
            if sink.push(event.clone()) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Record `call` and consume a scripted failure for `op`.
    fn begin(&self, op: Op, call: Call) -> Result<(), SimError> {
        let mut link = lock(&self.link);
        link.calls.push(call);
        match link.failures.iter().position(|f| *f == op) {
            Some(index) => {
                link.failures.remove(index);
                tracing::debug!(?op, "injected failure");
                Err(SimError::Injected(op))
            },
            None => Ok(()),
        }
    }

    fn require_identity(&self) -> Result<PeerId, SimError> {
        lock(&self.link).identity.clone().ok_or(SimError::NotConnected)
    }

    async fn pass_gate(&self, op: Op) {
        let mut rx = self.held.subscribe();
        let open = rx.wait_for(|held| !held.contains(&op)).await.is_ok();
        if !open {
            tracing::debug!(?op, "gate dropped");
        }
    }
}

impl Backend for SimBackend {
    type Error = SimError;

    async fn connect(&self, host: &str, port: u16, identity: &str) -> Result<(), SimError> {
        self.begin(
            Op::Connect,
            Call::Connect { host: host.to_string(), port, identity: identity.to_string() },
        )?;
        self.pass_gate(Op::Connect).await;

        let mut server = self.server.lock();
        {
            let mut link = lock(&self.link);
            if link.identity.is_some() || server.clients.contains_key(identity) {
                return Err(SimError::AlreadyConnected(identity.to_string()));
            }
            link.identity = Some(identity.to_string());
        }
        server.clients.insert(identity.to_string(), Arc::clone(&self.link));
        server.notify_presence();
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), SimError> {
        self.begin(Op::Disconnect, Call::Disconnect)?;
        let identity = self.require_identity()?;
        self.server.lock().remove_client(&identity);
        Ok(())
    }

    async fn get_server_info(&self) -> Result<ServerInfo, SimError> {
        self.begin(Op::GetServerInfo, Call::GetServerInfo)?;
        self.pass_gate(Op::GetServerInfo).await;
        self.require_identity()?;
        Ok(self.server.lock().info.clone())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionInfo>, SimError> {
        self.begin(Op::ListSessions, Call::ListSessions)?;
        self.require_identity()?;
        Ok(self.server.lock().public_sessions())
    }

    async fn get_members(&self, session_id: &str) -> Result<Vec<PeerId>, SimError> {
        self.begin(Op::GetMembers, Call::GetMembers(session_id.to_string()))?;
        self.pass_gate(Op::GetMembers).await;
        self.require_identity()?;
        self.server
            .lock()
            .sessions
            .get(session_id)
            .map(|s| s.members.clone())
            .ok_or_else(|| SimError::SessionNotFound(session_id.to_string()))
    }

    async fn create_session(&self, public: bool, capacity: u32) -> Result<SessionPayload, SimError> {
        self.begin(Op::CreateSession, Call::CreateSession { public, capacity })?;
        self.pass_gate(Op::CreateSession).await;
        let identity = self.require_identity()?;
        Ok(self.server.lock().create_session(&identity, public, capacity))
    }

    async fn join_session(&self, session_id: &str) -> Result<SessionPayload, SimError> {
        self.begin(Op::JoinSession, Call::JoinSession(session_id.to_string()))?;
        self.pass_gate(Op::JoinSession).await;
        let identity = self.require_identity()?;
        self.server.lock().join_session(&identity, session_id)
    }

    async fn leave_session(&self, session_id: &str) -> Result<(), SimError> {
        self.begin(Op::LeaveSession, Call::LeaveSession(session_id.to_string()))?;
        self.pass_gate(Op::LeaveSession).await;
        let identity = self.require_identity()?;
        self.server.lock().remove_member(session_id, &identity);
        Ok(())
    }

    async fn establish_peer_links(
        &self,
        session_id: &str,
        existing_peers: &[PeerId],
        relay: Option<&str>,
    ) -> Result<(), SimError> {
        self.begin(
            Op::EstablishPeerLinks,
            Call::EstablishPeerLinks {
                session_id: session_id.to_string(),
                peers: existing_peers.to_vec(),
                relay: relay.map(str::to_string),
            },
        )?;
        self.pass_gate(Op::EstablishPeerLinks).await;
        let identity = self.require_identity()?;
        let server = self.server.lock();
        if !server.sessions.get(session_id).is_some_and(|s| s.members.contains(&identity)) {
            return Err(SimError::NotInSession);
        }
        server.open_links(&identity, existing_peers);
        Ok(())
    }

    async fn teardown_peer_links(&self) -> Result<(), SimError> {
        self.begin(Op::TeardownPeerLinks, Call::TeardownPeerLinks)
    }

    async fn close_peer_link(&self, peer: &str) -> Result<(), SimError> {
        self.begin(Op::ClosePeerLink, Call::ClosePeerLink(peer.to_string()))
    }

    async fn set_relay(&self, name: Option<&str>) -> Result<(), SimError> {
        self.begin(Op::SetRelay, Call::SetRelay(name.map(str::to_string)))?;
        if let Some(name) = name
            && !self.server.lock().info.has_relay(name)
        {
            return Err(SimError::UnknownRelay(name.to_string()));
        }
        lock(&self.link).relay = name.map(str::to_string);
        Ok(())
    }

    async fn send_global_message(&self, text: &str) -> Result<(), SimError> {
        self.begin(Op::SendGlobalMessage, Call::SendGlobalMessage(text.to_string()))?;
        let identity = self.require_identity()?;
        let server = self.server.lock();
        let event = PushEvent::GlobalChat(server.chat(&identity, text));
        for peer in server.online() {
            server.send_to(&peer, &Channel::GlobalChat, &event);
        }
        Ok(())
    }

    async fn send_session_message(&self, text: &str) -> Result<(), SimError> {
        self.begin(Op::SendSessionMessage, Call::SendSessionMessage(text.to_string()))?;
        let identity = self.require_identity()?;
        let session_id = lock(&self.link).session.clone().ok_or(SimError::NotInSession)?;

        let server = self.server.lock();
        let members =
            server.sessions.get(&session_id).map(|s| s.members.clone()).unwrap_or_default();
        let channel = Channel::SessionChat { session_id };
        let event = PushEvent::SessionChat(server.chat(&identity, text));
        for member in &members {
            server.send_to(member, &channel, &event);
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &Channel, sink: EventSink) -> Result<(), SimError> {
        self.begin(Op::Subscribe, Call::Subscribe(channel.kind(), sink.id()))?;
        let mut link = lock(&self.link);
        if *channel == Channel::LinkState {
            for event in std::mem::take(&mut link.deferred_links) {
                sink.push(event);
            }
        }
        link.sinks.insert(sink.id(), (channel.clone(), sink));
        Ok(())
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        let mut link = lock(&self.link);
        link.calls.push(Call::Unsubscribe(id));
        if let Some((_, sink)) = link.sinks.remove(&id) {
            link.released.insert(id, sink);
        }
    }

    async fn start_stream(&self, channel: &Channel) -> Result<(), SimError> {
        self.begin(Op::StartStream, Call::StartStream(channel.kind()))?;
        let identity = self.require_identity()?;

        let server = self.server.lock();
        lock(&self.link).producing.insert(channel.clone());

        // Snapshot streams open with the current value.
        let initial = match channel {
            Channel::SessionList => Some(PushEvent::SessionList(server.public_sessions())),
            Channel::Presence => Some(PushEvent::Presence(server.online())),
            _ => None,
        };
        if let Some(event) = initial {
            server.send_to(&identity, channel, &event);
        }
        Ok(())
    }

    async fn stop_stream(&self, channel: &Channel) -> Result<(), SimError> {
        self.begin(Op::StopStream, Call::StopStream(channel.kind()))?;
        lock(&self.link).producing.remove(channel);
        Ok(())
    }
}
