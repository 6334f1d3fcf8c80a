//! UI-facing facade.
//!
//! [`Store`] exposes read accessors over the client state and the action
//! surface. Actions never return errors: failures land in the error banner
//! read through [`Store::error`].

use std::collections::BTreeMap;

use parley_core::{
    Backend, LinkState, PeerId, RelayOption, ServerInfo, SessionInfo, Visibility,
    env::Environment,
};

use crate::{
    JoinOutcome, Orchestrator,
    log::MessageLog,
    state::{ActiveChannel, ClientView, ConnectionState, SavedServer, Session},
};

/// Cloneable handle for the UI.
pub struct Store<B: Backend, E: Environment> {
    orchestrator: Orchestrator<B, E>,
}

impl<B: Backend, E: Environment> Clone for Store<B, E> {
    fn clone(&self) -> Self {
        Self { orchestrator: self.orchestrator.clone() }
    }
}

impl<B: Backend, E: Environment> Store<B, E> {
    pub(crate) fn new(orchestrator: Orchestrator<B, E>) -> Self {
        Self { orchestrator }
    }

    /// Snapshot of everything observable.
    pub fn view(&self) -> ClientView {
        self.orchestrator.view()
    }

    /// Connection lifecycle.
    pub fn connection_state(&self) -> ConnectionState {
        self.orchestrator.with_state(|s| s.connection)
    }

    /// Server info, present once connected.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.orchestrator.with_state(|s| s.server.clone())
    }

    /// Relays the user may choose from.
    pub fn relay_options(&self) -> Vec<RelayOption> {
        self.orchestrator.with_state(|s| {
            s.server.as_ref().map(|i| i.relay_options().cloned().collect()).unwrap_or_default()
        })
    }

    /// Selected relay.
    pub fn relay(&self) -> Option<String> {
        self.orchestrator.with_state(|s| s.relay.clone())
    }

    /// Current session.
    pub fn current_session(&self) -> Option<Session> {
        self.orchestrator.with_state(|s| s.session.current.clone())
    }

    /// Current host.
    pub fn host(&self) -> Option<PeerId> {
        self.orchestrator.with_state(|s| s.session.host.clone())
    }

    /// Whether the local identity hosts the current session.
    pub fn is_owner(&self) -> bool {
        self.orchestrator.with_state(|s| s.session.is_owner)
    }

    /// Link state per peer.
    pub fn peer_links(&self) -> BTreeMap<PeerId, LinkState> {
        self.orchestrator.with_state(|s| s.session.peer_links.clone())
    }

    /// Public session list.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.orchestrator.with_state(|s| s.registry.sessions().to_vec())
    }

    /// Cached members of any session.
    pub fn session_members(&self, session_id: &str) -> Option<Vec<PeerId>> {
        self.orchestrator.with_state(|s| s.registry.members(session_id).map(<[PeerId]>::to_vec))
    }

    /// Online identities.
    pub fn presence(&self) -> Vec<PeerId> {
        self.orchestrator.with_state(|s| s.presence.clone())
    }

    /// Global channel log.
    pub fn global_log(&self) -> MessageLog {
        self.orchestrator.with_state(|s| s.global_log.clone())
    }

    /// Session channel log.
    pub fn session_log(&self) -> MessageLog {
        self.orchestrator.with_state(|s| s.session_log.clone())
    }

    /// Outgoing chat route.
    pub fn active_channel(&self) -> ActiveChannel {
        self.orchestrator.with_state(|s| s.active_channel)
    }

    /// Visible error text, `None` once expired.
    pub fn error(&self) -> Option<String> {
        self.orchestrator.error_text()
    }

    /// Saved servers.
    pub fn saved_servers(&self) -> Vec<SavedServer> {
        self.orchestrator.with_state(|s| s.saved_servers.clone())
    }

    /// Add a saved server. Returns `false` if the address is already saved.
    pub fn add_saved_server(&self, server: SavedServer) -> bool {
        self.orchestrator.with_state(|s| {
            if s.saved_servers.iter().any(|e| e.matches(&server.host, server.port)) {
                return false;
            }
            s.saved_servers.push(server);
            true
        })
    }

    /// Remove a saved server. Returns whether one was removed.
    pub fn remove_saved_server(&self, host: &str, port: u16) -> bool {
        self.orchestrator.with_state(|s| {
            let before = s.saved_servers.len();
            s.saved_servers.retain(|e| !e.matches(host, port));
            s.saved_servers.len() != before
        })
    }

    /// See [`Orchestrator::connect`].
    pub async fn connect(&self, host: &str, port: u16, identity: &str) {
        self.orchestrator.connect(host, port, identity).await;
    }

    /// See [`Orchestrator::disconnect`].
    pub async fn disconnect(&self) {
        self.orchestrator.disconnect().await;
    }

    /// See [`Orchestrator::set_relay`].
    pub async fn set_relay(&self, name: Option<&str>) {
        self.orchestrator.set_relay(name).await;
    }

    /// See [`Orchestrator::refresh_sessions`].
    pub async fn refresh_sessions(&self) {
        self.orchestrator.refresh_sessions().await;
    }

    /// See [`Orchestrator::fetch_members`].
    pub async fn fetch_members(&self, session_id: &str) {
        self.orchestrator.fetch_members(session_id).await;
    }

    /// See [`Orchestrator::create_session`].
    pub async fn create_session(&self, visibility: Visibility, capacity: u32) -> JoinOutcome {
        self.orchestrator.create_session(visibility, capacity).await
    }

    /// See [`Orchestrator::enter_session`].
    pub async fn enter_session(&self, code: &str) -> JoinOutcome {
        self.orchestrator.enter_session(code).await
    }

    /// See [`Orchestrator::leave_session`].
    pub async fn leave_session(&self) {
        self.orchestrator.leave_session().await;
    }

    /// See [`Orchestrator::send_message`].
    pub async fn send_message(&self, text: &str) {
        self.orchestrator.send_message(text).await;
    }

    /// See [`Orchestrator::set_active_channel`].
    pub fn set_active_channel(&self, channel: ActiveChannel) {
        self.orchestrator.set_active_channel(channel);
    }
}
