//! Standard invariant checks.
//!
//! These invariants capture behavioral properties that must always hold once
//! the client is quiescent (no operation in flight, inbound queue drained).

use parley_app::{ActiveChannel, ConnectionState};
use parley_core::{Channel, ChannelKind};

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// A current session implies a live connection.
pub struct SessionRequiresConnection;

impl Invariant for SessionRequiresConnection {
    fn name(&self) -> &'static str {
        "session_requires_connection"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let view = &client.view;
            if let Some(session) = &view.session
                && view.connection != ConnectionState::Connected
            {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "{:?}: in session {} while {:?}",
                        view.identity, session.id, view.connection
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Without a session, nothing session-scoped remains.
///
/// Peer links, pending notices, host, session log and session listeners are
/// all empty, and chat routes to the global channel.
pub struct SessionScopeCleared;

impl Invariant for SessionScopeCleared {
    fn name(&self) -> &'static str {
        "session_scope_cleared"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let view = &client.view;
            if view.session.is_some() {
                continue;
            }

            let mut leftovers = Vec::new();
            if !view.peer_links.is_empty() {
                leftovers.push(format!("peer_links {:?}", view.peer_links));
            }
            if !view.pending_connect.is_empty() {
                leftovers.push(format!("pending {:?}", view.pending_connect));
            }
            if view.host.is_some() || view.is_owner {
                leftovers.push(format!("host {:?} owner {}", view.host, view.is_owner));
            }
            if !view.session_log.is_empty() {
                leftovers.push(format!("session log of {} entries", view.session_log.len()));
            }
            if view.active_channel != ActiveChannel::Global {
                leftovers.push("active channel is session".to_string());
            }
            let session_listeners: Vec<_> =
                view.subscriptions.keys().filter(|k| k.is_session_scoped()).collect();
            if !session_listeners.is_empty() {
                leftovers.push(format!("listeners {session_listeners:?}"));
            }

            if !leftovers.is_empty() {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("{:?}: {}", view.identity, leftovers.join(", ")),
                });
            }
        }
        Ok(())
    }
}

/// The transport holds exactly the listeners the client believes are live.
pub struct NoLeakedListeners;

impl Invariant for NoLeakedListeners {
    fn name(&self) -> &'static str {
        "no_leaked_listeners"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let live = client.view.subscriptions.len();
            if client.transport_listeners != live {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "{:?}: transport holds {} listeners, client tracks {} ({:?})",
                        client.view.identity,
                        client.transport_listeners,
                        live,
                        client.view.subscriptions.keys().collect::<Vec<_>>()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// A disconnected client holds no listeners and no server data.
pub struct DisconnectedIsEmpty;

impl Invariant for DisconnectedIsEmpty {
    fn name(&self) -> &'static str {
        "disconnected_is_empty"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let view = &client.view;
            if view.connection != ConnectionState::Disconnected {
                continue;
            }
            if !view.subscriptions.is_empty()
                || view.server.is_some()
                || !view.sessions.is_empty()
                || !view.presence.is_empty()
                || !view.global_log.is_empty()
            {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "disconnected client keeps {} listeners, server {:?}, {} sessions",
                        view.subscriptions.len(),
                        view.server.as_ref().map(|s| &s.name),
                        view.sessions.len()
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Session chat is only produced for the current session.
pub struct SessionChatMatchesSession;

impl Invariant for SessionChatMatchesSession {
    fn name(&self) -> &'static str {
        "session_chat_matches_session"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let current = client.view.session.as_ref().map(|s| s.id.as_str());
            for channel in &client.producing {
                if let Channel::SessionChat { session_id } = channel
                    && current != Some(session_id.as_str())
                {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "{:?}: producing chat of {session_id} while in {current:?}",
                            client.view.identity
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Ownership agrees with the recorded host.
pub struct OwnerMatchesHost;

impl Invariant for OwnerMatchesHost {
    fn name(&self) -> &'static str {
        "owner_matches_host"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let view = &client.view;
            if view.session.is_none() {
                continue;
            }
            let expected = view.host.is_some() && view.host == view.identity;
            if view.is_owner != expected {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "{:?}: is_owner={} but host is {:?}",
                        view.identity, view.is_owner, view.host
                    ),
                });
            }
        }
        Ok(())
    }
}

/// The transport holds at most one listener per channel kind, and no session
/// chat listener exists without a session.
pub struct ListenerPerChannel;

impl Invariant for ListenerPerChannel {
    fn name(&self) -> &'static str {
        "listener_per_channel"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for client in &state.clients {
            let view = &client.view;
            if let Some((kind, count)) = client.listeners_by_kind.iter().find(|(_, n)| **n > 1) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("{:?}: {count} {kind} listeners", view.identity),
                });
            }
            let chat = view.subscriptions.contains_key(&ChannelKind::SessionChat);
            if chat && view.session.is_none() {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("{:?}: session chat listener without session", view.identity),
                });
            }
        }
        Ok(())
    }
}
