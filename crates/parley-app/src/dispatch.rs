//! Push event handlers.
//!
//! Every inbound event carries the subscription it was delivered on. Events
//! from a subscription that is no longer the live one for its channel are
//! dropped before any handler runs.

use parley_core::{Backend, Inbound, LinkState, MemberEvent, PeerId, PushEvent, env::Environment};

use crate::{ClientError, Orchestrator, log::notice};

/// What a link-state change asks of the orchestrator after the state update.
enum LinkFollowUp {
    None,
    Isolated,
    Unreachable,
}

impl<B: Backend, E: Environment> Orchestrator<B, E> {
    /// Route one inbound event to its handler.
    pub async fn dispatch(&self, inbound: Inbound) {
        let Inbound { subscription, event } = inbound;
        let kind = event.kind();

        if !self.with_state(|s| s.streams.is_live(kind, subscription)) {
            tracing::trace!(channel = %kind, %subscription, "dropping stale delivery");
            return;
        }

        match event {
            PushEvent::SessionList(sessions) => self.apply_session_list(sessions).await,
            PushEvent::Presence(online) => self.with_state(|s| s.presence = online),
            PushEvent::GlobalChat(message) => {
                self.with_state(|s| s.global_log.push_message(message));
            },
            PushEvent::SessionChat(message) => self.with_state(|s| {
                if s.session.current.is_some() {
                    s.session_log.push_message(message);
                }
            }),
            PushEvent::LinkState { peer, state } => self.on_link_state(peer, state).await,
            PushEvent::Membership(event) => self.on_membership(event).await,
            PushEvent::HostChanged { host } => self.on_host_changed(&host),
            PushEvent::ConnectionLost => self.handle_connection_lost().await,
        }
    }

    async fn on_link_state(&self, peer: PeerId, state: LinkState) {
        tracing::debug!(%peer, state = %state, "link state");

        let follow_up = self.with_state(|s| {
            if s.session.current.is_none() || s.session.left.contains(&peer) {
                return LinkFollowUp::None;
            }
            s.session.peer_links.insert(peer.clone(), state);

            match state {
                LinkState::Open => {
                    if s.session.pending.remove(&peer) {
                        s.session_log
                            .rewrite_last_notice(&notice::connecting(&peer), notice::joined(&peer));
                    }
                    LinkFollowUp::None
                },
                LinkState::Failed => {
                    if !s.session.failed.insert(peer.clone()) {
                        return LinkFollowUp::None;
                    }
                    if !s.session.is_owner && !s.session.any_other_open(&peer) {
                        LinkFollowUp::Isolated
                    } else {
                        LinkFollowUp::Unreachable
                    }
                },
                LinkState::Checking
                | LinkState::Connected
                | LinkState::Disconnected
                | LinkState::Closed => LinkFollowUp::None,
            }
        });

        match follow_up {
            LinkFollowUp::None => {},
            LinkFollowUp::Unreachable => self.surface(ClientError::PeerUnreachable { peer }),
            LinkFollowUp::Isolated => {
                tracing::warn!(%peer, "no reachable peers left, leaving session");
                self.leave_session().await;
                self.surface(ClientError::Isolated { peer });
            },
        }
    }

    async fn on_membership(&self, event: MemberEvent) {
        let MemberEvent { identity: peer, joined } = event;

        let Some(session_id) = self.with_state(|s| {
            let id = s.session.current_id()?;
            (s.identity.as_ref() != Some(&peer)).then_some(id)
        }) else {
            return;
        };

        let timestamp = self.env.timestamp();
        if joined {
            tracing::info!(%peer, "peer joined");
            self.with_state(|s| {
                s.session.failed.remove(&peer);
                s.session.left.remove(&peer);
                s.session.pending.insert(peer.clone());
                s.session_log.push_notice(notice::connecting(&peer), timestamp);
            });
        } else {
            tracing::info!(%peer, "peer left");
            if let Err(e) = self.backend.close_peer_link(&peer).await {
                tracing::debug!(%peer, "close peer link failed: {e}");
            }

            self.with_state(|s| {
                if !s.session.is_current(&session_id) {
                    return;
                }
                let was_pending = s.session.pending.remove(&peer);
                let rewritten = was_pending
                    && s.session_log
                        .rewrite_last_notice(&notice::connecting(&peer), notice::left(&peer));
                if !rewritten {
                    s.session_log.push_notice(notice::left(&peer), timestamp);
                }
                s.session.peer_links.remove(&peer);
                s.session.left.insert(peer.clone());
            });
        }

        if self.is_current(&session_id) {
            self.fetch_members(&session_id).await;
        }
    }

    fn on_host_changed(&self, host: &str) {
        let timestamp = self.env.timestamp();
        self.with_state(|s| {
            if s.session.current.is_none() {
                return;
            }
            let local = s.identity.as_deref();
            s.session.is_owner = local == Some(host);
            s.session_log.push_notice(notice::host_changed(host, local), timestamp);
            s.session.host = Some(host.to_string());
        });
        tracing::info!(%host, "host changed");
    }
}
