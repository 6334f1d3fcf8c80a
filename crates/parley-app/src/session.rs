//! Session lifecycle: create, enter, join and leave.
//!
//! At most one create or enter runs at a time. The in-flight flag is owned by
//! a [`TransitionGuard`], so it is released on every exit path, including the
//! future being dropped mid-await. A leave raises its own flag so that a new
//! join cannot start while the old session's cleanup is still running.

#![allow(clippy::disallowed_types, reason = "Guard only touches the state lock in Drop")]

use std::sync::{Mutex, PoisonError};

use parley_core::{
    Backend, Channel, ChannelKind, SessionId, SessionPayload, Visibility, env::Environment,
    normalize_session_code,
};

use crate::{
    ClientError, Orchestrator,
    log::notice,
    state::{ActiveChannel, ClientState, ConnectionState},
};

/// Result of a create or enter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The session is current and every session stream is attached.
    Joined(SessionId),
    /// Another join was in flight, a session was current, or a leave was
    /// running. Nothing happened.
    Skipped,
    /// The attempt failed; the error was surfaced.
    Failed,
    /// The session was left or the connection dropped while joining.
    Abandoned,
}

#[derive(Debug, Clone, Copy)]
enum Transition {
    Join,
    Leave,
}

/// Clears a transition flag when dropped.
struct TransitionGuard<'a, I> {
    state: &'a Mutex<ClientState<I>>,
    transition: Transition,
}

impl<I> Drop for TransitionGuard<'_, I> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match self.transition {
            Transition::Join => state.join_in_flight = false,
            Transition::Leave => state.leaving = false,
        }
    }
}

impl<B: Backend, E: Environment> Orchestrator<B, E> {
    /// Check-and-set the join flag in one critical section.
    fn begin_join(&self) -> Result<Option<TransitionGuard<'_, E::Instant>>, ClientError> {
        let acquired = self.with_state(|s| {
            if s.session.current.is_some() || s.join_in_flight || s.leaving {
                return Ok(false);
            }
            if s.connection != ConnectionState::Connected {
                return Err(ClientError::NotConnected);
            }
            s.join_in_flight = true;
            s.error = None;
            Ok(true)
        })?;

        Ok(acquired
            .then(|| TransitionGuard { state: self.state_lock(), transition: Transition::Join }))
    }

    /// Create and join a new session hosted by the local identity.
    pub async fn create_session(&self, visibility: Visibility, capacity: u32) -> JoinOutcome {
        let _guard = match self.begin_join() {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                tracing::debug!("create ignored: join in flight or session current");
                return JoinOutcome::Skipped;
            },
            Err(error) => {
                self.surface(error);
                return JoinOutcome::Failed;
            },
        };

        let capacity = self.config.clamp_capacity(capacity);
        tracing::info!(?visibility, capacity, "creating session");

        match self.backend.create_session(visibility.is_public(), capacity).await {
            Ok(payload) => self.join_channel(payload).await,
            Err(e) => {
                self.surface(ClientError::rpc(&e));
                JoinOutcome::Failed
            },
        }
    }

    /// Join an existing session by code.
    ///
    /// The code is trimmed and uppercased before it is sent.
    pub async fn enter_session(&self, code: &str) -> JoinOutcome {
        let _guard = match self.begin_join() {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                tracing::debug!("enter ignored: join in flight or session current");
                return JoinOutcome::Skipped;
            },
            Err(error) => {
                self.surface(error);
                return JoinOutcome::Failed;
            },
        };

        let session_id = match normalize_session_code(code) {
            Ok(id) => id,
            Err(e) => {
                self.surface(e.into());
                return JoinOutcome::Failed;
            },
        };
        tracing::info!(session = %session_id, "entering session");

        match self.backend.join_session(&session_id).await {
            Ok(payload) => self.join_channel(payload).await,
            Err(e) => {
                self.surface(ClientError::rpc(&e));
                JoinOutcome::Failed
            },
        }
    }

    /// Commit a session and bring up its peer links and streams.
    ///
    /// After every await the session is checked to still be current; if it
    /// is not, the join stops and anything it attached is released again.
    async fn join_channel(&self, payload: SessionPayload) -> JoinOutcome {
        let session_id = payload.id.clone();

        let committed = self.with_state(|s| {
            if s.connection != ConnectionState::Connected {
                return false;
            }
            s.reset_session();
            s.session.commit(&payload, s.identity.as_deref());
            s.active_channel = ActiveChannel::Session;
            true
        });
        if !committed {
            tracing::debug!(session = %session_id, "connection gone before commit");
            return JoinOutcome::Abandoned;
        }
        tracing::info!(session = %session_id, host = %payload.host, "session committed");

        self.fetch_members(&session_id).await;
        if !self.is_current(&session_id) {
            return JoinOutcome::Abandoned;
        }

        let timestamp = self.env.timestamp();
        self.with_state(|s| {
            let local = s.identity.clone();
            for peer in &payload.existing_peers {
                if local.as_ref() == Some(peer) {
                    continue;
                }
                s.session.pending.insert(peer.clone());
                s.session_log.push_notice(notice::connecting(peer), timestamp);
            }
        });

        let relay = self.with_state(|s| s.relay.clone());
        let links = self
            .backend
            .establish_peer_links(&session_id, &payload.existing_peers, relay.as_deref())
            .await;
        if !self.is_current(&session_id) {
            return JoinOutcome::Abandoned;
        }
        if let Err(e) = links {
            self.surface(ClientError::rpc(&e));
        }

        let channels = [
            Channel::SessionChat { session_id: session_id.clone() },
            Channel::LinkState,
            Channel::Membership,
            Channel::HostChanged,
        ];
        for channel in channels {
            let kind = channel.kind();
            match self.attach_while(channel, None, |s| s.session.is_current(&session_id)).await {
                Ok(true) => {},
                Ok(false) => return JoinOutcome::Abandoned,
                Err(e) => {
                    tracing::warn!(channel = %kind, "session stream failed: {e}");
                    self.surface(ClientError::rpc(&e));
                },
            }
        }

        tracing::info!(session = %session_id, "joined");
        JoinOutcome::Joined(session_id)
    }

    pub(crate) fn is_current(&self, session_id: &str) -> bool {
        self.with_state(|s| s.session.is_current(session_id))
    }

    /// Leave the current session.
    ///
    /// Session state is cleared before the first await. The remote leave is
    /// best effort with its error surfaced; peer teardown and the chat stream
    /// stop run concurrently; session listeners are released last.
    pub async fn leave_session(&self) {
        let taken = self.with_state(|s| {
            let session = s.session.current.clone()?;
            s.error = None;
            s.leaving = true;
            let handles = s.streams.take_session();
            s.reset_session();
            Some((session, handles))
        });
        let Some((session, handles)) = taken else {
            tracing::debug!("leave ignored: no session");
            return;
        };
        let _guard = TransitionGuard { state: self.state_lock(), transition: Transition::Leave };
        tracing::info!(session = %session.id, "leaving session");

        if let Err(e) = self.backend.leave_session(&session.id).await {
            self.surface(ClientError::rpc(&e));
        }

        let chat = Channel::SessionChat { session_id: session.id.clone() };
        let (links, chat_stop) =
            tokio::join!(self.backend.teardown_peer_links(), self.backend.stop_stream(&chat));
        if let Err(e) = links {
            tracing::debug!("peer link teardown failed: {e}");
        }
        if let Err(e) = chat_stop {
            tracing::debug!(channel = %ChannelKind::SessionChat, "stop failed: {e}");
        }

        for handle in handles {
            handle.release(&*self.backend).await;
        }
        tracing::info!(session = %session.id, "left session");
    }
}
