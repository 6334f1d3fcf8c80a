//! Connection lifecycle: connect, disconnect, relay selection and the
//! connection-lost watchdog.

use parley_core::{Backend, Channel, ChannelKind, env::Environment};

use crate::{
    ClientError, Orchestrator,
    log::LogKind,
    state::{ActiveChannel, ClientState, ConnectionState},
};

impl<B: Backend, E: Environment> Orchestrator<B, E> {
    /// Connect to a saved server.
    ///
    /// No-op unless disconnected. On failure every stream started so far is
    /// released, the state returns to `Disconnected` and the error is
    /// surfaced. An attempt superseded by a disconnect (and possibly a newer
    /// connect) stops at its next step without touching state.
    pub async fn connect(&self, host: &str, port: u16, identity: &str) {
        let identity = identity.trim();
        if identity.is_empty() {
            self.surface(ClientError::EmptyIdentity);
            return;
        }

        let proceed = self.with_state(|s| {
            if !s.saved_servers.iter().any(|srv| srv.matches(host, port)) {
                return Err(ClientError::UnknownServer { host: host.to_string(), port });
            }
            if s.connection != ConnectionState::Disconnected {
                return Ok(None);
            }
            s.connect_generation += 1;
            s.connection = ConnectionState::Connecting;
            s.identity = Some(identity.to_string());
            s.error = None;
            Ok(Some(s.connect_generation))
        });

        let attempt = match proceed {
            Ok(Some(attempt)) => attempt,
            Ok(None) => {
                tracing::debug!(host, port, "connect ignored: not disconnected");
                return;
            },
            Err(error) => {
                self.surface(error);
                return;
            },
        };

        tracing::info!(host, port, identity, attempt, "connecting");

        if let Err(e) = self.backend.connect(host, port, identity).await {
            self.fail_connect(attempt, ClientError::rpc(&e), false).await;
            return;
        }
        if !self.is_attempt(attempt) {
            self.abandon_connect(attempt).await;
            return;
        }

        let info = match self.backend.get_server_info().await {
            Ok(info) => info,
            Err(e) => {
                self.fail_connect(attempt, ClientError::rpc(&e), true).await;
                return;
            },
        };

        let server_name = info.name.clone();
        let committed = self.with_state(|s| {
            if s.connect_generation != attempt {
                return false;
            }
            s.server = Some(info);
            s.connection = ConnectionState::Connected;
            s.reset_session();
            s.active_channel = ActiveChannel::Global;
            true
        });
        if !committed {
            self.abandon_connect(attempt).await;
            return;
        }

        match self.start_global_streams(attempt).await {
            Ok(true) => tracing::info!(server = %server_name, "connected"),
            Ok(false) => tracing::debug!(attempt, "disconnected while starting streams"),
            Err(error) => self.fail_connect(attempt, error, true).await,
        }
    }

    /// Whether `attempt` is still the live connect attempt.
    fn is_attempt(&self, attempt: u64) -> bool {
        self.with_state(|s| s.connect_generation == attempt)
    }

    /// Clean up after an attempt that was superseded with its transport open.
    ///
    /// The transport is only closed when no newer attempt has started, since
    /// a newer attempt owns the same transport.
    async fn abandon_connect(&self, attempt: u64) {
        let idle = self.with_state(|s| s.connection == ConnectionState::Disconnected);
        tracing::debug!(attempt, idle, "connect attempt superseded");
        if idle && let Err(e) = self.backend.disconnect().await {
            tracing::debug!("disconnect after superseded connect: {e}");
        }
    }

    /// Watchdog first, then session list, presence and global chat.
    async fn start_global_streams(&self, attempt: u64) -> Result<bool, ClientError> {
        let connected = |s: &ClientState<E::Instant>| {
            s.connect_generation == attempt && s.connection == ConnectionState::Connected
        };

        if !self.with_state(|s| s.streams.contains(ChannelKind::ConnectionLost))
            && !self
                .attach_while(Channel::ConnectionLost, None, connected)
                .await
                .map_err(|e| ClientError::rpc(&e))?
        {
            return Ok(false);
        }

        let streams = [
            (Channel::SessionList, None),
            (Channel::Presence, None),
            (Channel::GlobalChat, Some(LogKind::Global)),
        ];
        for (channel, reset) in streams {
            let live = self
                .attach_while(channel, reset, connected)
                .await
                .map_err(|e| ClientError::rpc(&e))?;
            if !live {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Roll back a failed attempt. A superseded attempt leaves state, streams
    /// and transport to whoever superseded it.
    async fn fail_connect(&self, attempt: u64, error: ClientError, transport_open: bool) {
        let handles = self.with_state(|s| {
            if s.connect_generation != attempt {
                return None;
            }
            s.connect_generation += 1;
            s.reset_connection();
            Some(s.streams.take_all())
        });
        let Some(handles) = handles else {
            tracing::debug!(attempt, "superseded connect failed: {error}");
            return;
        };

        for handle in handles {
            handle.release(&*self.backend).await;
        }
        if transport_open && let Err(e) = self.backend.disconnect().await {
            tracing::debug!("disconnect after failed connect: {e}");
        }
        self.surface(error);
    }

    /// Tear the connection down.
    ///
    /// Idempotent and infallible: every remote step is best effort. Local
    /// state is reset before the first await, so no operation can observe a
    /// half-disconnected client.
    pub async fn disconnect(&self) {
        let (had_session, handles) = self.with_state(|s| {
            let had_session = s.session.current.is_some();
            s.connect_generation += 1;
            s.reset_connection();
            (had_session, s.streams.take_all())
        });

        if had_session && let Err(e) = self.backend.teardown_peer_links().await {
            tracing::debug!("peer link teardown failed: {e}");
        }
        for handle in handles {
            handle.release(&*self.backend).await;
        }
        if let Err(e) = self.backend.disconnect().await {
            tracing::debug!("remote disconnect failed: {e}");
        }
        tracing::info!("disconnected");
    }

    /// Select the relay for subsequent peer links. `None` selects direct only.
    pub async fn set_relay(&self, name: Option<&str>) {
        if let Some(name) = name {
            let check = self.with_state(|s| match &s.server {
                None => Err(ClientError::NotConnected),
                Some(info) if !info.has_relay(name) => {
                    Err(ClientError::UnknownRelay(name.to_string()))
                },
                Some(_) => Ok(()),
            });
            if let Err(error) = check {
                self.surface(error);
                return;
            }
        }

        match self.backend.set_relay(name).await {
            Ok(()) => {
                tracing::info!(relay = ?name, "relay selected");
                self.with_state(|s| s.relay = name.map(str::to_string));
            },
            Err(e) => self.surface(ClientError::rpc(&e)),
        }
    }

    /// Handle an unexpected loss of the server.
    pub(crate) async fn handle_connection_lost(&self) {
        let live = self.with_state(|s| s.connection != ConnectionState::Disconnected);
        if !live {
            return;
        }
        tracing::warn!("connection lost");
        self.disconnect().await;
        self.surface(ClientError::ConnectionLost);
    }
}
