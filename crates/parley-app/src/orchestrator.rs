//! Orchestrator core: shared state, error surfacing and the stream adapter.
//!
//! The orchestrator's operations are split across modules by concern
//! (`connection`, `session`, `registry`, `dispatch`, `messaging`); this module
//! holds the struct they all extend and the primitives they share.

#![allow(clippy::disallowed_types, reason = "State lock is never held across an await")]

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use parley_core::{Backend, Channel, EventSink, Inbound, SubscriptionId, env::Environment};
use tokio::sync::mpsc;

use crate::{
    ClientConfig, ClientError,
    log::LogKind,
    state::{ClientState, ClientView, ErrorBanner},
    stream::StreamHandle,
};

/// Shared handle to the client.
///
/// Cloning is cheap; every clone drives the same state. Operations take
/// `&self` and may overlap. The state lock is only held for synchronous
/// mutations, so every await point observes a consistent snapshot.
pub struct Orchestrator<B: Backend, E: Environment> {
    pub(crate) backend: Arc<B>,
    pub(crate) env: E,
    pub(crate) config: Arc<ClientConfig>,
    state: Arc<Mutex<ClientState<E::Instant>>>,
    inbound: mpsc::UnboundedSender<Inbound>,
    next_subscription: Arc<AtomicU64>,
}

impl<B: Backend, E: Environment> Clone for Orchestrator<B, E> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            env: self.env.clone(),
            config: Arc::clone(&self.config),
            state: Arc::clone(&self.state),
            inbound: self.inbound.clone(),
            next_subscription: Arc::clone(&self.next_subscription),
        }
    }
}

impl<B: Backend, E: Environment> Orchestrator<B, E> {
    /// Create an orchestrator and the receiving half of its inbound queue.
    pub fn new(
        backend: Arc<B>,
        env: E,
        config: ClientConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let orchestrator = Self {
            backend,
            env,
            config: Arc::new(config),
            state: Arc::new(Mutex::new(ClientState::default())),
            inbound: tx,
            next_subscription: Arc::new(AtomicU64::new(1)),
        };
        (orchestrator, rx)
    }

    /// Configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run `f` under the state lock.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut ClientState<E::Instant>) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub(crate) fn state_lock(&self) -> &Mutex<ClientState<E::Instant>> {
        &self.state
    }

    /// Show `error` in the banner, replacing any previous one.
    pub(crate) fn surface(&self, error: ClientError) {
        tracing::warn!(category = ?error.category(), "{error}");
        let raised_at = self.env.now();
        self.with_state(|s| s.error = Some(ErrorBanner { error, raised_at }));
    }

    /// Drop the banner once its TTL elapsed. Returns whether it was cleared.
    pub(crate) fn expire_error(&self) -> bool {
        let now = self.env.now();
        let ttl = self.config.error_ttl;
        self.with_state(|s| {
            let expired = s.error.as_ref().is_some_and(|b| now - b.raised_at >= ttl);
            if expired {
                s.error = None;
            }
            expired
        })
    }

    /// Visible error text, honouring the TTL.
    pub(crate) fn error_text(&self) -> Option<String> {
        self.expire_error();
        self.with_state(|s| s.error.as_ref().map(|b| b.error.to_string()))
    }

    /// Snapshot of the observable state.
    pub fn view(&self) -> ClientView {
        let error = self.error_text();
        self.with_state(|s| s.view(error))
    }

    /// Replace the listener on `channel`.
    ///
    /// Releases the prior handle of the same kind, stops the server stream,
    /// optionally clears a log, subscribes and (for produced channels) asks
    /// the server to start streaming. Each step is awaited before the next.
    pub(crate) async fn attach(
        &self,
        channel: Channel,
        reset: Option<LogKind>,
    ) -> Result<SubscriptionId, B::Error> {
        let kind = channel.kind();

        if let Some(prior) = self.with_state(|s| s.streams.take(kind)) {
            prior.release(&*self.backend).await;
        }

        if channel.is_produced()
            && let Err(e) = self.backend.stop_stream(&channel).await
        {
            tracing::debug!(channel = %kind, "stop before start failed: {e}");
        }

        if let Some(log) = reset {
            self.with_state(|s| s.log_mut(log).clear());
        }

        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let sink = EventSink::new(id, kind, self.inbound.clone());
        self.backend.subscribe(&channel, sink).await?;

        let handle = StreamHandle::new(id, channel.clone());
        if let Some(displaced) = self.with_state(|s| s.streams.install(handle)) {
            displaced.release(&*self.backend).await;
        }

        if channel.is_produced()
            && let Err(e) = self.backend.start_stream(&channel).await
        {
            if let Some(handle) = self.with_state(|s| s.streams.take_if(kind, id)) {
                handle.release(&*self.backend).await;
            }
            return Err(e);
        }

        tracing::debug!(channel = %kind, subscription = %id, "attached");
        Ok(id)
    }

    /// [`attach`](Self::attach), then drop the new listener again if `valid`
    /// no longer holds.
    ///
    /// Returns `Ok(false)` when the scope was abandoned during the attach.
    pub(crate) async fn attach_while(
        &self,
        channel: Channel,
        reset: Option<LogKind>,
        valid: impl Fn(&ClientState<E::Instant>) -> bool,
    ) -> Result<bool, B::Error> {
        let kind = channel.kind();
        let produced = channel.is_produced().then(|| channel.clone());
        let id = self.attach(channel, reset).await?;

        let orphan = self.with_state(|s| if valid(s) { None } else { s.streams.take_if(kind, id) });
        let Some(orphan) = orphan else {
            return Ok(self.with_state(|s| valid(s)));
        };

        tracing::debug!(channel = %kind, "scope abandoned during attach");
        if let Some(channel) = produced
            && let Err(e) = self.backend.stop_stream(&channel).await
        {
            tracing::debug!(channel = %kind, "stop after abandon failed: {e}");
        }
        orphan.release(&*self.backend).await;
        Ok(false)
    }
}
