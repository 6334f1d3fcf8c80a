//! Event loop driving the orchestrator.
//!
//! The [`Runtime`] owns the receiving end of the inbound queue. It dispatches
//! push events one at a time, in arrival order, and runs a housekeeping tick
//! that expires the error banner.

use std::{future::Future, sync::Arc};

use parley_core::{Backend, Inbound, env::Environment};
use tokio::{sync::mpsc, time::MissedTickBehavior};

use crate::{ClientConfig, Orchestrator, Store};

/// Single consumer of push events.
pub struct Runtime<B: Backend, E: Environment> {
    orchestrator: Orchestrator<B, E>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

impl<B: Backend, E: Environment> Runtime<B, E> {
    /// Create a runtime and the store the UI talks to.
    pub fn new(backend: Arc<B>, env: E, config: ClientConfig) -> (Self, Store<B, E>) {
        let (orchestrator, inbound) = Orchestrator::new(backend, env, config);
        let store = Store::new(orchestrator.clone());
        (Self { orchestrator, inbound }, store)
    }

    /// Another store handle onto the same client.
    pub fn store(&self) -> Store<B, E> {
        Store::new(self.orchestrator.clone())
    }

    /// Run until `shutdown` resolves or every sender is gone.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        let mut tick = tokio::time::interval(self.orchestrator.config().tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                received = self.inbound.recv() => match received {
                    Some(inbound) => self.orchestrator.dispatch(inbound).await,
                    None => break,
                },
                _ = tick.tick() => {
                    if self.orchestrator.expire_error() {
                        tracing::trace!("error banner expired");
                    }
                },
            }
        }

        tracing::info!("runtime stopped");
    }

    /// Dispatch everything queued, including events queued by the handlers
    /// themselves. Returns the number of events dispatched.
    pub async fn process_pending(&mut self) -> usize {
        let mut dispatched = 0;
        while let Ok(inbound) = self.inbound.try_recv() {
            self.orchestrator.dispatch(inbound).await;
            dispatched += 1;
        }
        dispatched
    }
}
