//! A complete simulated client: store, runtime and transport.

use std::sync::Arc;

use parley_app::{ClientConfig, Runtime, SavedServer, Store};

use crate::{ClientSnapshot, SimBackend, SimEnv, SimServer};

/// Orchestrator wired to a [`SimServer`] with a manually driven runtime.
pub struct SimClient {
    /// UI-facing store.
    pub store: Store<SimBackend, SimEnv>,
    /// Transport.
    pub backend: Arc<SimBackend>,
    /// Clock shared with the server.
    pub env: SimEnv,
    runtime: Runtime<SimBackend, SimEnv>,
}

impl SimClient {
    /// Host of the saved server every simulated client knows.
    pub const HOST: &'static str = "sim.parley.local";
    /// Port of the saved server.
    pub const PORT: u16 = 7443;

    /// Create a client with the default configuration.
    pub fn new(server: &SimServer, env: SimEnv) -> Self {
        Self::with_config(server, env, ClientConfig::default())
    }

    /// Create a client with a specific configuration.
    pub fn with_config(server: &SimServer, env: SimEnv, config: ClientConfig) -> Self {
        let backend = server.backend();
        let (runtime, store) = Runtime::new(Arc::clone(&backend), env.clone(), config);
        store.add_saved_server(SavedServer::new("sim", Self::HOST, Self::PORT));
        Self { store, backend, env, runtime }
    }

    /// Dispatch every queued push event. Returns how many were handled.
    pub async fn settle(&mut self) -> usize {
        self.runtime.process_pending().await
    }

    /// Connect to the simulated server and settle.
    pub async fn connect(&mut self, identity: &str) {
        self.store.connect(Self::HOST, Self::PORT, identity).await;
        self.settle().await;
    }

    /// Capture this client for invariant checks.
    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot::capture(&self.store, &self.backend)
    }
}

/// Settle every client until no client has queued events left.
pub async fn settle_all(clients: &mut [&mut SimClient]) {
    loop {
        let mut handled = 0;
        for client in clients.iter_mut() {
            handled += client.settle().await;
        }
        if handled == 0 {
            return;
        }
    }
}
