//! Observable state snapshots for invariant checking.
//!
//! Snapshots capture the observable state of the system at a point in time.
//! Invariants operate on snapshots rather than live state to ensure
//! consistent, atomic checks.

use std::collections::{BTreeMap, HashSet};

use parley_app::{ClientView, Store};
use parley_core::{Channel, ChannelKind, env::Environment};

use crate::SimBackend;

/// Snapshot of the entire system state.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Per-client state snapshots.
    pub clients: Vec<ClientSnapshot>,
}

impl SystemSnapshot {
    /// Create an empty snapshot (no clients).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a snapshot with a single client.
    pub fn single(client: ClientSnapshot) -> Self {
        Self { clients: vec![client] }
    }

    /// Add a client snapshot.
    pub fn add_client(&mut self, client: ClientSnapshot) {
        self.clients.push(client);
    }
}

/// Snapshot of one client: its orchestrator view plus what its transport
/// holds on its behalf.
#[derive(Debug, Clone)]
pub struct ClientSnapshot {
    /// Orchestrator state.
    pub view: ClientView,
    /// Listeners registered with the transport.
    pub transport_listeners: usize,
    /// Transport listeners per channel kind.
    pub listeners_by_kind: BTreeMap<ChannelKind, usize>,
    /// Channels the server is producing for this client.
    pub producing: HashSet<Channel>,
}

impl ClientSnapshot {
    /// Capture a client.
    pub fn capture<E: Environment>(store: &Store<SimBackend, E>, backend: &SimBackend) -> Self {
        let listeners_by_kind = ChannelKind::ALL
            .into_iter()
            .map(|kind| (kind, backend.subscriptions_of(kind)))
            .filter(|(_, count)| *count > 0)
            .collect();
        Self {
            view: store.view(),
            transport_listeners: backend.subscription_count(),
            listeners_by_kind,
            producing: backend.producing(),
        }
    }

    /// Snapshot of a view alone, with a transport matching it exactly.
    pub fn from_view(view: ClientView) -> Self {
        Self {
            transport_listeners: view.subscriptions.len(),
            listeners_by_kind: view.subscriptions.keys().map(|kind| (*kind, 1)).collect(),
            view,
            producing: HashSet::new(),
        }
    }
}
