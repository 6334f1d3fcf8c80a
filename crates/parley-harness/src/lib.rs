//! Deterministic simulation harness for the Parley client.
//!
//! In-memory implementations of the Environment and Backend traits for
//! reproducible testing of the orchestrator: overlapping operations, lost
//! connections, failing peer links and late deliveries.
//!
//! # Invariant Testing
//!
//! The `invariants` module provides behavioral testing through invariant
//! checks. Invariants verify WHAT must be true across all execution paths, not
//! specific scenarios. Use [`InvariantRegistry::standard()`] for the full set.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod invariants;
pub mod sim_backend;
pub mod sim_client;
pub mod sim_env;
pub mod sim_server;

pub use invariants::{
    ClientSnapshot, DisconnectedIsEmpty, Invariant, InvariantRegistry, InvariantResult,
    ListenerPerChannel, NoLeakedListeners, OwnerMatchesHost, SessionChatMatchesSession,
    SessionRequiresConnection, SessionScopeCleared, SystemSnapshot, Violation,
};
pub use sim_backend::{Call, Op, SimBackend, SimError};
pub use sim_client::{SimClient, settle_all};
pub use sim_env::{SimEnv, SimInstant};
pub use sim_server::{LinkPolicy, SimServer, SimSession};
