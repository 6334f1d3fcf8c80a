//! Client error taxonomy.
//!
//! Every fallible operation of the orchestrator resolves to either a state
//! update or one of these errors written to the transient error banner. None
//! of them propagate out of the action surface.

use parley_core::{CoreError, PeerId};
use thiserror::Error;

/// Errors surfaced to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// No saved server matches the address.
    #[error("No saved server at {host}:{port}")]
    UnknownServer {
        /// Requested host.
        host: String,
        /// Requested port.
        port: u16,
    },

    /// Identity was empty after trimming.
    #[error("Identity cannot be empty")]
    EmptyIdentity,

    /// Operation requires a connection.
    #[error("Not connected")]
    NotConnected,

    /// Relay name is not one of the server's selectable relays.
    #[error("Unknown relay: {0}")]
    UnknownRelay(String),

    /// Input rejected by core validation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Remote call failed.
    #[error("{0}")]
    Rpc(String),

    /// Last reachable peer failed while we are not the host.
    #[error("Could not connect to {peer}. Leaving session.")]
    Isolated {
        /// Peer whose link failed.
        peer: PeerId,
    },

    /// A peer link failed but the session remains usable.
    #[error("Could not connect to {peer}.")]
    PeerUnreachable {
        /// Peer whose link failed.
        peer: PeerId,
    },

    /// The transport reported an unexpected loss of the server.
    #[error("Lost connection to the server")]
    ConnectionLost,
}

/// Coarse error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rejected before anything was sent.
    Local,
    /// Remote call or transport failure. State was rolled back.
    Transport,
    /// Forced leave after losing every peer link.
    Isolation,
}

impl ClientError {
    /// Wrap a transport error.
    pub fn rpc(err: &impl std::error::Error) -> Self {
        Self::Rpc(err.to_string())
    }

    /// Category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnknownServer { .. }
            | Self::EmptyIdentity
            | Self::NotConnected
            | Self::UnknownRelay(_)
            | Self::Core(_) => ErrorCategory::Local,
            Self::Rpc(_) | Self::PeerUnreachable { .. } | Self::ConnectionLost => {
                ErrorCategory::Transport
            },
            Self::Isolated { .. } => ErrorCategory::Isolation,
        }
    }
}
