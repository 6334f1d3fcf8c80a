//! Core types for the Parley session client.
//!
//! Everything the orchestration layer and the transport agree on lives here:
//! the domain payloads exchanged with the server, the logical push channels,
//! and the [`Backend`] trait that abstracts the RPC + push-event substrate.
//!
//! # Components
//!
//! - [`Backend`]: Request/response calls and stream control consumed by the
//!   client
//! - [`Channel`] / [`PushEvent`]: Logical push streams and the events they
//!   carry
//! - [`EventSink`]: Subscription-tagged sender into the client's inbound queue
//! - [`Environment`]: Time abstraction for deterministic testing

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod backend;
mod channel;
pub mod env;
mod error;
mod types;

pub use backend::Backend;
pub use channel::{Channel, ChannelKind, EventSink, Inbound, PushEvent, SubscriptionId};
pub use env::Environment;
pub use error::CoreError;
pub use types::{
    ChatMessage, LinkState, MemberEvent, PeerId, RelayKind, RelayOption, ServerInfo, SessionId,
    SessionInfo, SessionPayload, Visibility, normalize_session_code,
};
