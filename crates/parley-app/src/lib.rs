//! Client orchestration for Parley
//!
//! Drives a chat client over an abstract [`Backend`](parley_core::Backend):
//! connection lifecycle, the public session registry, session join/leave
//! with peer links, and chat routing. The same orchestration code runs
//! against a real transport in production and a simulated one in tests.
//!
//! # Components
//!
//! - [`Orchestrator`]: shared client state and every operation
//! - [`Runtime`]: single consumer of push events, plus error expiry
//! - [`Store`]: UI-facing accessors and actions
//! - [`SystemEnv`]: production [`Environment`](parley_core::env::Environment)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod config;
mod connection;
mod dispatch;
mod error;
pub mod log;
mod messaging;
mod orchestrator;
mod registry;
mod runtime;
mod session;
mod state;
mod store;
mod stream;
mod system_env;

pub use config::ClientConfig;
pub use error::{ClientError, ErrorCategory};
pub use log::{LogEntry, LogKind, MessageLog};
pub use orchestrator::Orchestrator;
pub use registry::SessionRegistry;
pub use runtime::Runtime;
pub use session::JoinOutcome;
pub use state::{ActiveChannel, ClientView, ConnectionState, SavedServer, Session};
pub use store::Store;
pub use stream::StreamHandle;
pub use system_env::SystemEnv;
