//! Backend trait for abstracting the transport.
//!
//! The [`Backend`] trait decouples the orchestrator from the concrete RPC and
//! peer-link machinery. Each deployment implements it (gRPC channel plus a
//! WebRTC stack, an in-process simulation, ...), while the orchestration logic
//! stays identical.

use std::future::Future;

use crate::{Channel, EventSink, PeerId, ServerInfo, SessionInfo, SessionPayload, SubscriptionId};

/// Request/response surface and push-stream control consumed by the client.
///
/// All methods take `&self`: the orchestrator issues calls from overlapping
/// operations and the implementation is expected to be internally
/// synchronised.
///
/// # Streams
///
/// Push delivery has two halves. [`subscribe`](Backend::subscribe) registers a
/// listener that receives every event of one channel through the given
/// [`EventSink`]; [`start_stream`](Backend::start_stream) and
/// [`stop_stream`](Backend::stop_stream) ask the server to begin or end
/// producing a channel. Listener-only channels (see
/// [`Channel::is_produced`]) never see the start/stop calls.
pub trait Backend: Send + Sync + 'static {
    /// Transport-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open the transport session.
    fn connect(
        &self,
        host: &str,
        port: u16,
        identity: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Close the transport session.
    fn disconnect(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Fetch server name, message of the day and relays.
    fn get_server_info(&self) -> impl Future<Output = Result<ServerInfo, Self::Error>> + Send;

    /// Fetch the public session list.
    fn list_sessions(&self) -> impl Future<Output = Result<Vec<SessionInfo>, Self::Error>> + Send;

    /// Fetch the members of a session.
    fn get_members(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<Vec<PeerId>, Self::Error>> + Send;

    /// Create a session hosted by the local identity.
    fn create_session(
        &self,
        public: bool,
        capacity: u32,
    ) -> impl Future<Output = Result<SessionPayload, Self::Error>> + Send;

    /// Join an existing session.
    fn join_session(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<SessionPayload, Self::Error>> + Send;

    /// Leave a session.
    fn leave_session(&self, session_id: &str)
    -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Negotiate peer links with every existing peer of a session.
    fn establish_peer_links(
        &self,
        session_id: &str,
        existing_peers: &[PeerId],
        relay: Option<&str>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Close every peer link.
    fn teardown_peer_links(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Close the peer link to one peer.
    fn close_peer_link(&self, peer: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Select the relay used by subsequent peer links. `None` means direct only.
    fn set_relay(&self, name: Option<&str>)
    -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Send a message on the global channel.
    fn send_global_message(&self, text: &str)
    -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Send a message to the current session.
    fn send_session_message(
        &self,
        text: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Register a listener for a channel.
    ///
    /// Events for the channel are delivered through `sink` until
    /// [`unsubscribe`](Backend::unsubscribe) is called with `sink.id()`.
    fn subscribe(
        &self,
        channel: &Channel,
        sink: EventSink,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Remove a listener. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId) -> impl Future<Output = ()> + Send;

    /// Ask the server to start producing a channel.
    fn start_stream(&self, channel: &Channel)
    -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Ask the server to stop producing a channel.
    fn stop_stream(&self, channel: &Channel)
    -> impl Future<Output = Result<(), Self::Error>> + Send;
}
