//! Logical push channels and the events they carry.
//!
//! The transport delivers server-pushed data on a fixed set of logical
//! channels. Each subscription is identified by a [`SubscriptionId`] allocated
//! by the client; every delivered event is tagged with it so that deliveries
//! from a subscription the client has already released can be recognised and
//! dropped.

use std::fmt;

use tokio::sync::mpsc;

use crate::{ChatMessage, LinkState, MemberEvent, PeerId, SessionId, SessionInfo};

/// A logical push stream, including any scope the server needs to produce it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Public session list updates.
    SessionList,
    /// Global presence (online identities).
    Presence,
    /// Global chat.
    GlobalChat,
    /// Chat of one session.
    SessionChat {
        /// Session whose chat is streamed.
        session_id: SessionId,
    },
    /// Peer link-state changes for the current session.
    LinkState,
    /// Membership changes for the current session.
    Membership,
    /// Host migration for the current session.
    HostChanged,
    /// One-shot notification that the transport lost the server.
    ConnectionLost,
}

impl Channel {
    /// Unscoped kind of this channel. At most one live subscription exists per
    /// kind.
    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::SessionList => ChannelKind::SessionList,
            Self::Presence => ChannelKind::Presence,
            Self::GlobalChat => ChannelKind::GlobalChat,
            Self::SessionChat { .. } => ChannelKind::SessionChat,
            Self::LinkState => ChannelKind::LinkState,
            Self::Membership => ChannelKind::Membership,
            Self::HostChanged => ChannelKind::HostChanged,
            Self::ConnectionLost => ChannelKind::ConnectionLost,
        }
    }

    /// Whether the server must be asked to start/stop producing this stream.
    ///
    /// Listener-only channels are fed by the transport itself.
    pub fn is_produced(&self) -> bool {
        self.kind().is_produced()
    }
}

/// Unscoped channel identity used to key subscription slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelKind {
    /// See [`Channel::SessionList`].
    SessionList,
    /// See [`Channel::Presence`].
    Presence,
    /// See [`Channel::GlobalChat`].
    GlobalChat,
    /// See [`Channel::SessionChat`].
    SessionChat,
    /// See [`Channel::LinkState`].
    LinkState,
    /// See [`Channel::Membership`].
    Membership,
    /// See [`Channel::HostChanged`].
    HostChanged,
    /// See [`Channel::ConnectionLost`].
    ConnectionLost,
}

impl ChannelKind {
    /// Every channel kind.
    pub const ALL: [Self; 8] = [
        Self::SessionList,
        Self::Presence,
        Self::GlobalChat,
        Self::SessionChat,
        Self::LinkState,
        Self::Membership,
        Self::HostChanged,
        Self::ConnectionLost,
    ];

    /// Channels owned by the current session.
    pub const SESSION: [Self; 4] =
        [Self::SessionChat, Self::LinkState, Self::Membership, Self::HostChanged];

    /// See [`Channel::is_produced`].
    pub fn is_produced(self) -> bool {
        matches!(self, Self::SessionList | Self::Presence | Self::GlobalChat | Self::SessionChat)
    }

    /// Whether the channel belongs to the current session.
    pub fn is_session_scoped(self) -> bool {
        Self::SESSION.contains(&self)
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SessionList => "session-list",
            Self::Presence => "presence",
            Self::GlobalChat => "global-chat",
            Self::SessionChat => "session-chat",
            Self::LinkState => "link-state",
            Self::Membership => "membership",
            Self::HostChanged => "host-changed",
            Self::ConnectionLost => "connection-lost",
        };
        f.write_str(name)
    }
}

/// Client-allocated subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Event pushed by the server or the peer-link substrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    /// Full public session list.
    SessionList(Vec<SessionInfo>),
    /// Identities currently online.
    Presence(Vec<PeerId>),
    /// Global chat message.
    GlobalChat(ChatMessage),
    /// Session chat message.
    SessionChat(ChatMessage),
    /// Link-state change for one peer.
    LinkState {
        /// Peer the link belongs to.
        peer: PeerId,
        /// New state.
        state: LinkState,
    },
    /// Membership change.
    Membership(MemberEvent),
    /// Host migrated.
    HostChanged {
        /// New host identity.
        host: PeerId,
    },
    /// Transport lost the server unexpectedly.
    ConnectionLost,
}

impl PushEvent {
    /// Channel kind this event is delivered on.
    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::SessionList(_) => ChannelKind::SessionList,
            Self::Presence(_) => ChannelKind::Presence,
            Self::GlobalChat(_) => ChannelKind::GlobalChat,
            Self::SessionChat(_) => ChannelKind::SessionChat,
            Self::LinkState { .. } => ChannelKind::LinkState,
            Self::Membership(_) => ChannelKind::Membership,
            Self::HostChanged { .. } => ChannelKind::HostChanged,
            Self::ConnectionLost => ChannelKind::ConnectionLost,
        }
    }
}

/// Event as it arrives in the client's inbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Subscription that delivered the event.
    pub subscription: SubscriptionId,
    /// Event payload.
    pub event: PushEvent,
}

/// Sender handed to the transport when subscribing.
///
/// Tags every event with the subscription it belongs to. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct EventSink {
    id: SubscriptionId,
    kind: ChannelKind,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl EventSink {
    /// Create a sink for one subscription.
    pub fn new(id: SubscriptionId, kind: ChannelKind, tx: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { id, kind, tx }
    }

    /// Subscription this sink belongs to.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Channel kind this sink accepts.
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Deliver an event.
    ///
    /// Returns `false` if the event does not belong to this sink's channel or
    /// the client has shut down.
    pub fn push(&self, event: PushEvent) -> bool {
        if event.kind() != self.kind {
            return false;
        }
        self.tx.send(Inbound { subscription: self.id, event }).is_ok()
    }

    /// Whether the receiving side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
