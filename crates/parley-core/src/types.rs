//! Domain payloads exchanged with the server.
//!
//! These mirror what the transport hands back from RPCs and push streams.
//! They carry no behaviour beyond small conveniences for the orchestration
//! layer.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Peer identity (the username a client connected with).
pub type PeerId = String;

/// Session identifier. Server-issued sessions use 8-character codes.
pub type SessionId = String;

/// Session visibility in the public list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Listed in the session browser.
    Public,
    /// Reachable only by code.
    Private,
}

impl Visibility {
    /// Whether the session appears in the public list.
    pub fn is_public(self) -> bool {
        matches!(self, Self::Public)
    }
}

/// Kind of relay entry advertised by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayKind {
    /// Address discovery only. Always used by the transport.
    Stun,
    /// Traffic relay. Used only when selected.
    Turn,
}

/// Relay server advertised in the server info.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayOption {
    /// Display name, used as the selection key.
    pub name: String,
    /// Relay URL (`stun:`, `stuns:`, `turn:` or `turns:`).
    pub url: String,
    /// Relay kind derived from the URL scheme.
    pub kind: RelayKind,
}

impl RelayOption {
    /// Build an option, deriving its kind from the URL scheme.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        let kind = if url.starts_with("stun:") || url.starts_with("stuns:") {
            RelayKind::Stun
        } else {
            RelayKind::Turn
        };
        Self { name: name.into(), url, kind }
    }

    /// Whether the user may pick this entry as the relay selection.
    pub fn is_selectable(&self) -> bool {
        self.kind == RelayKind::Turn && !self.name.is_empty()
    }
}

/// Server-wide information fetched after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server display name.
    pub name: String,
    /// Message of the day.
    pub motd: String,
    /// All advertised relays.
    pub relays: Vec<RelayOption>,
}

impl ServerInfo {
    /// Relays the user may select (named TURN entries).
    pub fn relay_options(&self) -> impl Iterator<Item = &RelayOption> {
        self.relays.iter().filter(|r| r.is_selectable())
    }

    /// Whether `name` is a selectable relay.
    pub fn has_relay(&self, name: &str) -> bool {
        self.relay_options().any(|r| r.name == name)
    }
}

/// Entry of the public session list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session identifier.
    pub id: SessionId,
    /// Display name.
    pub name: String,
    /// Current number of members.
    pub member_count: u32,
    /// Visibility.
    pub visibility: Visibility,
    /// Maximum number of members.
    pub capacity: u32,
}

/// Result of a successful create or join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPayload {
    /// Session identifier.
    pub id: SessionId,
    /// Display name.
    pub name: String,
    /// Visibility.
    pub visibility: Visibility,
    /// Maximum number of members.
    pub capacity: u32,
    /// Current host.
    pub host: PeerId,
    /// Peers already present when we joined.
    pub existing_peers: Vec<PeerId>,
}

/// Chat message as delivered by a chat stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author identity.
    pub author: PeerId,
    /// Message text.
    pub text: String,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

/// Peer link state reported by the peer-link substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// Connectivity checks in progress.
    Checking,
    /// Transport connected, data channel not yet open.
    Connected,
    /// Data channel open.
    Open,
    /// Temporarily disconnected.
    Disconnected,
    /// Link could not be established.
    Failed,
    /// Link closed.
    Closed,
}

impl LinkState {
    /// Wire token of this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Checking => "checking",
            Self::Connected => "connected",
            Self::Open => "open",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checking" => Ok(Self::Checking),
            "connected" => Ok(Self::Connected),
            "open" => Ok(Self::Open),
            "disconnected" => Ok(Self::Disconnected),
            "failed" => Ok(Self::Failed),
            "closed" => Ok(Self::Closed),
            other => Err(CoreError::UnknownLinkState(other.to_string())),
        }
    }
}

/// Session membership change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberEvent {
    /// Member the event is about.
    pub identity: PeerId,
    /// `true` on join, `false` on departure.
    pub joined: bool,
}

/// Normalize user input into a session code.
///
/// Codes are case-insensitive; surrounding whitespace is ignored.
pub fn normalize_session_code(input: &str) -> Result<SessionId, CoreError> {
    let code = input.trim();
    if code.is_empty() {
        return Err(CoreError::EmptySessionCode);
    }
    Ok(code.to_ascii_uppercase())
}
