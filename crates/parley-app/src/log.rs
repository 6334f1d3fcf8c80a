//! Message logs.
//!
//! The global and session channels each own an append-only [`MessageLog`].
//! Entries are either chat messages received from a chat stream or local
//! system notices describing a state transition. Notices are never sent to
//! the server.
//!
//! The one exception to append-only is [`MessageLog::rewrite_last_notice`]:
//! a "connecting" placeholder is resolved in place once the peer's link opens
//! or the peer leaves.

use parley_core::ChatMessage;

/// Which log an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    /// Global channel log.
    Global,
    /// Current session log.
    Session,
}

/// One log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    /// Chat message from a user.
    Chat(ChatMessage),
    /// Local system notice.
    Notice {
        /// Notice text.
        text: String,
        /// Unix timestamp in seconds.
        timestamp: i64,
    },
}

impl LogEntry {
    /// Whether this is a system notice.
    pub fn is_system(&self) -> bool {
        matches!(self, Self::Notice { .. })
    }

    /// Entry text.
    pub fn text(&self) -> &str {
        match self {
            Self::Chat(msg) => &msg.text,
            Self::Notice { text, .. } => text,
        }
    }

    /// Author of a chat message. `None` for notices.
    pub fn author(&self) -> Option<&str> {
        match self {
            Self::Chat(msg) => Some(&msg.author),
            Self::Notice { .. } => None,
        }
    }

    /// Entry timestamp.
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::Chat(msg) => msg.timestamp,
            Self::Notice { timestamp, .. } => *timestamp,
        }
    }
}

/// Ordered sequence of log entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageLog {
    entries: Vec<LogEntry>,
}

impl MessageLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chat message.
    pub fn push_message(&mut self, message: ChatMessage) {
        self.entries.push(LogEntry::Chat(message));
    }

    /// Append a system notice.
    pub fn push_notice(&mut self, text: impl Into<String>, timestamp: i64) {
        self.entries.push(LogEntry::Notice { text: text.into(), timestamp });
    }

    /// Replace the text of the last notice whose text equals `from`.
    ///
    /// Searches from the end so that duplicate placeholders resolve
    /// newest-first. Returns `false` if no such notice exists.
    pub fn rewrite_last_notice(&mut self, from: &str, to: impl Into<String>) -> bool {
        let found = self
            .entries
            .iter_mut()
            .rev()
            .find_map(|entry| match entry {
                LogEntry::Notice { text, .. } if text == from => Some(text),
                _ => None,
            });

        match found {
            Some(text) => {
                *text = to.into();
                true
            },
            None => false,
        }
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// All entries in order.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Texts of all system notices in order.
    pub fn notices(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter(|e| e.is_system()).map(LogEntry::text)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Texts of the session notices.
pub(crate) mod notice {
    pub(crate) fn connecting(peer: &str) -> String {
        format!("{peer} is connecting…")
    }

    pub(crate) fn joined(peer: &str) -> String {
        format!("{peer} joined")
    }

    pub(crate) fn left(peer: &str) -> String {
        format!("{peer} left")
    }

    pub(crate) fn host_changed(host: &str, local: Option<&str>) -> String {
        if local == Some(host) {
            "You are now the host".to_string()
        } else {
            format!("{host} is now the host")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(author: &str, text: &str) -> ChatMessage {
        ChatMessage { author: author.into(), text: text.into(), timestamp: 1 }
    }

    #[test]
    fn rewrite_targets_last_match() {
        let mut log = MessageLog::new();
        log.push_notice("bob is connecting…", 10);
        log.push_message(chat("alice", "hi"));
        log.push_notice("bob is connecting…", 11);

        assert!(log.rewrite_last_notice("bob is connecting…", "bob joined"));

        let notices: Vec<_> = log.notices().collect();
        assert_eq!(notices, ["bob is connecting…", "bob joined"]);
        assert_eq!(log.entries()[2].timestamp(), 11);
    }

    #[test]
    fn rewrite_ignores_chat_with_same_text() {
        let mut log = MessageLog::new();
        log.push_message(chat("mallory", "bob is connecting…"));

        assert!(!log.rewrite_last_notice("bob is connecting…", "bob joined"));
        assert_eq!(log.entries()[0].text(), "bob is connecting…");
        assert_eq!(log.entries()[0].author(), Some("mallory"));
    }

    #[test]
    fn host_notice_depends_on_local_identity() {
        assert_eq!(notice::host_changed("me", Some("me")), "You are now the host");
        assert_eq!(notice::host_changed("bob", Some("me")), "bob is now the host");
        assert_eq!(notice::host_changed("bob", None), "bob is now the host");
    }

    proptest::proptest! {
        #[test]
        fn rewrite_preserves_length_and_order(
            peers in proptest::collection::vec("[a-c]", 1..12),
            target in "[a-c]",
        ) {
            let mut log = MessageLog::new();
            for (i, peer) in peers.iter().enumerate() {
                log.push_notice(notice::connecting(peer), i as i64);
            }
            let before = log.clone();

            let placeholder = notice::connecting(&target);
            let rewritten = log.rewrite_last_notice(&placeholder, notice::joined(&target));

            proptest::prop_assert_eq!(rewritten, peers.contains(&target));
            proptest::prop_assert_eq!(log.len(), before.len());
            let changed: Vec<usize> = (0..log.len())
                .filter(|&i| log.entries()[i] != before.entries()[i])
                .collect();
            if rewritten {
                let last = peers.iter().rposition(|p| *p == target);
                proptest::prop_assert_eq!(changed, last.into_iter().collect::<Vec<_>>());
            } else {
                proptest::prop_assert!(changed.is_empty());
            }
        }
    }

    #[test]
    fn clear_empties_log() {
        let mut log = MessageLog::new();
        log.push_notice("x", 0);
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
    }
}
