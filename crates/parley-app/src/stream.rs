//! Subscription handles.
//!
//! A [`StreamHandle`] is the client's token for one live listener. Releasing
//! consumes the handle, so a handle can be released at most once; slots hand
//! handles out by value with `take`, so a second release attempt finds
//! nothing.

use std::collections::BTreeMap;

use parley_core::{Backend, Channel, ChannelKind, SubscriptionId};

/// Token for one live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHandle {
    id: SubscriptionId,
    channel: Channel,
}

impl StreamHandle {
    pub(crate) fn new(id: SubscriptionId, channel: Channel) -> Self {
        Self { id, channel }
    }

    /// Subscription id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Subscribed channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Unsubscribe the listener.
    pub(crate) async fn release<B: Backend>(self, backend: &B) {
        tracing::debug!(channel = %self.channel.kind(), subscription = %self.id, "releasing");
        backend.unsubscribe(self.id).await;
    }
}

/// At most one live handle per channel kind.
#[derive(Debug, Default)]
pub(crate) struct StreamSlots {
    slots: BTreeMap<ChannelKind, StreamHandle>,
}

impl StreamSlots {
    /// Install a handle, returning the one it displaced.
    pub fn install(&mut self, handle: StreamHandle) -> Option<StreamHandle> {
        self.slots.insert(handle.channel.kind(), handle)
    }

    pub fn take(&mut self, kind: ChannelKind) -> Option<StreamHandle> {
        self.slots.remove(&kind)
    }

    /// Take the handle only if it is still subscription `id`.
    pub fn take_if(&mut self, kind: ChannelKind, id: SubscriptionId) -> Option<StreamHandle> {
        if self.is_live(kind, id) { self.slots.remove(&kind) } else { None }
    }

    pub fn take_all(&mut self) -> Vec<StreamHandle> {
        std::mem::take(&mut self.slots).into_values().collect()
    }

    pub fn take_session(&mut self) -> Vec<StreamHandle> {
        ChannelKind::SESSION.iter().filter_map(|kind| self.slots.remove(kind)).collect()
    }

    pub fn contains(&self, kind: ChannelKind) -> bool {
        self.slots.contains_key(&kind)
    }

    pub fn is_live(&self, kind: ChannelKind, id: SubscriptionId) -> bool {
        self.slots.get(&kind).is_some_and(|h| h.id == id)
    }

    pub fn ids(&self) -> BTreeMap<ChannelKind, SubscriptionId> {
        self.slots.iter().map(|(kind, h)| (*kind, h.id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: u64, channel: Channel) -> StreamHandle {
        StreamHandle::new(SubscriptionId(id), channel)
    }

    #[test]
    fn install_displaces_same_kind() {
        let mut slots = StreamSlots::default();
        assert!(slots.install(handle(1, Channel::Presence)).is_none());

        let displaced = slots.install(handle(2, Channel::Presence));
        assert_eq!(displaced.map(|h| h.id()), Some(SubscriptionId(1)));
        assert!(slots.is_live(ChannelKind::Presence, SubscriptionId(2)));
        assert!(!slots.is_live(ChannelKind::Presence, SubscriptionId(1)));
    }

    #[test]
    fn take_is_idempotent() {
        let mut slots = StreamSlots::default();
        slots.install(handle(1, Channel::GlobalChat));

        assert!(slots.take(ChannelKind::GlobalChat).is_some());
        assert!(slots.take(ChannelKind::GlobalChat).is_none());
    }

    #[test]
    fn take_if_requires_matching_id() {
        let mut slots = StreamSlots::default();
        slots.install(handle(7, Channel::LinkState));

        assert!(slots.take_if(ChannelKind::LinkState, SubscriptionId(6)).is_none());
        assert!(slots.take_if(ChannelKind::LinkState, SubscriptionId(7)).is_some());
    }

    #[test]
    fn take_session_leaves_global_streams() {
        let mut slots = StreamSlots::default();
        slots.install(handle(1, Channel::SessionList));
        slots.install(handle(2, Channel::SessionChat { session_id: "S".into() }));
        slots.install(handle(3, Channel::Membership));

        let taken = slots.take_session();

        assert_eq!(taken.len(), 2);
        assert!(slots.contains(ChannelKind::SessionList));
        assert_eq!(slots.ids().len(), 1);
    }
}
