//! Outgoing chat.

use parley_core::{Backend, env::Environment};

use crate::{ClientError, Orchestrator, state::ActiveChannel};

impl<B: Backend, E: Environment> Orchestrator<B, E> {
    /// Send chat to the active channel.
    ///
    /// Input is trimmed and empty input ignored. Nothing is echoed locally;
    /// the message appears when the chat stream delivers it.
    pub async fn send_message(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        let channel = self.with_state(|s| match s.active_channel {
            ActiveChannel::Session if s.session.current.is_some() => ActiveChannel::Session,
            ActiveChannel::Session | ActiveChannel::Global => ActiveChannel::Global,
        });

        let result = match channel {
            ActiveChannel::Global => self.backend.send_global_message(text).await,
            ActiveChannel::Session => self.backend.send_session_message(text).await,
        };
        if let Err(e) = result {
            self.surface(ClientError::rpc(&e));
        }
    }

    /// Route outgoing chat. Selecting the session without one is ignored.
    pub fn set_active_channel(&self, channel: ActiveChannel) {
        self.with_state(|s| {
            if channel == ActiveChannel::Global || s.session.current.is_some() {
                s.active_channel = channel;
            }
        });
    }
}
