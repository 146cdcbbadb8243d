//! The single connection to the discovery client.

use crate::client::{ClientFlags, ClientState, DiscoveryClient};
use crate::poll::Poll;
use shared::error::Result;

/// Owns the [`DiscoveryClient`] and tracks its connection state.
///
/// `Connecting -> Ready -> {Disconnected, Failure}`; once a terminal state is
/// reached, later transitions reported by the client are ignored.
pub struct Session<C: DiscoveryClient> {
    client: C,
    state: ClientState,
    released: bool,
}

impl<C: DiscoveryClient> Session<C> {
    /// Starts connecting `client`. A client that cannot even start is a
    /// setup error.
    pub fn connect(mut client: C, poll: &mut dyn Poll, flags: ClientFlags) -> Result<Self> {
        client.connect(poll, flags)?;
        log::debug!("session connecting");
        Ok(Self {
            client,
            state: ClientState::Connecting,
            released: false,
        })
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        !self.released && self.state == ClientState::Ready
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub(crate) fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    /// Applies a state change reported by the client. Returns whether the
    /// change was accepted.
    pub(crate) fn handle_state(&mut self, state: ClientState) -> bool {
        if self.released || self.state.is_terminal() {
            log::debug!("ignoring session state {state} after {}", self.state);
            return false;
        }
        if self.state == state {
            return false;
        }
        log::debug!("session state {} -> {}", self.state, state);
        self.state = state;
        true
    }

    /// Releases the connection. Safe to call more than once.
    pub fn disconnect(&mut self, poll: &mut dyn Poll) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(err) = self.client.disconnect(poll) {
            log::warn!("disconnect: {err}");
        }
        if !self.state.is_terminal() {
            self.state = ClientState::Disconnected;
        }
        log::debug!("session released");
    }
}
