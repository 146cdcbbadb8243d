use std::fmt;

use crate::client::{BrowseId, DiscoveryClient};
use crate::poll::Poll;
use crate::session::Session;
use crate::types::ServiceType;
use shared::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserState {
    Active,
    Released,
    /// Terminal; carries the failure reason.
    Failed(String),
}

impl fmt::Display for BrowserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrowserState::Active => write!(f, "active"),
            BrowserState::Released => write!(f, "released"),
            BrowserState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// A live subscription to one service type on all interfaces and families.
#[derive(Debug)]
pub struct Browser {
    id: BrowseId,
    service_type: ServiceType,
    state: BrowserState,
}

impl Browser {
    /// Subscribes to `service_type`.
    ///
    /// # Errors
    ///
    /// [`Error::ErrSessionNotReady`] unless the session is `Ready`, or
    /// whatever the client reports when it cannot browse.
    pub fn start<C: DiscoveryClient>(
        session: &mut Session<C>,
        poll: &mut dyn Poll,
        service_type: &ServiceType,
    ) -> Result<Self> {
        if !session.is_ready() {
            return Err(Error::ErrSessionNotReady);
        }
        let id = session.client_mut().start_browsing(poll, service_type)?;
        log::debug!("{id} started for {service_type}");
        Ok(Self {
            id,
            service_type: service_type.clone(),
            state: BrowserState::Active,
        })
    }

    pub fn id(&self) -> BrowseId {
        self.id
    }

    pub fn service_type(&self) -> &ServiceType {
        &self.service_type
    }

    pub fn state(&self) -> &BrowserState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == BrowserState::Active
    }

    pub(crate) fn fail(&mut self, reason: &str) {
        if self.state == BrowserState::Active {
            self.state = BrowserState::Failed(reason.to_owned());
        }
    }

    /// Releases the subscription; resolutions it triggered keep running.
    /// Calling it again does nothing, and nothing is sent to a client whose
    /// session was already released.
    pub fn stop<C: DiscoveryClient>(&mut self, session: &mut Session<C>, poll: &mut dyn Poll) {
        if self.state == BrowserState::Released {
            return;
        }
        if !session.is_released()
            && let Err(err) = session.client_mut().stop_browsing(poll, self.id)
        {
            log::warn!("stopping {}: {err}", self.id);
        }
        log::debug!("{} released ({})", self.id, self.state);
        self.state = BrowserState::Released;
    }
}
