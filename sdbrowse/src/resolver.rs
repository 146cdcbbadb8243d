//! One-shot resolver tasks.
//!
//! A task is created when the browser reports a new instance and handed to
//! the client together with its [`TaskKey`]. The registry keeps it until the
//! client reports the terminal outcome, at which point it is reclaimed. Keys
//! carry a generation, so an outcome delivered for an already reclaimed task
//! is rejected instead of landing on a newer task in the same slot.

use std::fmt;
use std::time::{Duration, Instant};

use crate::arena::{Arena, Index};
use crate::client::DiscoveryClient;
use crate::poll::Poll;
use crate::session::Session;
use crate::types::{IpProtocol, ServiceInstance};
use shared::error::{Error, Result};

/// Handle of a pending resolver task.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey(Index);

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resolver#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ResolverTask {
    pub instance: ServiceInstance,
    pub family: IpProtocol,
    pub started: Instant,
}

impl ResolverTask {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Registry of in-flight resolver tasks.
#[derive(Debug, Default)]
pub struct Resolvers {
    tasks: Arena<ResolverTask>,
    created: u64,
    completed: u64,
}

impl Resolvers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a task for `instance` and starts it on the client.
    ///
    /// When the client refuses, no task is left behind and the error is
    /// returned to the caller.
    pub fn start<C: DiscoveryClient>(
        &mut self,
        session: &mut Session<C>,
        poll: &mut dyn Poll,
        instance: &ServiceInstance,
        family: IpProtocol,
    ) -> Result<TaskKey> {
        if session.is_released() {
            return Err(Error::ErrSessionDisconnected);
        }
        let key = TaskKey(self.tasks.insert(ResolverTask {
            instance: instance.clone(),
            family,
            started: Instant::now(),
        }));
        if let Err(err) = session
            .client_mut()
            .start_resolving(poll, key, instance, family)
        {
            self.tasks.remove(key.0);
            return Err(err);
        }
        self.created += 1;
        log::trace!("{key} started for '{}'", instance.name);
        Ok(key)
    }

    /// Reclaims the task for a terminal outcome.
    ///
    /// # Errors
    ///
    /// [`Error::ErrUnknownTask`] when the task was already reclaimed.
    pub fn complete(&mut self, key: TaskKey) -> Result<ResolverTask> {
        let task = self.tasks.remove(key.0).ok_or(Error::ErrUnknownTask)?;
        self.completed += 1;
        log::trace!("{key} completed after {:?}", task.elapsed());
        Ok(task)
    }

    pub fn get(&self, key: TaskKey) -> Option<&ResolverTask> {
        self.tasks.get(key.0)
    }

    pub fn is_pending(&self, key: TaskKey) -> bool {
        self.tasks.contains(key.0)
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Forgets every pending task; their resolutions are owned by the
    /// client and die with it. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        self.tasks.drain().len()
    }
}
