//! Reference-counted init/exit guard
//!
//! Any number of independent callers may pair `acquire` with `release`.
//! The first acquire of an epoch builds the shared resource, the last
//! matching release tears it down. The write side of the gate serializes
//! every acquire and release; operations using the resource hold the read
//! side, so a teardown never overlaps them.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Usage counter value meaning "nothing acquired"
pub const IDLE: i32 = -1;

/// Result of a successful acquire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    /// This call started the epoch and built the resource
    First,
    /// The epoch was already running; the counter is now at this value
    Shared(i32),
}

/// Result of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// This call ended the epoch and tore the resource down
    Last,
    /// Other holders remain; the counter is now at this value
    Shared(i32),
    /// No epoch was running; the counter was left untouched
    Unbalanced,
}

struct State<T> {
    usage: i32,
    resource: Option<T>,
}

/// Reference-counted owner of one epoch resource
pub struct Lifecycle<T> {
    name: String,
    state: RwLock<State<T>>,
}

impl<T> Lifecycle<T> {
    /// Create a guard with the given gate name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(State {
                usage: IDLE,
                resource: None,
            }),
        }
    }

    /// Create a guard named after `prefix` and the current process id
    pub fn for_current_process(prefix: &str) -> Self {
        Self::new(format!("{}{:08X}", prefix, std::process::id()))
    }

    /// Gate name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current usage counter (`IDLE` when no epoch is running)
    pub fn usage(&self) -> i32 {
        self.read().usage
    }

    /// Whether an epoch is running
    pub fn is_active(&self) -> bool {
        self.read().resource.is_some()
    }

    /// Join the current epoch, starting it with `init` if there is none
    ///
    /// If `init` fails the counter stays at `IDLE` and its error is
    /// returned. `init` must release whatever it acquired before failing.
    pub fn acquire<E>(&self, init: impl FnOnce() -> Result<T, E>) -> Result<Acquired, E> {
        let mut state = self.write();

        if state.usage != IDLE {
            state.usage += 1;
            debug!(gate = %self.name, usage = state.usage, "joined running epoch");
            return Ok(Acquired::Shared(state.usage));
        }

        // The counter stays IDLE until init succeeds, even if init panics
        let resource = init()?;
        state.resource = Some(resource);
        state.usage = IDLE + 1;
        info!(gate = %self.name, "epoch started");
        Ok(Acquired::First)
    }

    /// Leave the current epoch, ending it with `teardown` if this was the
    /// last holder
    pub fn release(&self, teardown: impl FnOnce(T)) -> Released {
        let mut state = self.write();

        if state.usage == IDLE {
            warn!(gate = %self.name, "exit called without a matching init, ignoring");
            return Released::Unbalanced;
        }

        state.usage -= 1;
        if state.usage != IDLE {
            debug!(gate = %self.name, usage = state.usage, "left running epoch");
            return Released::Shared(state.usage);
        }

        if let Some(resource) = state.resource.take() {
            teardown(resource);
        }
        info!(gate = %self.name, "epoch ended");
        Released::Last
    }

    /// Run `f` against the epoch resource, or return None outside an epoch
    pub fn with_current<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.read().resource.as_ref().map(f)
    }

    fn read(&self) -> RwLockReadGuard<'_, State<T>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State<T>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
