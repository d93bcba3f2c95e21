//! Library-side registry of known devices
//!
//! The USB library keeps every device object it has handed out, keyed by
//! session id. Backends consult it during enumeration so a device seen in
//! an earlier scan is reused instead of being rebuilt.

use crate::types::SessionId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Devices known to the library, keyed by session id
pub struct DeviceRegistry<D> {
    devices: Mutex<HashMap<SessionId, Arc<D>>>,
}

impl<D> Default for DeviceRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> DeviceRegistry<D> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a device by session id
    pub fn get(&self, session: SessionId) -> Option<Arc<D>> {
        self.lock().get(&session).cloned()
    }

    /// Register a device
    ///
    /// If another thread registered the same session first, the existing
    /// device wins and is returned.
    pub fn insert(&self, session: SessionId, device: Arc<D>) -> Arc<D> {
        self.lock().entry(session).or_insert(device).clone()
    }

    /// Forget a device
    pub fn remove(&self, session: SessionId) -> Option<Arc<D>> {
        self.lock().remove(&session)
    }

    /// Number of known devices
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no device is known
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Session ids of all known devices, sorted
    pub fn sessions(&self) -> Vec<SessionId> {
        let mut sessions: Vec<SessionId> = self.lock().keys().copied().collect();
        sessions.sort_unstable();
        sessions
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<D>>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
