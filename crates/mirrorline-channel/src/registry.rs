//! Per-process registry enforcing one client per channel path.

use std::collections::HashMap;
use std::sync::OnceLock;

use parking_lot::Mutex;

use crate::client::ChannelClient;

/// Maps channel paths to their single [`ChannelClient`].
#[derive(Default)]
pub struct ChannelRegistry {
    clients: Mutex<HashMap<String, ChannelClient>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static ChannelRegistry {
        static GLOBAL: OnceLock<ChannelRegistry> = OnceLock::new();
        GLOBAL.get_or_init(ChannelRegistry::new)
    }

    /// Return the client for `path`, creating it with `make` on first use.
    pub fn get_or_insert_with<F>(&self, path: &str, make: F) -> ChannelClient
    where
        F: FnOnce() -> ChannelClient,
    {
        self.clients
            .lock()
            .entry(path.to_owned())
            .or_insert_with(make)
            .clone()
    }

    pub fn get(&self, path: &str) -> Option<ChannelClient> {
        self.clients.lock().get(path).cloned()
    }

    /// Forget the client for `path`. The caller should disconnect it.
    pub fn remove(&self, path: &str) -> Option<ChannelClient> {
        self.clients.lock().remove(path)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
