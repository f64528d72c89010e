//! Server registry.
//!
//! Maps each live [`ServerId`] to its handlers. Lookups are lock-free reads
//! of an `ArcSwap`; `reload` swaps in a new entry atomically, so a dispatch
//! that already took its snapshot keeps the handlers it started with.

use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;

use crate::http::error::BridgeError;
use crate::http::handler::{ErrorHandler, Handler};
use crate::net::{ListenerInfo, ServerId};

/// Handlers of one server.
#[derive(Debug, Clone)]
pub struct ServerEntry {
    pub handler: Handler,
    pub error_handler: Option<ErrorHandler>,
}

struct ServerSlot {
    entry: ArcSwap<ServerEntry>,
    info: ListenerInfo,
}

#[derive(Default)]
pub struct ServerRegistry {
    servers: DashMap<ServerId, Arc<ServerSlot>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, info: ListenerInfo, entry: ServerEntry) {
        let id = info.id;
        let slot = ServerSlot {
            entry: ArcSwap::from_pointee(entry),
            info,
        };
        self.servers.insert(id, Arc::new(slot));
    }

    /// Current handlers of a server, or `None` once it is stopped.
    pub fn lookup(&self, id: ServerId) -> Option<Arc<ServerEntry>> {
        self.servers.get(&id).map(|slot| slot.entry.load_full())
    }

    pub fn info(&self, id: ServerId) -> Option<ListenerInfo> {
        self.servers.get(&id).map(|slot| slot.info.clone())
    }

    /// Replace the handler and/or error handler. `None` keeps the current one.
    pub fn reload(
        &self,
        id: ServerId,
        handler: Option<Handler>,
        error_handler: Option<ErrorHandler>,
    ) -> Result<(), BridgeError> {
        let slot = self
            .servers
            .get(&id)
            .map(|slot| Arc::clone(slot.value()))
            .ok_or(BridgeError::ServerStopped(id))?;

        slot.entry.rcu(|current| ServerEntry {
            handler: handler.clone().unwrap_or_else(|| current.handler.clone()),
            error_handler: error_handler.clone().or_else(|| current.error_handler.clone()),
        });
        Ok(())
    }

    /// Unregister a server. Returns its listener info if it was registered.
    pub fn remove(&self, id: ServerId) -> Option<ListenerInfo> {
        self.servers.remove(&id).map(|(_, slot)| slot.info.clone())
    }

    pub fn ids(&self) -> Vec<ServerId> {
        self.servers.iter().map(|slot| *slot.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
