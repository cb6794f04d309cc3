//! Controlled clients (pages) and claiming.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use url::Url;

use crate::worker::ServiceWorkerId;

/// Unique identifier for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl ClientId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A page within the worker's origin.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub url: Url,
    /// Worker version controlling this client, if any.
    pub controller: Option<ServiceWorkerId>,
}

/// Clients known to a worker.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<ClientId, Client>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an uncontrolled client.
    pub fn add(&mut self, url: Url) -> ClientId {
        let id = ClientId::new();
        self.clients.insert(
            id,
            Client {
                id,
                url,
                controller: None,
            },
        );
        id
    }

    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    pub fn remove(&mut self, id: ClientId) -> Option<Client> {
        self.clients.remove(&id)
    }

    /// Make `worker` the controller of every client. Returns how many
    /// clients changed controller.
    pub fn claim(&mut self, worker: ServiceWorkerId) -> usize {
        let mut changed = 0;
        for client in self.clients.values_mut() {
            if client.controller != Some(worker) {
                client.controller = Some(worker);
                changed += 1;
            }
        }
        changed
    }

    /// Number of clients controlled by `worker`.
    pub fn controlled_by(&self, worker: ServiceWorkerId) -> usize {
        self.clients
            .values()
            .filter(|c| c.controller == Some(worker))
            .count()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
