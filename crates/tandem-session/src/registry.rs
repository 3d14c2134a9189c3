//! The host's registry of connected participants.
//!
//! The registry is owned by the host loop and is not thread-safe on its
//! own. It hands out [`ClientId`]s, enforces unique names, and keeps the
//! ban list consulted on accept.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use tandem_protocol::{ClientId, CompanyId};

use crate::SessionError;

/// What the host knows about one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: ClientId,
    /// Empty until the participant identifies.
    pub name: String,
    pub company: CompanyId,
    pub address: Option<IpAddr>,
}

impl ClientInfo {
    pub fn is_identified(&self) -> bool {
        !self.name.is_empty()
    }
}

/// Tracks every connected participant, the host's own entry included.
///
/// ## Lifecycle
///
/// ```text
/// allocate() ──→ identify() ──→ ... ──→ remove()
///   (id only)     (name, company)
/// ```
pub struct ClientRegistry {
    clients: HashMap<ClientId, ClientInfo>,
    max_clients: usize,
    next_id: u32,
    banned: HashSet<IpAddr>,
}

impl ClientRegistry {
    /// `max_clients` counts remote participants; the host's own entry is
    /// not included.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            max_clients,
            next_id: ClientId::HOST.0 + 1,
            banned: HashSet::new(),
        }
    }

    /// Registers the host's own participant under [`ClientId::HOST`].
    pub fn register_host(&mut self, name: impl Into<String>, company: CompanyId) {
        let info = ClientInfo {
            id: ClientId::HOST,
            name: name.into(),
            company,
            address: None,
        };
        self.clients.insert(ClientId::HOST, info);
    }

    /// Reserves an id for a new connection.
    ///
    /// # Errors
    /// [`SessionError::ServerFull`] when `max_clients` remote participants
    /// are already registered.
    pub fn allocate(&mut self, address: Option<IpAddr>) -> Result<ClientId, SessionError> {
        if self.remote_count() >= self.max_clients {
            return Err(SessionError::ServerFull);
        }

        // Skip INVALID, HOST and anything still in use after a wrap.
        let id = loop {
            let candidate = ClientId(self.next_id);
            self.next_id = self.next_id.wrapping_add(1);
            if candidate.is_valid()
                && candidate != ClientId::HOST
                && !self.clients.contains_key(&candidate)
            {
                break candidate;
            }
        };

        self.clients.insert(
            id,
            ClientInfo {
                id,
                name: String::new(),
                company: CompanyId::SPECTATOR,
                address,
            },
        );
        tracing::debug!(client = %id, "client id allocated");
        Ok(id)
    }

    /// Records the name and company a participant asked for.
    ///
    /// # Errors
    /// - [`SessionError::NotFound`]: `id` was never allocated or was removed.
    /// - [`SessionError::NameInUse`]: another participant has this name.
    pub fn identify(
        &mut self,
        id: ClientId,
        name: &str,
        company: CompanyId,
    ) -> Result<&ClientInfo, SessionError> {
        if self
            .clients
            .values()
            .any(|c| c.id != id && c.name == name)
        {
            return Err(SessionError::NameInUse(name.to_string()));
        }

        let info = self.clients.get_mut(&id).ok_or(SessionError::NotFound(id))?;
        info.name = name.to_string();
        info.company = company;
        tracing::info!(client = %id, name, %company, "client identified");
        Ok(info)
    }

    pub fn remove(&mut self, id: ClientId) -> Option<ClientInfo> {
        let removed = self.clients.remove(&id);
        if removed.is_some() {
            tracing::debug!(client = %id, "client removed from registry");
        }
        removed
    }

    pub fn get(&self, id: ClientId) -> Option<&ClientInfo> {
        self.clients.get(&id)
    }

    /// All entries, in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ClientInfo> {
        let mut all: Vec<_> = self.clients.values().collect();
        all.sort_by_key(|c| c.id);
        all.into_iter()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn remote_count(&self) -> usize {
        self.clients.keys().filter(|id| **id != ClientId::HOST).count()
    }

    // -- Ban list --

    pub fn ban(&mut self, address: IpAddr) {
        if self.banned.insert(address) {
            tracing::info!(%address, "address banned");
        }
    }

    pub fn unban(&mut self, address: IpAddr) -> bool {
        self.banned.remove(&address)
    }

    pub fn is_banned(&self, address: IpAddr) -> bool {
        self.banned.contains(&address)
    }
}
