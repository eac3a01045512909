//! Client and Room records.

use crate::mailbox::{mailbox, Mailbox, MailboxReceiver};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Server-assigned client identifier. Never accepted from client input as
/// one's own identity; only used to address other clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Fresh random identifier (UUIDv4).
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A connected client. Lives exactly as long as its connection.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub mailbox: Mailbox,
}

impl Client {
    /// Create a client with a fresh identifier and an empty mailbox.
    #[must_use]
    pub fn new(name: impl Into<String>, mailbox_capacity: usize) -> (Self, MailboxReceiver) {
        Self::with_id(ClientId::generate(), name, mailbox_capacity)
    }

    /// Create a client with a known identifier.
    #[must_use]
    pub fn with_id(
        id: ClientId,
        name: impl Into<String>,
        mailbox_capacity: usize,
    ) -> (Self, MailboxReceiver) {
        let (mailbox, receiver) = mailbox(id.clone(), mailbox_capacity);
        (
            Self {
                id,
                name: name.into(),
                mailbox,
            },
            receiver,
        )
    }
}

/// A named group of clients. Identifier equals the name used on first join.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: String,
    members: HashMap<ClientId, Client>,
}

impl Room {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            members: HashMap::new(),
        }
    }

    /// Room whose only member is `client`.
    #[must_use]
    pub fn with_member(id: impl Into<String>, client: Client) -> Self {
        let mut room = Self::new(id);
        room.insert(client);
        room
    }

    /// Add or replace a member. Returns true if the client was not present.
    pub fn insert(&mut self, client: Client) -> bool {
        self.members.insert(client.id.clone(), client).is_none()
    }

    pub fn remove(&mut self, client_id: &ClientId) -> Option<Client> {
        self.members.remove(client_id)
    }

    #[must_use]
    pub fn get(&self, client_id: &ClientId) -> Option<&Client> {
        self.members.get(client_id)
    }

    #[must_use]
    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.members.contains_key(client_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Every member except `client_id`.
    pub fn others<'a>(&'a self, client_id: &'a ClientId) -> impl Iterator<Item = &'a Client> + 'a {
        self.members.values().filter(move |c| &c.id != client_id)
    }

    pub fn member_ids(&self) -> impl Iterator<Item = &ClientId> {
        self.members.keys()
    }
}
