use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// An identity the inbox can attribute transport events to.
///
/// Contact CRUD lives outside this core; only registration and key lookup
/// happen here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    /// npub used to attribute inbound transport events.
    pub pubkey: String,
    pub name: Option<String>,
    pub lightning_address: Option<String>,
}

/// Read-mostly pubkey -> contact map shared between the worker and the
/// inbox scanner.
#[derive(Default)]
pub struct ContactBook {
    by_pubkey: RwLock<HashMap<String, Contact>>,
}

impl ContactBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, contact: Contact) {
        self.by_pubkey
            .write()
            .insert(contact.pubkey.clone(), contact);
    }

    pub fn resolve(&self, pubkey: &str) -> Option<Contact> {
        self.by_pubkey.read().get(pubkey).cloned()
    }

    pub fn contains(&self, pubkey: &str) -> bool {
        self.by_pubkey.read().contains_key(pubkey)
    }
}
