//! Phonebook user records.
//!
//! The phonebook maps threebot ids to public keys. A user record may only be
//! changed by a request signed with its currently stored key, including key
//! rotation.

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::error::{Error, Result};

/// A phonebook entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub pubkey: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub description: String,
}

impl User {
    /// Sanity checks on create.
    pub fn validate(&self) -> Result<()> {
        if self.name.to_lowercase() != self.name {
            return Err(Error::InvalidInput("name should be all lower case".to_string()));
        }
        if self.email.to_lowercase() != self.email {
            return Err(Error::InvalidInput("email should be all lower case".to_string()));
        }
        if self.name.len() < 3 {
            return Err(Error::InvalidInput(
                "name should be at least 3 characters".to_string(),
            ));
        }
        Ok(())
    }

    /// Canonical signing bytes. The field order is fixed:
    /// `id | name | email | host | description | pubkey`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(self.id.to_string().as_bytes());
        buf.extend_from_slice(self.name.as_bytes());
        buf.extend_from_slice(self.email.as_bytes());
        buf.extend_from_slice(self.host.as_bytes());
        buf.extend_from_slice(self.description.as_bytes());
        buf.extend_from_slice(self.pubkey.as_bytes());
        buf
    }

    /// Apply a signed self-update, verifying against the *current* stored
    /// key. Returns the merged record to persist.
    pub fn apply_update(&self, update: User, signature: &[u8]) -> Result<User> {
        let mut update = update;
        update.id = self.id;

        // the update must always be signed with the currently stored key,
        // even when rotating to a new one
        let key = crypto::key_from_hex(&self.pubkey)?;
        crypto::verify(&key, &update.encode(), signature)
            .map_err(|_| Error::Unauthorized("payload verification failed".to_string()))?;

        let mut merged = self.clone();

        if !update.pubkey.is_empty() {
            crypto::key_from_hex(&update.pubkey)
                .map_err(|_| Error::InvalidInput("invalid public key".to_string()))?;
            merged.pubkey = update.pubkey;
        }

        if !update.name.is_empty() && update.name != self.name {
            return Err(Error::InvalidInput("can not update name".to_string()));
        }

        if !update.email.is_empty() {
            merged.email = update.email;
        }
        if !update.description.is_empty() {
            merged.description = update.description;
        }
        if !update.host.is_empty() {
            merged.host = update.host;
        }

        Ok(merged)
    }
}
