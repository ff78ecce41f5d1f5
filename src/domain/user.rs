//! Users and their API tokens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user that owns documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
}

/// An authentication token issued to a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserToken {
    pub id: Uuid,
    pub user_id: Uuid,

    /// SHA256 of the token secret (hex)
    pub token_hash: String,

    /// Tokens past this instant are removed by the expiry job
    pub valid_until: DateTime<Utc>,
}

impl UserToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.valid_until < now
    }
}
