//! User types.

use chrono::{DateTime, Utc};

use super::UserId;

/// User record as supplied by the identity collaborator.
#[derive(Clone, Debug)]
pub struct User {
    pub id: UserId,
    pub email: String, // Stored lowercase
    pub created_at: DateTime<Utc>,
}

/// Minimal user projection returned by assignability queries.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UserSummary {
    pub user_id: UserId,
    pub email: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            email: user.email.clone(),
        }
    }
}
