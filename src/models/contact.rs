use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{Direction, Role};

/// Directory entry used to decorate contacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub display_name: String,
    pub avatar_ref: Option<String>,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    #[serde(skip)]
    pub seq: i64,
}

/// A conversation partner as seen by one viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub peer_id: String,
    pub display_name: String,
    pub avatar_ref: Option<String>,
    pub role: Option<Role>,
    pub last_message: Option<LastMessage>,
}
