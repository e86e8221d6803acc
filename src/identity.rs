//! Identity oracle seam.
//!
//! Authentication itself lives outside this service. The chat core only needs
//! "who is calling", resolved from the request's bearer credential into a
//! stable user id. `TokenIdentityOracle` is the bundled adapter: it keeps
//! SHA-256 hashes of issued tokens, never the tokens themselves.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use serde::Deserialize;

use crate::models::{Role, UserProfile};

/// Resolves a request credential to a stable user id.
pub trait IdentityOracle: Send + Sync {
    fn resolve(&self, credential: &str) -> Option<String>;
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Cannot read identity file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed identity file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Identity entry {index} is invalid: {reason}")]
    InvalidEntry { index: usize, reason: String },
}

/// One line of the identity file: a credential and the profile it maps to.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityRecord {
    pub token: String,
    pub user_id: String,
    pub display_name: String,
    pub role: Role,
    #[serde(default)]
    pub avatar_ref: Option<String>,
}

impl IdentityRecord {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            avatar_ref: self.avatar_ref.clone(),
            role: self.role,
        }
    }
}

/// Load and validate identity records from a JSON array file.
pub fn load_identity_file(path: &Path) -> Result<Vec<IdentityRecord>, IdentityError> {
    let raw = std::fs::read_to_string(path)?;
    parse_identity_records(&raw)
}

pub fn parse_identity_records(raw: &str) -> Result<Vec<IdentityRecord>, IdentityError> {
    let records: Vec<IdentityRecord> = serde_json::from_str(raw)?;
    for (index, record) in records.iter().enumerate() {
        if record.token.trim().is_empty() {
            return Err(IdentityError::InvalidEntry {
                index,
                reason: "empty token".into(),
            });
        }
        if record.user_id.trim().is_empty() {
            return Err(IdentityError::InvalidEntry {
                index,
                reason: "empty user_id".into(),
            });
        }
    }
    Ok(records)
}

/// Hash a bearer token string using SHA-256.
pub fn hash_token(token: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}

/// In-memory token table: token hash → user id.
#[derive(Default)]
pub struct TokenIdentityOracle {
    tokens: RwLock<HashMap<[u8; 32], String>>,
}

impl TokenIdentityOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: &[IdentityRecord]) -> Self {
        let oracle = Self::new();
        for record in records {
            oracle.register(&record.token, &record.user_id);
        }
        oracle
    }

    /// Map `token` to `user_id`, replacing any previous mapping for that token.
    pub fn register(&self, token: &str, user_id: &str) {
        if let Ok(mut tokens) = self.tokens.write() {
            tokens.insert(hash_token(token), user_id.to_string());
        }
    }

}

impl IdentityOracle for TokenIdentityOracle {
    fn resolve(&self, credential: &str) -> Option<String> {
        let hash = hash_token(credential);
        self.tokens.read().ok()?.get(&hash).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_token_resolves_to_user() {
        let oracle = TokenIdentityOracle::new();
        oracle.register("t-doc", "doc-1");
        assert_eq!(oracle.resolve("t-doc"), Some("doc-1".to_string()));
    }

    #[test]
    fn re_registering_a_token_moves_it() {
        let oracle = TokenIdentityOracle::new();
        oracle.register("shared", "doc-1");
        oracle.register("shared", "doc-2");
        assert_eq!(oracle.resolve("shared"), Some("doc-2".to_string()));
    }

    #[test]
    fn unknown_token_resolves_to_none() {
        let oracle = TokenIdentityOracle::new();
        oracle.register("known", "doc-1");
        assert_eq!(oracle.resolve("unknown"), None);
    }

    #[test]
    fn hash_token_is_deterministic() {
        assert_eq!(hash_token("test"), hash_token("test"));
        assert_ne!(hash_token("token-a"), hash_token("token-b"));
    }

    #[test]
    fn records_parse_and_seed_oracle() {
        let raw = r#"[
            {"token": "t-doc", "user_id": "doc-1", "display_name": "Dr. Grey", "role": "doctor"},
            {"token": "t-pat", "user_id": "pat-1", "display_name": "Sam", "role": "patient",
             "avatar_ref": "avatars/sam.png"}
        ]"#;
        let records = parse_identity_records(raw).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].profile().avatar_ref.as_deref(), Some("avatars/sam.png"));
        assert_eq!(records[0].profile().role, Role::Doctor);

        let oracle = TokenIdentityOracle::from_records(&records);
        assert_eq!(oracle.resolve("t-pat"), Some("pat-1".to_string()));
        assert_eq!(oracle.resolve("t-doc"), Some("doc-1".to_string()));
    }

    #[test]
    fn record_with_blank_user_is_rejected() {
        let raw = r#"[{"token": "t", "user_id": " ", "display_name": "x", "role": "admin"}]"#;
        let err = parse_identity_records(raw).unwrap_err();
        assert!(matches!(err, IdentityError::InvalidEntry { index: 0, .. }));
    }

    #[test]
    fn unknown_role_fails_to_parse() {
        let raw = r#"[{"token": "t", "user_id": "u", "display_name": "x", "role": "nurse"}]"#;
        assert!(matches!(
            parse_identity_records(raw),
            Err(IdentityError::Parse(_))
        ));
    }

    #[test]
    fn identity_file_loads_from_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("users.json");
        std::fs::write(
            &path,
            r#"[{"token": "t", "user_id": "u", "display_name": "U", "role": "pharmacist"}]"#,
        )
        .unwrap();
        let records = load_identity_file(&path).unwrap();
        assert_eq!(records[0].role, Role::Pharmacist);
    }
}
