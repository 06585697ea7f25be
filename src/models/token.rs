use crate::{models::epoch_milli, storage};
use anyhow::{Context, Result};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::ops::Add;
use std::str::FromStr;
use strum::{Display, EnumString};

#[derive(Debug, Clone, Display, PartialEq, EnumString, Eq, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[strum(ascii_case_insensitive)]
pub enum TokenType {
    /// Admin token; has access to just about everything.
    Management,

    /// Only has read/write access to namespaces granted.
    User,

    /// Injected into a run just-in-time when a task requests it, so that workloads can use
    /// the service's API easily during the run. Has the same access properties as a user
    /// token with a more focused namespace.
    Run,
}

/// An API token. The hash field is skipped during serialization to prevent it from being
/// exposed to callers. This isn't a foolproof practice, but it'll work for now.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Token {
    /// Unique identifier for token.
    pub id: String,

    /// The SHA256 hash for the token.
    #[serde(skip)]
    pub hash: String,

    /// Time in epoch milliseconds when token was created.
    pub created: u64,

    /// The type of token. Management tokens are essentially root.
    pub token_type: TokenType,

    /// List of namespaces this token has access to.
    pub namespaces: HashSet<String>,

    /// Extra information about this token in label form.
    pub metadata: HashMap<String, String>,

    /// Time in epoch milliseconds when token will expire.
    pub expires: u64,

    /// If the token is inactive or not; disabled tokens cannot be used for requests.
    pub disabled: bool,
}

fn generate_rand_str(size: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(size)
        .map(char::from)
        .collect()
}

/// Creates a new secure token string and returns (token, hash).
pub fn create_new_api_token() -> (String, String) {
    let token = generate_rand_str(32);

    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    (token, hash)
}

impl Token {
    pub fn new(
        hash: &str,
        token_type: TokenType,
        namespaces: HashSet<String>,
        metadata: HashMap<String, String>,
        expiry: u64, // Seconds from creation that token should expire.
    ) -> Self {
        let now = epoch_milli();
        let expires = now.add(expiry * 1000);

        Token {
            id: uuid::Uuid::now_v7().to_string(),
            hash: hash.into(),
            created: now,
            token_type,
            namespaces,
            metadata,
            expires,
            disabled: false,
        }
    }
}

impl TryFrom<storage::tokens::Token> for Token {
    type Error = anyhow::Error;

    fn try_from(value: storage::tokens::Token) -> Result<Self> {
        let created = value.created.parse::<u64>().with_context(|| {
            format!(
                "Could not parse field 'created' from storage value '{}'",
                value.created
            )
        })?;

        let expires = value.expires.parse::<u64>().with_context(|| {
            format!(
                "Could not parse field 'expires' from storage value '{}'",
                value.expires
            )
        })?;

        let token_type = TokenType::from_str(&value.token_type).with_context(|| {
            format!(
                "Could not parse field 'token_type' from storage value '{}'",
                value.token_type
            )
        })?;

        let namespaces = serde_json::from_str(&value.namespaces).with_context(|| {
            format!(
                "Could not parse field 'namespaces' from storage value '{}'",
                value.namespaces
            )
        })?;

        let metadata = serde_json::from_str(&value.metadata).with_context(|| {
            format!(
                "Could not parse field 'metadata' from storage value '{}'",
                value.metadata
            )
        })?;

        Ok(Token {
            id: value.id,
            hash: value.hash,
            created,
            token_type,
            namespaces,
            metadata,
            expires,
            disabled: value.disabled,
        })
    }
}

impl TryFrom<Token> for storage::tokens::Token {
    type Error = anyhow::Error;

    fn try_from(value: Token) -> Result<Self> {
        let namespaces = serde_json::to_string(&value.namespaces).with_context(|| {
            format!(
                "Could not parse field 'namespaces' to storage value; '{:#?}'",
                value.namespaces
            )
        })?;

        let metadata = serde_json::to_string(&value.metadata).with_context(|| {
            format!(
                "Could not parse field 'metadata' to storage value; '{:#?}'",
                value.metadata
            )
        })?;

        Ok(Self {
            id: value.id,
            hash: value.hash,
            created: value.created.to_string(),
            token_type: value.token_type.to_string(),
            namespaces,
            metadata,
            expires: value.expires.to_string(),
            disabled: value.disabled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_hash_is_stable() {
        let (token, hash) = create_new_api_token();

        assert_eq!(token.len(), 32);

        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        assert_eq!(hash, format!("{:x}", hasher.finalize()));
    }
}
