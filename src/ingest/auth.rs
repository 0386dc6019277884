use async_trait::async_trait;
use std::collections::HashSet;

/// Credential check consulted before a record is accepted.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, key: &str) -> bool;
}

/// Accepts a fixed set of API keys loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticKeyAuthorizer {
    keys: HashSet<String>,
}

impl StaticKeyAuthorizer {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys
                .into_iter()
                .map(Into::into)
                .filter(|k: &String| !k.is_empty())
                .collect(),
        }
    }
}

#[async_trait]
impl Authorizer for StaticKeyAuthorizer {
    async fn authorize(&self, key: &str) -> bool {
        self.keys.contains(key)
    }
}

/// Extract the key from a credential header value, accepting an optional
/// `Bearer ` prefix.
pub fn credential_key(header: &str) -> &str {
    let header = header.trim();
    header.strip_prefix("Bearer ").unwrap_or(header).trim()
}
