//! Query fingerprinting for the result cache and request coalescing.
//!
//! Two requests share a fingerprint when the canonicalised query, tenant,
//! and whitelisted context keys all match. Context keys participate only
//! when whitelisted, so cache reuse is the default.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Stable hash identifying one logical query per tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of a query scoped to a tenant.
    ///
    /// The query is trimmed, lowercased, and whitespace-collapsed before
    /// hashing so cosmetic differences coalesce.
    pub fn compute(
        query: &str,
        tenant_id: &str,
        context: &BTreeMap<String, Value>,
        context_whitelist: &[String],
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonicalise(query).as_bytes());
        hasher.update(b"\n");
        hasher.update(tenant_id.as_bytes());

        let mut keys: Vec<&String> = context_whitelist.iter().collect();
        keys.sort();
        keys.dedup();
        for key in keys {
            if let Some(value) = context.get(key) {
                hasher.update(b"\n");
                hasher.update(key.as_bytes());
                hasher.update(b"=");
                hasher.update(value.to_string().as_bytes());
            }
        }

        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn canonicalise(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}
