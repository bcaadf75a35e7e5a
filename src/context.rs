// src/context.rs
// Canonical serialization and hashing of per-request translation contexts

use crate::error::{Result, TransHubError};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Sentinel stored when a request carries no context. Translation and source
/// rows never hold a NULL context hash.
pub const GLOBAL_CONTEXT: &str = "__GLOBAL__";

/// Canonical serialization of a context value: compact JSON with object keys
/// sorted. serde_json's Map is BTreeMap-backed, so `to_string` already emits
/// sorted keys at every nesting level (the crate must not enable the
/// `preserve_order` feature).
pub fn canonical_json(context: &Value) -> Result<String> {
    if !context.is_object() {
        return Err(TransHubError::Validation(
            "context must be a JSON object".into(),
        ));
    }
    Ok(serde_json::to_string(context)?)
}

/// Hex SHA-256 of the canonical serialization, or the sentinel when absent.
///
/// Hashes are always derived here; callers never supply one, so the sentinel
/// cannot be forged by a crafted context.
pub fn context_hash(context: Option<&Value>) -> Result<String> {
    match context {
        None => Ok(GLOBAL_CONTEXT.to_string()),
        Some(value) => {
            let canonical = canonical_json(value)?;
            let mut hasher = Sha256::new();
            hasher.update(canonical.as_bytes());
            Ok(format!("{:x}", hasher.finalize()))
        }
    }
}
