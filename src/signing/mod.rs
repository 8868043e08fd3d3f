//! Request signing for the protected relay.
//!
//! This module provides utilities for:
//! - Creating signers from private keys
//! - Computing wallet addresses
//! - Cached signers so relay submissions skip key parsing
//! - Building the relay signature header

use std::collections::HashMap;
use std::sync::RwLock;

use alloy::primitives::keccak256;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::error::SigningError;

/// Header carrying `<address>:<signature>` on relay requests.
pub const RELAY_SIGNATURE_HEADER: &str = "X-Relay-Signature";

/// Signers keyed by a hash of the private key, so raw keys are never map keys.
static SIGNER_CACHE: Lazy<RwLock<HashMap<u64, PrivateKeySigner>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

fn key_hash(private_key: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    private_key.hash(&mut hasher);
    hasher.finish()
}

/// Create a signer from a hex-encoded private key, with or without `0x`.
pub fn create_signer(private_key: &str) -> Result<PrivateKeySigner, SigningError> {
    let key = private_key.strip_prefix("0x").unwrap_or(private_key);
    let bytes = hex::decode(key)
        .map_err(|e| SigningError::InvalidKey(format!("invalid hex: {}", e)))?;

    if bytes.len() != 32 {
        return Err(SigningError::InvalidKey(format!(
            "must be 32 bytes, got {}",
            bytes.len()
        )));
    }

    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&bytes);

    PrivateKeySigner::from_bytes(&key_bytes.into())
        .map_err(|e| SigningError::InvalidKey(e.to_string()))
}

/// Get or create a cached signer for the given private key.
pub fn get_or_create_signer(private_key: &str) -> Result<PrivateKeySigner, SigningError> {
    let hash = key_hash(private_key);

    {
        let cache = SIGNER_CACHE
            .read()
            .map_err(|e| SigningError::Cache(e.to_string()))?;
        if let Some(signer) = cache.get(&hash) {
            return Ok(signer.clone());
        }
    }

    let signer = create_signer(private_key)?;

    let mut cache = SIGNER_CACHE
        .write()
        .map_err(|e| SigningError::Cache(e.to_string()))?;
    let signer = cache.entry(hash).or_insert(signer).clone();
    debug!(address = %signer.address(), "Signer cached");
    Ok(signer)
}

/// Wallet address for a private key, checksummed.
pub fn address_from_private_key(private_key: &str) -> Result<String, SigningError> {
    let signer = create_signer(private_key)?;
    Ok(signer.address().to_checksum(None))
}

/// EIP-191 personal signature of `message`.
pub async fn sign_message(private_key: &str, message: &[u8]) -> Result<Vec<u8>, SigningError> {
    let signer = get_or_create_signer(private_key)?;
    let signature = signer
        .sign_message(message)
        .await
        .map_err(|e| SigningError::SignFailed(e.to_string()))?;
    Ok(signature.as_bytes().to_vec())
}

/// Value for [`RELAY_SIGNATURE_HEADER`]: the signer address and a personal
/// signature over the hex-encoded keccak hash of the request body.
pub async fn relay_signature_header(
    private_key: &str,
    body: &[u8],
) -> Result<String, SigningError> {
    let signer = get_or_create_signer(private_key)?;
    let digest = format!("{:#x}", keccak256(body));
    let signature = signer
        .sign_message(digest.as_bytes())
        .await
        .map_err(|e| SigningError::SignFailed(e.to_string()))?;

    Ok(format!(
        "{}:0x{}",
        signer.address().to_checksum(None),
        hex::encode(signature.as_bytes())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "0x0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn create_signer_accepts_both_prefixes() {
        assert!(create_signer(KEY).is_ok());
        assert!(create_signer(&KEY[2..]).is_ok());
    }

    #[test]
    fn create_signer_rejects_bad_keys() {
        assert!(matches!(create_signer("0xnot_valid_hex"), Err(SigningError::InvalidKey(_))));
        assert!(matches!(create_signer("0x1234"), Err(SigningError::InvalidKey(_))));
    }

    #[test]
    fn cached_signer_matches_fresh_signer() {
        let cached = get_or_create_signer(KEY).unwrap();
        let fresh = create_signer(KEY).unwrap();
        assert_eq!(cached.address(), fresh.address());
    }

    #[test]
    fn address_is_checksummed_hex() {
        let addr = address_from_private_key(KEY).unwrap();
        assert!(addr.starts_with("0x"));
        assert_eq!(addr.len(), 42);
    }

    #[tokio::test]
    async fn relay_header_names_signer() {
        let header = relay_signature_header(KEY, br#"{"jsonrpc":"2.0"}"#).await.unwrap();
        let (address, signature) = header.split_once(':').unwrap();
        assert_eq!(address, address_from_private_key(KEY).unwrap());
        // 65-byte signature, hex encoded with prefix.
        assert_eq!(signature.len(), 2 + 130);
    }

    #[tokio::test]
    async fn signatures_differ_per_body() {
        let a = relay_signature_header(KEY, b"a").await.unwrap();
        let b = relay_signature_header(KEY, b"b").await.unwrap();
        assert_ne!(a, b);
    }
}
