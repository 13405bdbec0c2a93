use crate::*;
use num_bigint::BigUint;
use std::borrow::Cow;

pub use hex_buffer_serde::Hex;

// a single-purpose type for use in `#[serde(with)]`
pub enum BigUintHex {}

impl Hex<BigUint> for BigUintHex {
    type Error = String;

    fn create_bytes(value: &BigUint) -> Cow<'_, [u8]> {
        Cow::from(value.to_bytes_be())
    }

    fn from_bytes(bytes: &[u8]) -> Result<BigUint, String> {
        if bytes.is_empty() {
            return Err("empty integer encoding".to_owned());
        }
        Ok(BigUint::from_bytes_be(bytes))
    }
}

// a single-purpose type for use in `#[serde(with)]`
pub enum KeyIdHex {}

impl Hex<KeyId> for KeyIdHex {
    type Error = String;

    fn create_bytes(key_id: &KeyId) -> Cow<'_, [u8]> {
        Cow::from(&key_id.0[..])
    }

    fn from_bytes(bytes: &[u8]) -> Result<KeyId, String> {
        KeyId::from_slice(bytes).ok_or_else(|| format!("key id must be 32 bytes, got {}", bytes.len()))
    }
}

// a single-purpose type for use in `#[serde(with)]`
pub enum Digest32Hex {}

impl Hex<[u8; 32]> for Digest32Hex {
    type Error = String;

    fn create_bytes(digest: &[u8; 32]) -> Cow<'_, [u8]> {
        Cow::from(&digest[..])
    }

    fn from_bytes(bytes: &[u8]) -> Result<[u8; 32], String> {
        let mut digest = [0u8; 32];
        if bytes.len() != digest.len() {
            return Err(format!("digest must be 32 bytes, got {}", bytes.len()));
        }
        digest.copy_from_slice(bytes);
        Ok(digest)
    }
}
