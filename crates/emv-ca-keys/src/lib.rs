//! EMV CA Keys - Certificate Authority public key management
//!
//! This crate loads the CA public keys the contactless kernel needs for
//! offline data authentication and looks them up by RID and index.

use std::path::{Path, PathBuf};

use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised while loading a CA key list
#[derive(Debug, Error)]
pub enum CaKeyError {
    #[error("unable to read CA key file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One certification authority public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaPublicKey {
    /// Payment scheme label from the key list
    pub scheme: String,
    /// Registered Application Provider Identifier
    pub rid: [u8; 5],
    /// CA Public Key Index
    pub index: u8,
    pub key: RsaPublicKey,
}

impl CaPublicKey {
    /// Modulus, big-endian, as handed to the kernel
    pub fn modulus_bytes(&self) -> Vec<u8> {
        self.key.n().to_bytes_be()
    }

    /// Public exponent, big-endian, as handed to the kernel
    pub fn exponent_bytes(&self) -> Vec<u8> {
        self.key.e().to_bytes_be()
    }

    /// Key length in bytes
    pub fn size(&self) -> usize {
        self.key.size()
    }
}

/// CA public keys indexed by RID and index
#[derive(Debug, Clone, Default)]
pub struct CaKeyStore {
    keys: Vec<CaPublicKey>,
}

impl CaKeyStore {
    /// An empty store; every lookup fails
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a tab-separated key list from disk
    pub fn from_file(path: &Path) -> Result<Self, CaKeyError> {
        let text = std::fs::read_to_string(path).map_err(|source| CaKeyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    /// Parse a key list
    ///
    /// Format: `Scheme, Exponent, Index, RID, Modulus[, KeyLength, Hash]`,
    /// tab separated, hex encoded. Empty lines and `#` comments are skipped.
    /// Lines that cannot be parsed are logged and skipped.
    pub fn parse(text: &str) -> Self {
        let mut keys = Vec::new();

        for (number, line) in text.lines().enumerate() {
            // Skip empty lines and comments
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }

            match parse_line(line) {
                Some(key) => keys.push(key),
                None => warn!(line = number + 1, "Skipping unparseable CA key entry"),
            }
        }

        debug!(count = keys.len(), "CA key list loaded");
        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CaPublicKey> {
        self.keys.iter()
    }

    /// Get CA public key by RID and index
    ///
    /// # Arguments
    /// * `rid` - Registered Application Provider Identifier (5 bytes)
    /// * `ca_index` - CA Public Key Index (1 byte)
    ///
    /// # Returns
    /// * `Some(&CaPublicKey)` - The CA public key if found
    /// * `None` - If no matching key is found
    pub fn get(&self, rid: &[u8], ca_index: u8) -> Option<&CaPublicKey> {
        self.keys
            .iter()
            .find(|k| k.rid.as_slice() == rid && k.index == ca_index)
    }

    /// All keys registered for a RID
    pub fn keys_for_rid<'a>(&'a self, rid: &'a [u8]) -> impl Iterator<Item = &'a CaPublicKey> + 'a {
        self.keys.iter().filter(move |k| k.rid.as_slice() == rid)
    }
}

fn parse_line(line: &str) -> Option<CaPublicKey> {
    let parts: Vec<&str> = line.split('\t').map(str::trim).collect();
    if parts.len() < 5 {
        return None;
    }

    let scheme = parts[0];
    let exponent_hex = parts[1];
    let index = u8::from_str_radix(parts[2], 16).ok()?;
    let rid: [u8; 5] = hex::decode(parts[3]).ok()?.try_into().ok()?;
    let modulus_hex = parts[4];

    let modulus = BigUint::parse_bytes(modulus_hex.as_bytes(), 16)?;
    let exponent = BigUint::parse_bytes(exponent_hex.as_bytes(), 16)?;
    let key = RsaPublicKey::new(modulus, exponent).ok()?;

    Some(CaPublicKey {
        scheme: scheme.to_string(),
        rid,
        index,
        key,
    })
}

/// Common RIDs for major payment schemes
pub mod rids {
    /// Visa RID
    pub const VISA: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x03];

    /// Mastercard RID
    pub const MASTERCARD: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x04];

    /// American Express RID
    pub const AMEX: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x02];

    /// Discover RID
    pub const DISCOVER: &[u8] = &[0xA0, 0x00, 0x00, 0x01, 0x52];

    /// JCB RID
    pub const JCB: &[u8] = &[0xA0, 0x00, 0x00, 0x00, 0x65];

    /// UnionPay RID
    pub const UNIONPAY: &[u8] = &[0xA0, 0x00, 0x00, 0x03, 0x33];
}
