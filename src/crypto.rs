// Copyright 2020 Andreas Kurth
//
// SPDX-License-Identifier: (Apache-2.0 OR MIT)

//! Hashing and signature primitives.
//!
//! Spec §1 keeps the rule-evaluation algorithm (C1-C9) ignorant of *how* a digest or a signature
//! is computed: those subsystems only ever compare opaque bytes or ask "does this verify". This
//! module is the one real implementation behind that interface, so callers elsewhere in the
//! crate should go through `crypto::hash_*`/`crypto::verify_signature` rather than reaching for
//! `sha2`/`ed25519_dalek` directly.

use crate::error::{Error, Result};
use data_encoding::HEXLOWER;
use ed25519_dalek::{PublicKey as Ed25519PublicKey, Signature as Ed25519Signature, Verifier};
use log::trace;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;

/// A digest, stored as raw bytes and serialized as lowercase hex, matching the hex-string digests
/// in in-toto link/layout documents.
#[derive(Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct HashDigest(#[serde(with = "hex_bytes")] Vec<u8>);

impl HashDigest {
    pub fn from_bytes(bytes: Vec<u8>) -> HashDigest {
        HashDigest(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        HEXLOWER.encode(&self.0)
    }
}

impl fmt::Debug for HashDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashDigest({})", self.to_hex())
    }
}

mod hex_bytes {
    use data_encoding::HEXLOWER;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> std::result::Result<S::Ok, S::Error> {
        ser.serialize_str(&HEXLOWER.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        HEXLOWER
            .decode(s.to_lowercase().as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// A path's recorded hashes, keyed by algorithm name (`"sha256"`, typically).
pub type HashSet = BTreeMap<String, HashDigest>;

/// Computes the sha256 digest of a byte slice.
pub fn hash_bytes(data: &[u8]) -> HashSet {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let mut set = BTreeMap::new();
    set.insert(
        "sha256".to_string(),
        HashDigest::from_bytes(hasher.finalize().to_vec()),
    );
    set
}

/// Computes the sha256 digest of a readable stream, without loading it entirely into memory.
pub fn hash_reader<R: Read>(reader: &mut R) -> Result<HashSet> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|cause| Error::chain("could not read artifact contents", cause))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let mut set = BTreeMap::new();
    set.insert(
        "sha256".to_string(),
        HashDigest::from_bytes(hasher.finalize().to_vec()),
    );
    Ok(set)
}

/// True iff two hash sets share at least one algorithm with identical digests.
pub fn hashes_match(a: &HashSet, b: &HashSet) -> bool {
    a.iter().any(|(algo, digest)| match b.get(algo) {
        Some(other) => digest == other,
        None => false,
    })
}

/// An ed25519 public key, identified by the `keyid` under which it is named in a layout's `keys`
/// map or a step's `pubkeys` set. `subkey_ids` lists the ids of signing subkeys embedded in this
/// key bundle via master/subkey delegation; `master_id`, when set, means this entry *is* a subkey
/// of another bundle.
#[derive(Debug, Clone)]
pub struct PublicKey {
    pub keyid: String,
    pub key: Ed25519PublicKey,
    pub subkey_ids: Vec<String>,
    pub master_id: Option<String>,
}

impl PublicKey {
    pub fn from_bytes(keyid: String, bytes: &[u8]) -> Result<PublicKey> {
        let key = Ed25519PublicKey::from_bytes(bytes)
            .map_err(|cause| Error::chain_kind(crate::error::ErrorKind::Format, "invalid public key bytes", cause))?;
        Ok(PublicKey {
            keyid,
            key,
            subkey_ids: Vec::new(),
            master_id: None,
        })
    }
}

/// Verifies a raw ed25519 signature over `payload` under `key`. Never panics on malformed
/// signature bytes; malformed input is simply "does not verify".
pub fn verify_signature(key: &PublicKey, payload: &[u8], signature: &[u8]) -> bool {
    let sig = match Ed25519Signature::from_bytes(signature) {
        Ok(s) => s,
        Err(_) => {
            trace!("malformed signature bytes for keyid {}", key.keyid);
            return false;
        }
    };
    key.key.verify(payload, &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_bytes_is_stable() {
        let a = hash_bytes(b"hello world");
        let b = hash_bytes(b"hello world");
        assert!(hashes_match(&a, &b));
    }

    #[test]
    fn hash_bytes_differs_for_different_input() {
        let a = hash_bytes(b"hello world");
        let b = hash_bytes(b"goodbye world");
        assert!(!hashes_match(&a, &b));
    }

    #[test]
    fn hashes_match_requires_shared_algorithm() {
        let mut a = BTreeMap::new();
        a.insert("sha256".to_string(), HashDigest::from_bytes(vec![1, 2, 3]));
        let mut b = BTreeMap::new();
        b.insert("sha512".to_string(), HashDigest::from_bytes(vec![1, 2, 3]));
        assert!(!hashes_match(&a, &b));
    }
}
