// Copyright 2020 Andreas Kurth
//
// SPDX-License-Identifier: (Apache-2.0 OR MIT)

//! Test utilities
//!
//! Fixture builders for writing signed link/layout documents to a temporary directory, used by
//! the loader and orchestrator test modules to exercise on-disk discovery without hand-writing
//! JSON in every test.

use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::link::{Link, Metablock, Signature};
use data_encoding::HEXLOWER;
use ed25519_dalek::{Keypair, Signer};
use serde::Serialize;
use std::path::Path;

pub fn create_file<P: AsRef<Path> + std::fmt::Debug>(path: P) -> Result<std::fs::File> {
    std::fs::File::create(&path)
        .map_err(|cause| Error::chain(format!("Could not create file {:?}:", path), cause))
}

pub fn write_file(f: &mut std::fs::File, s: &str) -> Result<()> {
    use std::io::Write;
    write!(f, "{}", s)
        .map_err(|cause| Error::chain(format!("Could not write to file {:?}", f), cause))
}

/// Signs `signed` under `keyid` with `kp` and returns the Metablock envelope.
pub fn sign<T: Serialize>(kp: &Keypair, keyid: &str, signed: T) -> Metablock<T> {
    let mut mb = Metablock {
        signed,
        signatures: vec![],
    };
    let payload = mb.canonical_payload().unwrap();
    let sig = kp.sign(&payload);
    mb.signatures.push(Signature {
        keyid: keyid.to_string(),
        sig: HEXLOWER.encode(&sig.to_bytes()),
    });
    mb
}

/// Writes a signed link Metablock to `dir/<step>.<short_keyid>.link`, the naming convention
/// `loader::load_step_links` discovers files under.
pub fn write_link_file(dir: &Path, step: &str, keyid: &str, link: Link) -> Result<()> {
    let short: String = keyid.chars().take(8).collect();
    let path = dir.join(format!("{}.{}.link", step, short));
    let metablock = Metablock {
        signed: link,
        signatures: vec![Signature {
            keyid: keyid.to_string(),
            sig: String::new(),
        }],
    };
    let body = serde_json::to_string(&serde_json::json!({
        "signed": {
            "_type": "link",
            "name": metablock.signed.name,
            "materials": metablock.signed.materials,
            "products": metablock.signed.products,
            "command": metablock.signed.command,
            "byproducts": metablock.signed.byproducts,
            "environment": metablock.signed.environment,
        },
        "signatures": metablock.signatures,
    }))
    .map_err(|cause| Error::chain_kind(crate::error::ErrorKind::Format, "could not serialize link fixture", cause))?;
    std::fs::write(&path, body)
        .map_err(|cause| Error::chain(format!("could not write link fixture {:?}", path), cause))
}

/// Writes a signed sublayout Metablock to `dir/<step>.<short_keyid>.link`.
pub fn write_sublayout_file(dir: &Path, step: &str, kp: &Keypair, keyid: &str, layout: Layout) -> Result<()> {
    let short: String = keyid.chars().take(8).collect();
    let path = dir.join(format!("{}.{}.link", step, short));
    let mb = sign(kp, keyid, layout);
    let body = serde_json::to_string(&serde_json::json!({
        "signed": {
            "_type": "layout",
            "expires": mb.signed.expires,
            "readme": mb.signed.readme,
            "keys": mb.signed.keys,
            "steps": mb.signed.steps,
            "inspect": mb.signed.inspect,
        },
        "signatures": mb.signatures,
    }))
    .map_err(|cause| Error::chain_kind(crate::error::ErrorKind::Format, "could not serialize sublayout fixture", cause))?;
    std::fs::write(&path, body)
        .map_err(|cause| Error::chain(format!("could not write sublayout fixture {:?}", path), cause))
}
