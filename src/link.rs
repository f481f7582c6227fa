// Copyright 2020 Andreas Kurth
//
// SPDX-License-Identifier: (Apache-2.0 OR MIT)

//! Link Documents
//!
//! A [`Link`] is named evidence of a step's or inspection's execution. It is produced externally
//! and loaded read-only by this crate; nothing here ever mutates a `Link` once loaded.

use crate::crypto::HashSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named evidence of a step or inspection execution. See spec §3.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Link {
    pub name: String,
    /// Path -> hash-set, in the order recorded by the functionary's tooling.
    pub materials: BTreeMap<String, HashSet>,
    pub products: BTreeMap<String, HashSet>,
    pub command: Vec<String>,
    #[serde(default)]
    pub byproducts: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub environment: BTreeMap<String, serde_json::Value>,
}

impl Link {
    /// The `byproducts["return-value"]` of this link, if present and representable as `i64`.
    pub fn return_value(&self) -> Option<i64> {
        self.byproducts.get("return-value").and_then(|v| v.as_i64())
    }
}

/// One signature over a Metablock's signed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub keyid: String,
    pub sig: String,
}

/// A signed envelope, generic over its payload (a [`Link`] or a
/// [`Layout`](crate::layout::Layout)).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metablock<T> {
    pub signed: T,
    pub signatures: Vec<Signature>,
}

impl<T: Serialize> Metablock<T> {
    /// The canonical (stable key-order) serialization of `signed`, which is what signatures are
    /// computed and verified over. `serde_json`'s default map representation (`BTreeMap`-backed,
    /// since we do not enable the `preserve_order` feature) already sorts object keys, so plain
    /// `to_vec` is canonical.
    pub fn canonical_payload(&self) -> crate::error::Result<Vec<u8>> {
        serde_json::to_vec(&self.signed).map_err(|cause| {
            crate::error::Error::chain_kind(
                crate::error::ErrorKind::Format,
                "could not canonicalize signed payload",
                cause,
            )
        })
    }
}

/// Mapping step-name -> (mapping keyid -> Link Metablock). Mutated only by the threshold
/// resolver (filtering) and the sublayout expander (collapse); read-only afterwards. See spec §3.
pub type ChainLinkDictionary = BTreeMap<String, BTreeMap<String, Metablock<Link>>>;
