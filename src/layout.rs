// Copyright 2020 Andreas Kurth
//
// SPDX-License-Identifier: (Apache-2.0 OR MIT)

//! Layout Documents
//!
//! A [`Layout`] is the signed declarative policy: the steps a build must perform, who may
//! perform them, how inputs/outputs must relate, and what inspections must pass. See spec §3.

use crate::error::{Error, ErrorKind, Result};
use crate::link::{Link, Metablock};
use crate::rule::Rule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An embedded public key, identified by `keyid`. `keyval.public` holds the hex-encoded raw
/// ed25519 public key. `subkeys`, when present, names signing subkeys delegated by this key (spec
/// §4.4 master/subkey semantics): a signature by a subkey id satisfies an authorization naming
/// the master id, and vice versa.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBundle {
    pub keyid: String,
    #[serde(default = "default_keytype")]
    pub keytype: String,
    pub keyval: KeyVal,
    #[serde(default)]
    pub subkeys: BTreeMap<String, KeyBundle>,
}

fn default_keytype() -> String {
    "ed25519".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyVal {
    pub public: String,
}

/// Policy item executed and signed by one or more functionaries. See spec §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(default)]
    pub expected_command: Vec<String>,
    #[serde(default)]
    pub expected_materials: Vec<Rule>,
    #[serde(default)]
    pub expected_products: Vec<Rule>,
    pub pubkeys: Vec<String>,
    #[serde(default = "default_threshold")]
    pub threshold: u32,
}

fn default_threshold() -> u32 {
    1
}

/// Policy item executed locally by the verifier at verify time. No `pubkeys`/`threshold`: its
/// synthesized link is always trusted without a signature check. See spec §3, §4.5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inspection {
    pub name: String,
    #[serde(default)]
    pub run: Vec<String>,
    #[serde(default)]
    pub expected_materials: Vec<Rule>,
    #[serde(default)]
    pub expected_products: Vec<Rule>,
}

/// The signed policy document. See spec §3, §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layout {
    pub expires: DateTime<Utc>,
    #[serde(default)]
    pub readme: String,
    pub keys: BTreeMap<String, KeyBundle>,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub inspect: Vec<Inspection>,
}

impl Layout {
    /// `true` iff `now` is strictly after `self.expires` (spec §4.7: strict expiry).
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires
    }
}

/// Either a [`Link`] or a [`Layout`], discriminated by the wrapped document's `_type` field, the
/// way spec §4.6 requires for sublayout detection: a step's "link" file may itself be a signed
/// layout.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "_type", rename_all = "lowercase")]
pub enum LinkOrLayout {
    Link(Link),
    Layout(Layout),
}

impl LinkOrLayout {
    /// The canonical payload of the wrapped document alone (not the `LinkOrLayout` envelope),
    /// so it matches the bytes a functionary actually signed over a bare `Link`/`Layout`. Used by
    /// the signature & threshold resolver (C4) to verify a step's link set *before* sublayout
    /// expansion (C6) collapses any `Layout` entries into summary links (spec §2 dataflow:
    /// "C4 → (C6 recursively)").
    pub fn canonical_payload(&self) -> Result<Vec<u8>> {
        match self {
            LinkOrLayout::Link(link) => serde_json::to_vec(link),
            LinkOrLayout::Layout(layout) => serde_json::to_vec(layout),
        }
        .map_err(|cause| {
            Error::chain_kind(ErrorKind::Format, "could not canonicalize signed payload", cause)
        })
    }
}

/// Mapping step-name -> (mapping keyid -> Metablock), before sublayout expansion: entries may be
/// either a [`Link`] or, for a step backed by a sublayout, a [`Layout`]. Produced by the link
/// loader (C8) and consumed by the signature & threshold resolver (C4); the sublayout expander
/// (C6) then collapses it into a [`crate::link::ChainLinkDictionary`] of plain links.
pub type RawChainLinkDictionary = BTreeMap<String, BTreeMap<String, Metablock<LinkOrLayout>>>;
