// Copyright 2020 Andreas Kurth
//
// SPDX-License-Identifier: (Apache-2.0 OR MIT)

//! Signature & Threshold Resolver (C4)
//!
//! For each step, filters its link set down to links signed by authorized functionaries with
//! valid signatures and requires at least `threshold` links to remain
//! ([`verify_link_signature_thresholds`]); separately, once any sublayout entries have been
//! expanded into plain links by C6, requires that for `threshold >= 2` all surviving links agree
//! on materials and products ([`verify_threshold_constraints`]). See spec §4.4.
//!
//! The two checks are deliberately separate functions, run on either side of sublayout expansion
//! (spec §2 dataflow: "C4 → (C6 recursively)"): a step backed by a sublayout has no
//! materials/products to compare until C6 has collapsed it into a summary link, but its signature
//! must already be authorized and counted toward the threshold *before* C6 discards it (the
//! in-toto reference keeps these as two functions, `verify_link_signature_thresholds` and
//! `verify_threshold_constraints`, for the same reason — see
//! `examples/original_source/tests/test_verifylib.py`).

use crate::crypto::{self, PublicKey};
use crate::error::{Error, Result};
use crate::layout::{KeyBundle, Layout, RawChainLinkDictionary};
use crate::link::ChainLinkDictionary;
use data_encoding::HEXLOWER;
use log::debug;
use std::collections::{BTreeMap, HashSet};

/// Flattens a layout's (possibly nested) key bundles into keyid -> [`PublicKey`], recording
/// master/subkey relationships along the way.
pub(crate) fn flatten_keys(layout: &Layout) -> Result<BTreeMap<String, PublicKey>> {
    let mut flat = BTreeMap::new();
    for (top_id, bundle) in &layout.keys {
        insert_bundle(&mut flat, top_id, bundle, None)?;
    }
    Ok(flat)
}

fn insert_bundle(
    flat: &mut BTreeMap<String, PublicKey>,
    id: &str,
    bundle: &KeyBundle,
    master_id: Option<String>,
) -> Result<()> {
    let bytes = HEXLOWER
        .decode(bundle.keyval.public.to_lowercase().as_bytes())
        .map_err(|cause| {
            Error::chain_kind(
                crate::error::ErrorKind::Format,
                format!("invalid public key hex for keyid \"{}\"", id),
                cause,
            )
        })?;
    let mut key = PublicKey::from_bytes(id.to_string(), &bytes)?;
    key.master_id = master_id;
    key.subkey_ids = bundle.subkeys.keys().cloned().collect();
    flat.insert(id.to_string(), key);
    for (sub_id, sub_bundle) in &bundle.subkeys {
        insert_bundle(flat, sub_id, sub_bundle, Some(id.to_string()))?;
    }
    Ok(())
}

/// Expands a step's `pubkeys` to a transitive closure over master/subkey relationships: a
/// subkey id authorizes its master, and a master id authorizes all of its embedded subkeys
/// (spec §4.4).
pub(crate) fn expand_authorized(pubkeys: &[String], keys: &BTreeMap<String, PublicKey>) -> HashSet<String> {
    let mut authorized: HashSet<String> = pubkeys.iter().cloned().collect();
    loop {
        let mut added = false;
        let snapshot: Vec<String> = authorized.iter().cloned().collect();
        for id in snapshot {
            if let Some(key) = keys.get(&id) {
                for sub in &key.subkey_ids {
                    added |= authorized.insert(sub.clone());
                }
                if let Some(master) = &key.master_id {
                    added |= authorized.insert(master.clone());
                }
            }
        }
        if !added {
            break;
        }
    }
    authorized
}

/// Filters each step's raw (pre-sublayout-expansion) link set down to entries signed by an
/// authorized functionary with a valid signature, and requires at least `threshold` to remain.
/// `dict` entries may be either a `Link` or a `Layout` (sublayout); either is verified the same
/// way, against the canonical payload of whichever document was actually signed — see
/// `LinkOrLayout::canonical_payload`. Missing-step entries are treated as zero links. See spec
/// §4.4, §2 dataflow.
pub fn verify_link_signature_thresholds(layout: &Layout, dict: &mut RawChainLinkDictionary) -> Result<()> {
    let keys = flatten_keys(layout)?;
    for step in &layout.steps {
        let authorized = expand_authorized(&step.pubkeys, &keys);
        let links = dict.entry(step.name.clone()).or_insert_with(BTreeMap::new);
        let mut retained = BTreeMap::new();
        for (keyid, metablock) in links.iter() {
            if !authorized.contains(keyid) {
                debug!(
                    "step \"{}\": discarding link signed by unauthorized keyid \"{}\"",
                    step.name, keyid
                );
                continue;
            }
            let key = match keys.get(keyid) {
                Some(k) => k,
                None => {
                    debug!(
                        "step \"{}\": discarding link, no public key registered for keyid \"{}\"",
                        step.name, keyid
                    );
                    continue;
                }
            };
            let payload = metablock.signed.canonical_payload()?;
            let verified = metablock.signatures.iter().any(|sig| {
                sig.keyid == *keyid
                    && HEXLOWER
                        .decode(sig.sig.to_lowercase().as_bytes())
                        .map(|bytes| crypto::verify_signature(key, &payload, &bytes))
                        .unwrap_or(false)
            });
            if verified {
                retained.insert(keyid.clone(), metablock.clone());
            } else {
                debug!(
                    "step \"{}\": discarding link, signature by \"{}\" did not verify",
                    step.name, keyid
                );
            }
        }
        if (retained.len() as u32) < step.threshold {
            return Err(Error::threshold_verification(format!(
                "step \"{}\" requires {} valid link(s), found {}",
                step.name,
                step.threshold,
                retained.len()
            )));
        }
        *links = retained;
    }
    Ok(())
}

/// For each step with `threshold >= 2`, requires that all surviving links (now plain `Link`s,
/// after sublayout expansion has collapsed any sublayout entries) record byte-identical materials
/// and byte-identical products. Run after [`verify_link_signature_thresholds`] and sublayout
/// expansion, per spec §2's "C4 → (C6 recursively)" dataflow. See spec §4.4, §8.
pub fn verify_threshold_constraints(layout: &Layout, dict: &ChainLinkDictionary) -> Result<()> {
    for step in &layout.steps {
        if step.threshold < 2 {
            continue;
        }
        let links = match dict.get(&step.name) {
            Some(links) => links,
            None => continue,
        };
        let mut iter = links.values();
        if let Some(first) = iter.next() {
            for other in iter {
                if first.signed.materials != other.signed.materials
                    || first.signed.products != other.signed.products
                {
                    return Err(Error::threshold_verification(format!(
                        "step \"{}\": surviving links disagree on materials/products",
                        step.name
                    )));
                }
            }
        }
    }
    Ok(())
}
