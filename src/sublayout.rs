// Copyright 2020 Andreas Kurth
//
// SPDX-License-Identifier: (Apache-2.0 OR MIT)

//! Sublayout Expander (C6)
//!
//! When a step's "link" file is itself a signed layout, it is recursively verified and collapsed
//! into a single synthetic link summarizing the sublayout's first-step materials and last-step
//! products. See spec §4.6.
//!
//! Runs *after* the signature & threshold resolver (C4) has already filtered and counted each
//! step's raw link set (spec §2 dataflow: "C4 → (C6 recursively)"); by the time [`expand`] sees a
//! sublayout, its signing keyid has already been checked against the parent step's authorized
//! functionaries, which is why the collapsed summary link's own signatures are discarded instead
//! of re-verified.

use crate::error::{Error, Result};
use crate::layout::{Layout, LinkOrLayout, RawChainLinkDictionary, Step};
use crate::link::{ChainLinkDictionary, Link, Metablock};
use crate::loader;
use crate::orchestrator;
use log::debug;
use std::collections::BTreeMap;
use std::path::Path;

/// Recursion depth past which sublayout expansion is refused (spec §4.6: "implementations should
/// impose a sane limit").
pub const MAX_DEPTH: u32 = 16;

/// Expands a sublayout recorded under `keyid` for `parent_step`. Returns the (unsigned) summary
/// link — its own signatures are discarded, since authorization was already checked against
/// `parent_step.pubkeys` by the threshold resolver before this ever ran.
pub fn expand(
    sub_metablock: &Metablock<Layout>,
    parent_step: &Step,
    sub_link_dir: &Path,
    depth: u32,
) -> Result<Metablock<Link>> {
    if depth >= MAX_DEPTH {
        return Err(Error::format(format!(
            "sublayout recursion exceeded the maximum depth of {}",
            MAX_DEPTH
        )));
    }
    debug!(
        "expanding sublayout for step \"{}\" under {:?} at depth {}",
        parent_step.name, sub_link_dir, depth
    );
    let mut summary = orchestrator::verify(
        sub_metablock,
        sub_link_dir,
        &parent_step.pubkeys,
        depth + 1,
    )?;
    summary.signed.name = parent_step.name.clone();
    summary.signatures.clear();
    Ok(summary)
}

/// Walks `raw` — the per-step dictionaries [`loader::load_links`] discovered and
/// `threshold::verify_link_signature_thresholds` has already filtered down to authorized, validly
/// signed entries — expanding any sublayout entries and passing real links through unchanged.
pub fn expand_all(
    layout: &Layout,
    mut raw: RawChainLinkDictionary,
    link_dir: &Path,
    depth: u32,
) -> Result<ChainLinkDictionary> {
    let mut dict = ChainLinkDictionary::new();
    for step in &layout.steps {
        let entries = raw.remove(&step.name).unwrap_or_default();
        let mut expanded = BTreeMap::new();
        for (keyid, metablock) in entries {
            match metablock.signed {
                LinkOrLayout::Link(link) => {
                    expanded.insert(
                        keyid,
                        Metablock {
                            signed: link,
                            signatures: metablock.signatures,
                        },
                    );
                }
                LinkOrLayout::Layout(sub_layout) => {
                    let sub_metablock = Metablock {
                        signed: sub_layout,
                        signatures: metablock.signatures,
                    };
                    let sub_link_dir = loader::sublayout_dir(link_dir, &step.name, &keyid);
                    let summary = expand(&sub_metablock, step, &sub_link_dir, depth)?;
                    expanded.insert(keyid, summary);
                }
            }
        }
        dict.insert(step.name.clone(), expanded);
    }
    Ok(dict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{KeyBundle, KeyVal};
    use data_encoding::HEXLOWER;
    use ed25519_dalek::{Keypair, PublicKey as DalekPublicKey, SecretKey};
    use std::collections::BTreeMap;
    use tempdir::TempDir;

    fn keypair(seed: u8) -> Keypair {
        let secret = SecretKey::from_bytes(&[seed; 32]).unwrap();
        let public: DalekPublicKey = (&secret).into();
        Keypair { secret, public }
    }

    fn sub_layout(keyid: &str, kp: &Keypair) -> Layout {
        use chrono::{TimeZone, Utc};
        let mut keys = BTreeMap::new();
        keys.insert(
            keyid.to_string(),
            KeyBundle {
                keyid: keyid.to_string(),
                keytype: "ed25519".to_string(),
                keyval: KeyVal {
                    public: HEXLOWER.encode(kp.public.as_bytes()),
                },
                subkeys: BTreeMap::new(),
            },
        );
        Layout {
            expires: Utc.ymd(2999, 1, 1).and_hms(0, 0, 0),
            readme: String::new(),
            keys,
            steps: vec![],
            inspect: vec![],
        }
    }

    fn parent_step() -> Step {
        Step {
            name: "build".to_string(),
            expected_command: vec![],
            expected_materials: vec![],
            expected_products: vec![],
            pubkeys: vec!["sub-root".to_string()],
            threshold: 1,
        }
    }

    #[test]
    fn expanding_renames_summary_to_parent_step_and_drops_signatures() {
        use crate::test_util::sign;
        let kp = keypair(42);
        let layout = sub_layout("sub-root", &kp);
        let sub_metablock = sign(&kp, "sub-root", layout);
        let tmp = TempDir::new("sublayout-test").unwrap();
        let summary = expand(&sub_metablock, &parent_step(), tmp.path(), 0).unwrap();
        assert_eq!(summary.signed.name, "build");
        assert!(summary.signatures.is_empty());
    }

    #[test]
    fn refuses_to_recurse_past_max_depth() {
        use crate::test_util::sign;
        let kp = keypair(43);
        let layout = sub_layout("sub-root", &kp);
        let sub_metablock = sign(&kp, "sub-root", layout);
        let tmp = TempDir::new("sublayout-test").unwrap();
        let err = expand(&sub_metablock, &parent_step(), tmp.path(), MAX_DEPTH).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Format);
    }
}
