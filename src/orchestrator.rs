// Copyright 2020 Andreas Kurth
//
// SPDX-License-Identifier: (Apache-2.0 OR MIT)

//! Verification Orchestrator (C7) and Summary Link Builder (C9)
//!
//! Drives the full verification state machine of spec §4.7: layout signatures, expiry, link
//! loading (C8, recursing into sublayouts via C6), threshold resolution (C4), per-step and
//! per-inspection rule evaluation (C2, C3), inspection execution (C5), and finally collapses the
//! whole run into one synthetic summary link (C9).

use crate::crypto;
use crate::error::{Error, ErrorKind, Result};
use crate::item;
use crate::layout::Layout;
use crate::link::{Link, Metablock};
use crate::loader;
use crate::sublayout;
use crate::threshold::{self, flatten_keys};
use chrono::Utc;
use data_encoding::HEXLOWER;
use log::{debug, info};
use std::collections::BTreeMap;
use std::path::Path;

/// Verifies that `metablock.signatures` contains at least one valid signature by a keyid that is
/// both registered in the layout's own `keys` section and present in (or authorized via
/// master/subkey delegation by) `verify_keys`, the caller-supplied trust root. See spec §4.7 step
/// 1, §4.4.
fn verify_layout_signatures(metablock: &Metablock<Layout>, verify_keys: &[String]) -> Result<()> {
    let keys = flatten_keys(&metablock.signed)?;
    let authorized = threshold::expand_authorized(verify_keys, &keys);
    let payload = metablock.canonical_payload()?;
    let verified = metablock.signatures.iter().any(|sig| {
        if !authorized.contains(&sig.keyid) {
            return false;
        }
        let key = match keys.get(&sig.keyid) {
            Some(k) => k,
            None => return false,
        };
        HEXLOWER
            .decode(sig.sig.to_lowercase().as_bytes())
            .map(|bytes| crypto::verify_signature(key, &payload, &bytes))
            .unwrap_or(false)
    });
    if verified {
        Ok(())
    } else {
        Err(Error::signature_verification(
            "layout has no valid signature from an authorized key",
        ))
    }
}

/// Builds the Summary Link (C9): a synthetic, unsigned [`Link`] whose materials are the first
/// step's and whose products are the last step's, per in-toto convention for collapsing a whole
/// supply chain run into one artifact other layouts can depend on via sublayout expansion.
fn build_summary_link(layout: &Layout, dict: &crate::link::ChainLinkDictionary) -> Link {
    let materials = layout
        .steps
        .first()
        .and_then(|step| dict.get(&step.name))
        .and_then(|links| links.values().next())
        .map(|mb| mb.signed.materials.clone())
        .unwrap_or_default();
    let products = layout
        .steps
        .last()
        .and_then(|step| dict.get(&step.name))
        .and_then(|links| links.values().next())
        .map(|mb| mb.signed.products.clone())
        .unwrap_or_default();
    let mut byproducts = BTreeMap::new();
    if let Some(return_value) = layout
        .steps
        .last()
        .and_then(|step| dict.get(&step.name))
        .and_then(|links| links.values().next())
        .and_then(|mb| mb.signed.byproducts.get("return-value"))
    {
        byproducts.insert("return-value".to_string(), return_value.clone());
    }
    Link {
        name: "summary".to_string(),
        materials,
        products,
        command: vec![],
        byproducts,
        environment: BTreeMap::new(),
    }
}

/// Runs the full verification state machine against `metablock` and returns an unsigned summary
/// link on success. `link_dir` is the root directory link/sublayout files are discovered under;
/// `verify_keys` is the caller's trust root for this layout's own signatures (for a top-level
/// call, the operator-supplied root keyids; for a sublayout, the enclosing step's `pubkeys`, per
/// spec §4.6). `depth` is the sublayout recursion depth, starting at 0.
pub fn verify(
    metablock: &Metablock<Layout>,
    link_dir: &Path,
    verify_keys: &[String],
    depth: u32,
) -> Result<Metablock<Link>> {
    let layout = &metablock.signed;

    verify_layout_signatures(metablock, verify_keys)?;
    debug!("layout signatures verified");

    if layout.is_expired(Utc::now()) {
        return Err(Error::layout_expired(format!(
            "layout expired at {}",
            layout.expires
        )));
    }

    let mut raw_dict = loader::load_links(layout, link_dir)?;
    threshold::verify_link_signature_thresholds(layout, &mut raw_dict)?;
    let dict = sublayout::expand_all(layout, raw_dict, link_dir, depth)?;
    threshold::verify_threshold_constraints(layout, &dict)?;
    info!(
        "resolved links for {} step(s) under {:?}",
        layout.steps.len(),
        link_dir
    );

    for step in &layout.steps {
        let links = dict.get(&step.name).ok_or_else(|| {
            Error::new(
                ErrorKind::LinkNotFound,
                format!("no resolved links for step \"{}\"", step.name),
            )
        })?;
        let representative = links.values().next().ok_or_else(|| {
            Error::threshold_verification(format!(
                "step \"{}\" has no surviving links after threshold resolution",
                step.name
            ))
        })?;
        item::drive_item(step, &representative.signed, &dict)?;
        item::check_command_alignment(step, &representative.signed);
    }

    let cwd = std::env::current_dir()
        .map_err(|cause| Error::chain("could not determine verifier working directory", cause))?;
    for inspection in &layout.inspect {
        let link = crate::inspection::run_inspection(inspection, &cwd)?;
        item::drive_item(inspection, &link, &dict)?;
    }

    let summary = build_summary_link(layout, &dict);
    Ok(Metablock {
        signed: summary,
        signatures: vec![],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{KeyBundle, KeyVal};
    use crate::link::Signature;
    use chrono::TimeZone;
    use ed25519_dalek::{Keypair, PublicKey as DalekPublicKey, SecretKey, Signer};
    use std::collections::BTreeMap;
    use tempdir::TempDir;

    fn keypair(seed: u8) -> Keypair {
        let secret = SecretKey::from_bytes(&[seed; 32]).unwrap();
        let public: DalekPublicKey = (&secret).into();
        Keypair { secret, public }
    }

    fn sign_layout(kp: &Keypair, keyid: &str, layout: Layout) -> Metablock<Layout> {
        let mut mb = Metablock {
            signed: layout,
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

    fn empty_layout(keys: BTreeMap<String, KeyBundle>) -> Layout {
        Layout {
            expires: Utc.ymd(2999, 1, 1).and_hms(0, 0, 0),
            readme: String::new(),
            keys,
            steps: vec![],
            inspect: vec![],
        }
    }

    #[test]
    fn rejects_layout_without_authorized_signature() {
        let kp = keypair(1);
        let mut keys = BTreeMap::new();
        keys.insert(
            "root".to_string(),
            KeyBundle {
                keyid: "root".to_string(),
                keytype: "ed25519".to_string(),
                keyval: KeyVal {
                    public: HEXLOWER.encode(kp.public.as_bytes()),
                },
                subkeys: BTreeMap::new(),
            },
        );
        let metablock = sign_layout(&kp, "root", empty_layout(keys));
        let tmp = TempDir::new("orchestrator-test").unwrap();
        let err = verify(&metablock, tmp.path(), &["someone-else".to_string()], 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignatureVerification);
    }

    #[test]
    fn rejects_expired_layout() {
        let kp = keypair(2);
        let mut keys = BTreeMap::new();
        keys.insert(
            "root".to_string(),
            KeyBundle {
                keyid: "root".to_string(),
                keytype: "ed25519".to_string(),
                keyval: KeyVal {
                    public: HEXLOWER.encode(kp.public.as_bytes()),
                },
                subkeys: BTreeMap::new(),
            },
        );
        let mut layout = empty_layout(keys);
        layout.expires = Utc.ymd(2000, 1, 1).and_hms(0, 0, 0);
        let metablock = sign_layout(&kp, "root", layout);
        let tmp = TempDir::new("orchestrator-test").unwrap();
        let err = verify(&metablock, tmp.path(), &["root".to_string()], 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LayoutExpired);
    }

    #[test]
    fn accepts_layout_with_no_steps_and_no_inspections() {
        let kp = keypair(3);
        let mut keys = BTreeMap::new();
        keys.insert(
            "root".to_string(),
            KeyBundle {
                keyid: "root".to_string(),
                keytype: "ed25519".to_string(),
                keyval: KeyVal {
                    public: HEXLOWER.encode(kp.public.as_bytes()),
                },
                subkeys: BTreeMap::new(),
            },
        );
        let metablock = sign_layout(&kp, "root", empty_layout(keys));
        let tmp = TempDir::new("orchestrator-test").unwrap();
        let summary = verify(&metablock, tmp.path(), &["root".to_string()], 0).unwrap();
        assert_eq!(summary.signed.name, "summary");
        assert!(summary.signed.materials.is_empty());
        assert!(summary.signatures.is_empty());
    }
}
