// Copyright 2020 Andreas Kurth
//
// SPDX-License-Identifier: (Apache-2.0 OR MIT)

//! Link Loader (C8)
//!
//! Discovers per-step link files on disk, keyed by step name and keyid, tolerating missing
//! links only when the step's threshold is still attainable. See spec §4.7, §6.
//!
//! Parsing the bytes of a discovered file into a [`Layout`]/[`Link`] struct is a generic
//! `serde_json` concern; the logic that decides *which* file on disk is *whose* link for *which*
//! step is what's implemented here: match directory entries against a naming-convention regex,
//! then record the parsed document's discriminated type without dispatching on it yet.
//!
//! A step's "link" file may actually hold a sublayout (spec §4.6); expanding it is the sublayout
//! expander's (C6) job, not this module's, and — per spec §2's dataflow "C4 → (C6 recursively)" —
//! it runs only *after* the signature & threshold resolver (C4) has filtered and counted this
//! step's raw link set. So `load_step_links` returns [`LinkOrLayout`] entries untouched; see
//! `threshold::verify_link_signature_thresholds` and `sublayout::expand_all`.

use crate::error::{Error, ErrorKind, Result};
use crate::layout::{Layout, LinkOrLayout, RawChainLinkDictionary, Step};
use crate::link::Metablock;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Reads and parses a signed Metablock document from `path`.
pub fn load_metablock<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Metablock<T>> {
    let file = File::open(path)
        .map_err(|cause| Error::chain(format!("could not open {:?}", path), cause))?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|cause| {
        Error::chain_kind(ErrorKind::Format, format!("malformed document {:?}", path), cause)
    })
}

/// Loads a layout document (not wrapped in `LinkOrLayout`, since at the entry point we already
/// know it must be a layout).
pub fn load_layout(path: &Path) -> Result<Metablock<Layout>> {
    load_metablock(path)
}

/// The first 8 hex characters of a keyid, as used in link file names (spec §6).
pub fn short_keyid(keyid: &str) -> String {
    keyid.chars().take(8).collect()
}

fn link_file_regex(step_name: &str) -> Regex {
    Regex::new(&format!(
        "^{}\\.([0-9a-fA-F]{{8}})\\.link$",
        regex::escape(step_name)
    ))
    .expect("step link filename pattern is always a valid regex")
}

/// Discovers every link (or sublayout) file for `step` under `link_dir`, keyed by the signing
/// keyid recorded on its (sole) signature. Raises `LinkNotFoundError` only when fewer files exist
/// than the step's threshold requires; signature/threshold validity itself is judged later by the
/// threshold resolver (C4), and sublayout expansion (C6) later still.
pub fn load_step_links(
    link_dir: &Path,
    step: &Step,
) -> Result<BTreeMap<String, Metablock<LinkOrLayout>>> {
    let pattern = link_file_regex(&step.name);
    let mut discovered = BTreeMap::new();
    let entries = match std::fs::read_dir(link_dir) {
        Ok(entries) => entries,
        Err(cause) => {
            return Error::result_kind(
                ErrorKind::LinkNotFound,
                format!("could not read link directory {:?}: {}", link_dir, cause),
            )
        }
    };
    for entry in entries {
        let entry = entry.map_err(|cause| Error::chain(format!("could not read {:?}", link_dir), cause))?;
        let file_name = entry.file_name();
        let file_name = match file_name.to_str() {
            Some(s) => s,
            None => continue,
        };
        if !pattern.is_match(file_name) {
            continue;
        }
        let path = entry.path();
        let metablock: Metablock<LinkOrLayout> = load_metablock(&path)?;
        let keyid = metablock
            .signatures
            .get(0)
            .map(|s| s.keyid.clone())
            .unwrap_or_else(|| file_name.to_string());
        discovered.insert(keyid, metablock);
    }
    if (discovered.len() as u32) < step.threshold {
        return Error::result_kind(
            ErrorKind::LinkNotFound,
            format!(
                "step \"{}\" requires {} link(s) but only {} were found under {:?}",
                step.name,
                step.threshold,
                discovered.len(),
                link_dir
            ),
        );
    }
    Ok(discovered)
}

/// Builds the sublayout-scoped link directory `<step_name>.<keyid>/` named by spec §4.6/§6.
pub fn sublayout_dir(link_dir: &Path, step_name: &str, keyid: &str) -> PathBuf {
    link_dir.join(format!("{}.{}", step_name, short_keyid(keyid)))
}

/// Loads raw (pre-threshold, pre-sublayout-expansion) link files for every step of `layout`.
pub fn load_links(layout: &Layout, link_dir: &Path) -> Result<RawChainLinkDictionary> {
    let mut dict = RawChainLinkDictionary::new();
    for step in &layout.steps {
        dict.insert(step.name.clone(), load_step_links(link_dir, step)?);
    }
    Ok(dict)
}
