// Copyright 2020 Andreas Kurth
//
// SPDX-License-Identifier: (Apache-2.0 OR MIT)

//! Inspection Runner (C5)
//!
//! Executes each inspection's command in the verifier's working directory, hashing the
//! directory before and after to synthesize a [`Link`].

use crate::crypto::{hash_reader, HashSet as HashDigestSet};
use crate::error::{Error, Result};
use crate::layout::Inspection;
use crate::link::Link;
use log::{debug, trace};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::process::Command;
use walkdir::{DirEntry, WalkDir};

fn is_dotfile(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|s| s.starts_with('.'))
            .unwrap_or(false)
}

/// Recursively hashes every regular file under `dir`, keyed by its path relative to `dir` with
/// forward slashes. Dotfiles (and the contents of dot-directories) are skipped.
///
/// `ARTIFACT_BASE_PATH` is read only to log that it exists; it does not redirect the inspection
/// runner's working directory, which is always the verifier's own CWD.
pub fn snapshot_directory(dir: &Path) -> Result<BTreeMap<String, HashDigestSet>> {
    if std::env::var_os("ARTIFACT_BASE_PATH").is_some() {
        trace!("ARTIFACT_BASE_PATH is set but ignored by the inspection runner");
    }
    let mut artifacts = BTreeMap::new();
    for entry in WalkDir::new(dir)
        .into_iter()
        .filter_entry(|e| !is_dotfile(e))
    {
        let entry = entry
            .map_err(|cause| Error::chain("could not walk verifier working directory", cause))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(dir).unwrap_or_else(|_| entry.path());
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        let mut file = File::open(entry.path())
            .map_err(|cause| Error::chain(format!("could not open {:?}", entry.path()), cause))?;
        let hashes = hash_reader(&mut file)?;
        artifacts.insert(rel_str, hashes);
    }
    Ok(artifacts)
}

/// Runs `inspection.run` as a subprocess in `cwd`, synthesizing a [`Link`] from a before/after
/// directory snapshot. Fails with `BadReturnValueError` on non-zero exit.
pub fn run_inspection(inspection: &Inspection, cwd: &Path) -> Result<Link> {
    let before = snapshot_directory(cwd)?;
    let (cmd, args) = inspection
        .run
        .split_first()
        .ok_or_else(|| Error::format(format!("inspection \"{}\" has an empty run command", inspection.name)))?;
    debug!("running inspection \"{}\": {:?}", inspection.name, inspection.run);
    let output = Command::new(cmd)
        .args(args)
        .current_dir(cwd)
        .output()
        .map_err(|cause| {
            Error::chain(
                format!("could not execute inspection \"{}\"", inspection.name),
                cause,
            )
        })?;
    match output.status.code() {
        Some(0) => {}
        other => {
            return Err(Error::bad_return_value(format!(
                "inspection \"{}\" exited with status {:?}",
                inspection.name, other
            )))
        }
    }
    let after = snapshot_directory(cwd)?;
    let mut byproducts = BTreeMap::new();
    byproducts.insert("return-value".to_string(), serde_json::json!(0));
    byproducts.insert(
        "stdout".to_string(),
        serde_json::json!(String::from_utf8_lossy(&output.stdout)),
    );
    byproducts.insert(
        "stderr".to_string(),
        serde_json::json!(String::from_utf8_lossy(&output.stderr)),
    );
    Ok(Link {
        name: inspection.name.clone(),
        materials: before,
        products: after,
        command: inspection.run.clone(),
        byproducts,
        environment: BTreeMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn inspection(run: Vec<&str>) -> Inspection {
        Inspection {
            name: "untar".to_string(),
            run: run.into_iter().map(|s| s.to_string()).collect(),
            expected_materials: vec![],
            expected_products: vec![],
        }
    }

    #[test]
    fn nonzero_exit_is_bad_return_value() {
        let tmp = TempDir::new("inspection-test").unwrap();
        let insp = inspection(vec!["sh", "-c", "exit 1"]);
        let err = run_inspection(&insp, tmp.path()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BadReturnValue);
    }

    #[test]
    fn zero_exit_synthesizes_link_with_new_product() {
        let tmp = TempDir::new("inspection-test").unwrap();
        let insp = inspection(vec!["sh", "-c", "echo hi > produced.txt"]);
        let link = run_inspection(&insp, tmp.path()).unwrap();
        assert!(!link.materials.contains_key("produced.txt"));
        assert!(link.products.contains_key("produced.txt"));
        assert_eq!(link.return_value(), Some(0));
    }

    #[test]
    fn dotfiles_are_skipped() {
        let tmp = TempDir::new("inspection-test").unwrap();
        std::fs::write(tmp.path().join(".hidden"), b"secret").unwrap();
        let snapshot = snapshot_directory(tmp.path()).unwrap();
        assert!(snapshot.is_empty());
    }
}
