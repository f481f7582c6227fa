// Copyright 2020 Andreas Kurth
//
// SPDX-License-Identifier: (Apache-2.0 OR MIT)

//! Item Rule Driver (C2) and Command Aligner (C3)

use crate::error::Result;
use crate::layout::{Inspection, Step};
use crate::link::{ChainLinkDictionary, Link};
use crate::rule::{Rule, SourceType};
use log::{trace, warn};

/// A policy item whose materials/products are constrained by ordered rule lists: either a
/// [`Step`] or an [`Inspection`].
pub trait Item {
    fn name(&self) -> &str;
    fn expected_command(&self) -> &[String];
    fn expected_materials(&self) -> &[Rule];
    fn expected_products(&self) -> &[Rule];
}

impl Item for Step {
    fn name(&self) -> &str {
        &self.name
    }
    fn expected_command(&self) -> &[String] {
        &self.expected_command
    }
    fn expected_materials(&self) -> &[Rule] {
        &self.expected_materials
    }
    fn expected_products(&self) -> &[Rule] {
        &self.expected_products
    }
}

impl Item for Inspection {
    fn name(&self) -> &str {
        &self.name
    }
    fn expected_command(&self) -> &[String] {
        &[]
    }
    fn expected_materials(&self) -> &[Rule] {
        &self.expected_materials
    }
    fn expected_products(&self) -> &[Rule] {
        &self.expected_products
    }
}

/// Runs `item`'s rule list for `source_type` against `link`'s corresponding artifact map, in
/// list order. The residual queue after the last rule is discarded silently: absence of a
/// trailing catch-all `DISALLOW *`/`ALLOW *` is permissive by design.
pub fn drive_rules(
    item: &dyn Item,
    link: &Link,
    source_type: SourceType,
    dict: &ChainLinkDictionary,
) -> Result<()> {
    let rules = match source_type {
        SourceType::Materials => item.expected_materials(),
        SourceType::Products => item.expected_products(),
    };
    let mut queue: Vec<String> = match source_type {
        SourceType::Materials => link.materials.keys().cloned().collect(),
        SourceType::Products => link.products.keys().cloned().collect(),
    };
    trace!(
        "driving {:?} rules for \"{}\": initial queue {:?}",
        source_type,
        item.name(),
        queue
    );
    for rule in rules {
        queue = rule.evaluate(queue, source_type, &link.materials, &link.products, dict)?;
        trace!("queue after {:?}: {:?}", rule.to_tokens(), queue);
    }
    Ok(())
}

/// Runs both the materials and products rule lists of `item` against `link`.
pub fn drive_item(item: &dyn Item, link: &Link, dict: &ChainLinkDictionary) -> Result<()> {
    drive_rules(item, link, SourceType::Materials, dict)?;
    drive_rules(item, link, SourceType::Products, dict)?;
    Ok(())
}

/// Compares a recorded command vector against the expected one. Mismatch is policy information,
/// not a security failure at this layer: it is logged as a warning and never fails.
pub fn check_command_alignment(item: &dyn Item, link: &Link) {
    let expected = item.expected_command();
    if expected.is_empty() {
        return;
    }
    if expected != link.command.as_slice() {
        warn!(
            "command mismatch for step \"{}\": expected {:?}, got {:?}",
            item.name(),
            expected,
            link.command
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn step(name: &str, materials: Vec<Rule>, products: Vec<Rule>) -> Step {
        Step {
            name: name.to_string(),
            expected_command: vec![],
            expected_materials: materials,
            expected_products: products,
            pubkeys: vec![],
            threshold: 1,
        }
    }

    fn link_with(materials: Vec<&str>, products: Vec<&str>) -> Link {
        Link {
            name: "x".to_string(),
            materials: materials
                .into_iter()
                .map(|p| (p.to_string(), crate::crypto::hash_bytes(p.as_bytes())))
                .collect(),
            products: products
                .into_iter()
                .map(|p| (p.to_string(), crate::crypto::hash_bytes(p.as_bytes())))
                .collect(),
            command: vec![],
            byproducts: BTreeMap::new(),
            environment: BTreeMap::new(),
        }
    }

    #[test]
    fn trailing_disallow_catches_residual() {
        use std::convert::TryFrom;
        let disallow = Rule::try_from(["DISALLOW".to_string(), "*".to_string()].as_slice()).unwrap();
        let s = step("write-code", vec![], vec![disallow]);
        let link = link_with(vec![], vec!["untracked"]);
        let dict = ChainLinkDictionary::new();
        assert!(drive_item(&s, &link, &dict).is_err());
    }

    #[test]
    fn absent_trailing_disallow_is_permissive() {
        let s = step("write-code", vec![], vec![]);
        let link = link_with(vec![], vec!["untracked"]);
        let dict = ChainLinkDictionary::new();
        assert!(drive_item(&s, &link, &dict).is_ok());
    }

    #[test]
    fn command_mismatch_never_fails() {
        let mut s = step("build", vec![], vec![]);
        s.expected_command = vec!["make".to_string()];
        let mut link = link_with(vec![], vec![]);
        link.command = vec!["make".to_string(), "-j8".to_string()];
        check_command_alignment(&s, &link); // must not panic
    }
}
