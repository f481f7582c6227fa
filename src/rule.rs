// Copyright 2020 Andreas Kurth
//
// SPDX-License-Identifier: (Apache-2.0 OR MIT)

//! Artifact Rules — C1 Rule Evaluator
//!
//! Spec §9 asks for rules to be parsed once into a tagged variant per rule kind, rejecting
//! malformed rules at load time rather than at evaluation time. [`Rule`] is that variant;
//! `TryFrom<&[String]>` does the one-time parse, and [`Rule::evaluate`] carries the per-rule
//! contract of spec §4.1.

use crate::crypto::{hashes_match, HashSet as HashDigestSet};
use crate::error::{Error, Result};
use crate::glob;
use crate::link::ChainLinkDictionary;
use serde::de::{Error as DeError, Unexpected};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::convert::TryFrom;

/// Which artifact map a rule (or an entire rule list) is sourced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Materials,
    Products,
}

/// One clause of a step's or inspection's materials/products rule list. See spec §4.1, §6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Create(String),
    Delete(String),
    Modify(String),
    Allow(String),
    Disallow(String),
    Require(String),
    Match {
        pattern: String,
        src_prefix: String,
        dst_type: SourceType,
        dst_prefix: String,
        step_name: String,
    },
}

impl TryFrom<&[String]> for Rule {
    type Error = Error;

    fn try_from(tokens: &[String]) -> Result<Rule> {
        let kind = tokens
            .get(0)
            .ok_or_else(|| Error::format("empty rule"))?
            .to_uppercase();
        let pattern_rule = |ctor: fn(String) -> Rule| -> Result<Rule> {
            match tokens.get(1) {
                Some(p) if tokens.len() == 2 => Ok(ctor(p.clone())),
                _ => Error::result(format!("{} rule must have exactly one pattern argument", kind)),
            }
        };
        match kind.as_str() {
            "CREATE" => pattern_rule(Rule::Create),
            "DELETE" => pattern_rule(Rule::Delete),
            "MODIFY" => pattern_rule(Rule::Modify),
            "ALLOW" => pattern_rule(Rule::Allow),
            "DISALLOW" => pattern_rule(Rule::Disallow),
            "REQUIRE" => pattern_rule(Rule::Require),
            "MATCH" => parse_match(tokens),
            other => Error::result(format!("unknown rule kind \"{}\"", other)),
        }
    }
}

/// Parses `MATCH <pattern> [IN <src_prefix>] WITH (MATERIALS|PRODUCTS) [IN <dst_prefix>] FROM
/// <step_name>`.
fn parse_match(tokens: &[String]) -> Result<Rule> {
    if tokens.len() < 5 {
        return Error::result("MATCH rule is missing required arguments");
    }
    let pattern = tokens[1].clone();
    let mut idx = 2;
    let mut src_prefix = String::new();
    if tokens.get(idx).map(|s| s.to_uppercase()) == Some("IN".to_string()) {
        src_prefix = tokens
            .get(idx + 1)
            .ok_or_else(|| Error::format("MATCH ... IN is missing a prefix argument"))?
            .clone();
        idx += 2;
    }
    if tokens.get(idx).map(|s| s.to_uppercase()) != Some("WITH".to_string()) {
        return Error::result("MATCH rule is missing required WITH keyword");
    }
    idx += 1;
    let dst_type = match tokens.get(idx).map(|s| s.to_uppercase()).as_deref() {
        Some("MATERIALS") => SourceType::Materials,
        Some("PRODUCTS") => SourceType::Products,
        _ => return Error::result("MATCH ... WITH must be followed by MATERIALS or PRODUCTS"),
    };
    idx += 1;
    let mut dst_prefix = String::new();
    if tokens.get(idx).map(|s| s.to_uppercase()) == Some("IN".to_string()) {
        dst_prefix = tokens
            .get(idx + 1)
            .ok_or_else(|| Error::format("MATCH ... WITH ... IN is missing a prefix argument"))?
            .clone();
        idx += 2;
    }
    if tokens.get(idx).map(|s| s.to_uppercase()) != Some("FROM".to_string()) {
        return Error::result("MATCH rule is missing required FROM keyword");
    }
    idx += 1;
    let step_name = tokens
        .get(idx)
        .ok_or_else(|| Error::format("MATCH ... FROM is missing a step name argument"))?
        .clone();
    if tokens.len() != idx + 1 {
        return Error::result("MATCH rule has trailing tokens");
    }
    Ok(Rule::Match {
        pattern,
        src_prefix: glob::normalize_prefix(&src_prefix),
        dst_type,
        dst_prefix: glob::normalize_prefix(&dst_prefix),
        step_name,
    })
}

impl Rule {
    /// Re-serializes this rule into its token-vector grammar form (spec §6).
    pub fn to_tokens(&self) -> Vec<String> {
        match self {
            Rule::Create(p) => vec!["CREATE".to_string(), p.clone()],
            Rule::Delete(p) => vec!["DELETE".to_string(), p.clone()],
            Rule::Modify(p) => vec!["MODIFY".to_string(), p.clone()],
            Rule::Allow(p) => vec!["ALLOW".to_string(), p.clone()],
            Rule::Disallow(p) => vec!["DISALLOW".to_string(), p.clone()],
            Rule::Require(p) => vec!["REQUIRE".to_string(), p.clone()],
            Rule::Match {
                pattern,
                src_prefix,
                dst_type,
                dst_prefix,
                step_name,
            } => {
                let mut v = vec!["MATCH".to_string(), pattern.clone()];
                if !src_prefix.is_empty() {
                    v.push("IN".to_string());
                    v.push(src_prefix.clone());
                }
                v.push("WITH".to_string());
                v.push(
                    match dst_type {
                        SourceType::Materials => "MATERIALS",
                        SourceType::Products => "PRODUCTS",
                    }
                    .to_string(),
                );
                if !dst_prefix.is_empty() {
                    v.push("IN".to_string());
                    v.push(dst_prefix.clone());
                }
                v.push("FROM".to_string());
                v.push(step_name.clone());
                v
            }
        }
    }

    /// Applies this rule's contract (spec §4.1) to `queue`, returning the residual queue or a
    /// `RuleVerificationError`. `source_type` identifies which artifact map `queue` was seeded
    /// from; it is only consulted by MATCH, to look up a source path's recorded hash.
    pub fn evaluate(
        &self,
        queue: Vec<String>,
        source_type: SourceType,
        materials: &BTreeMap<String, HashDigestSet>,
        products: &BTreeMap<String, HashDigestSet>,
        dict: &ChainLinkDictionary,
    ) -> Result<Vec<String>> {
        match self {
            Rule::Create(pattern) => Ok(queue
                .into_iter()
                .filter(|p| !glob::matches(pattern, p) || materials.contains_key(p.as_str()))
                .collect()),
            Rule::Delete(pattern) => Ok(queue
                .into_iter()
                .filter(|p| !glob::matches(pattern, p) || products.contains_key(p.as_str()))
                .collect()),
            Rule::Modify(pattern) => Ok(queue
                .into_iter()
                .filter(|p| {
                    if !glob::matches(pattern, p) {
                        return true;
                    }
                    match (materials.get(p.as_str()), products.get(p.as_str())) {
                        (Some(m), Some(pr)) => hashes_match(m, pr),
                        _ => true,
                    }
                })
                .collect()),
            Rule::Allow(pattern) => Ok(queue
                .into_iter()
                .filter(|p| !glob::matches(pattern, p))
                .collect()),
            Rule::Disallow(pattern) => {
                if let Some(p) = queue.iter().find(|p| glob::matches(pattern, p)) {
                    return Err(Error::rule_verification(format!(
                        "DISALLOW {} matched residual artifact \"{}\"",
                        pattern, p
                    )));
                }
                Ok(queue)
            }
            Rule::Require(pattern) => {
                if !queue.iter().any(|p| glob::matches(pattern, p)) {
                    return Err(Error::rule_verification(format!(
                        "REQUIRE {} matched no artifact",
                        pattern
                    )));
                }
                Ok(queue)
            }
            Rule::Match {
                pattern,
                src_prefix,
                dst_type,
                dst_prefix,
                step_name,
            } => {
                let dst_link = match dict.get(step_name).and_then(|links| links.values().next()) {
                    // Spec §4.1: an unresolvable destination step is not a hard error.
                    None => return Ok(queue),
                    Some(link) => link,
                };
                let dst_map = match dst_type {
                    SourceType::Materials => &dst_link.signed.materials,
                    SourceType::Products => &dst_link.signed.products,
                };
                let source_map = match source_type {
                    SourceType::Materials => materials,
                    SourceType::Products => products,
                };
                let src_pattern = glob::prefixed_pattern(src_prefix, pattern);
                let mut residual = Vec::with_capacity(queue.len());
                'paths: for path in queue {
                    if glob::matches(&src_pattern, &path) {
                        if let Some(suffix) = glob::strip_prefix(src_prefix, &path) {
                            if let Some(src_hash) = source_map.get(&path) {
                                for (dst_path, dst_hash) in dst_map {
                                    if glob::strip_prefix(dst_prefix, dst_path).as_deref()
                                        == Some(suffix)
                                        && hashes_match(src_hash, dst_hash)
                                    {
                                        continue 'paths; // consumed
                                    }
                                }
                            }
                        }
                    }
                    residual.push(path);
                }
                Ok(residual)
            }
        }
    }
}

impl Serialize for Rule {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_tokens().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Rule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Rule, D::Error> {
        let tokens = Vec::<String>::deserialize(deserializer)?;
        Rule::try_from(tokens.as_slice())
            .map_err(|e| D::Error::invalid_value(Unexpected::Seq, &e.message()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    fn rule(tokens: &[&str]) -> Rule {
        let tokens: Vec<String> = tokens.iter().map(|s| s.to_string()).collect();
        Rule::try_from(tokens.as_slice()).unwrap()
    }

    fn hashes(seed: u8) -> HashDigestSet {
        crate::crypto::hash_bytes(&[seed])
    }

    #[test]
    fn create_fails_to_remove_path_also_present_in_materials() {
        let r = rule(&["CREATE", "foo"]);
        let materials = btreemap! { "foo".to_string() => hashes(1) };
        let products = BTreeMap::new();
        let queue = vec!["foo".to_string()];
        let residual = r
            .evaluate(queue, SourceType::Products, &materials, &products, &ChainLinkDictionary::new())
            .unwrap();
        assert_eq!(residual, vec!["foo".to_string()]);
    }

    #[test]
    fn create_removes_new_path() {
        let r = rule(&["CREATE", "*"]);
        let materials = BTreeMap::new();
        let products = btreemap! { "foo".to_string() => hashes(1) };
        let queue = vec!["foo".to_string()];
        let residual = r
            .evaluate(queue, SourceType::Products, &materials, &products, &ChainLinkDictionary::new())
            .unwrap();
        assert!(residual.is_empty());
    }

    #[test]
    fn delete_removes_only_truly_deleted_paths() {
        let r = rule(&["DELETE", "foo"]);
        let materials = btreemap! { "foo".to_string() => hashes(1) };
        let products = BTreeMap::new();
        let residual = r
            .evaluate(
                vec!["foo".to_string()],
                SourceType::Materials,
                &materials,
                &products,
                &ChainLinkDictionary::new(),
            )
            .unwrap();
        assert!(residual.is_empty());
    }

    #[test]
    fn modify_passes_when_hashes_differ() {
        let r = rule(&["MODIFY", "x"]);
        let materials = btreemap! { "x".to_string() => hashes(1) };
        let products = btreemap! { "x".to_string() => hashes(2) };
        let residual = r
            .evaluate(
                vec!["x".to_string()],
                SourceType::Materials,
                &materials,
                &products,
                &ChainLinkDictionary::new(),
            )
            .unwrap();
        assert!(residual.is_empty());
    }

    #[test]
    fn modify_leaves_equal_hash_path_for_later_disallow() {
        let r = rule(&["MODIFY", "x"]);
        let materials = btreemap! { "x".to_string() => hashes(1) };
        let products = btreemap! { "x".to_string() => hashes(1) };
        let residual = r
            .evaluate(
                vec!["x".to_string()],
                SourceType::Materials,
                &materials,
                &products,
                &ChainLinkDictionary::new(),
            )
            .unwrap();
        assert_eq!(residual, vec!["x".to_string()]);
    }

    #[test]
    fn disallow_fails_on_residual_match() {
        let r = rule(&["DISALLOW", "*"]);
        let err = r
            .evaluate(
                vec!["foo".to_string()],
                SourceType::Materials,
                &BTreeMap::new(),
                &BTreeMap::new(),
                &ChainLinkDictionary::new(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::RuleVerification);
    }

    #[test]
    fn disallow_is_noop_without_match() {
        let r = rule(&["DISALLOW", "bar"]);
        let residual = r
            .evaluate(
                vec!["foo".to_string()],
                SourceType::Materials,
                &BTreeMap::new(),
                &BTreeMap::new(),
                &ChainLinkDictionary::new(),
            )
            .unwrap();
        assert_eq!(residual, vec!["foo".to_string()]);
    }

    #[test]
    fn require_fails_without_match() {
        let r = rule(&["REQUIRE", "foo"]);
        let err = r
            .evaluate(
                vec!["bar".to_string()],
                SourceType::Materials,
                &BTreeMap::new(),
                &BTreeMap::new(),
                &ChainLinkDictionary::new(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::RuleVerification);
    }

    #[test]
    fn match_with_missing_step_is_noop() {
        let r = rule(&["MATCH", "foo", "WITH", "PRODUCTS", "FROM", "nonexistent"]);
        let residual = r
            .evaluate(
                vec!["foo".to_string()],
                SourceType::Materials,
                &BTreeMap::new(),
                &BTreeMap::new(),
                &ChainLinkDictionary::new(),
            )
            .unwrap();
        assert_eq!(residual, vec!["foo".to_string()]);
    }

    #[test]
    fn parsing_unknown_rule_kind_fails_at_load_time() {
        let tokens: Vec<String> = vec!["BOGUS".to_string(), "foo".to_string()];
        assert!(Rule::try_from(tokens.as_slice()).is_err());
    }

    #[test]
    fn parsing_match_with_prefixes_roundtrips() {
        let r = rule(&[
            "MATCH", "foo", "IN", "src/", "WITH", "MATERIALS", "IN", "dst/", "FROM", "other-step",
        ]);
        match &r {
            Rule::Match {
                src_prefix,
                dst_prefix,
                ..
            } => {
                assert_eq!(src_prefix, "src");
                assert_eq!(dst_prefix, "dst");
            }
            _ => panic!("expected Match rule"),
        }
        assert_eq!(
            r.to_tokens(),
            vec!["MATCH", "foo", "IN", "src", "WITH", "MATERIALS", "IN", "dst", "FROM", "other-step"]
        );
    }
}
