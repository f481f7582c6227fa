// Copyright 2020 Andreas Kurth
//
// SPDX-License-Identifier: (Apache-2.0 OR MIT)

//! Path-glob matching for artifact rules.
//!
//! Compiles a pattern by escaping its literal parts, substituting wildcard tokens with regex
//! groups, and anchoring the result: `*` matches any run of characters except `/`, `?` matches
//! exactly one non-`/` character.

use regex::Regex;

/// Compiles a glob pattern into an anchored `Regex` matching whole path strings.
fn compile(pattern: &str) -> Regex {
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            _ => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    // The pattern grammar is fixed and validated at rule-parse time, so compilation cannot fail.
    Regex::new(&re).expect("glob pattern compiles to a valid regex")
}

/// Returns true iff `path` matches `pattern` under the rule-pattern glob grammar.
pub fn matches(pattern: &str, path: &str) -> bool {
    compile(pattern).is_match(path)
}

/// Strips a trailing slash from a prefix, so `"dir/"` and `"dir"` are treated identically.
pub fn normalize_prefix(prefix: &str) -> String {
    prefix.trim_end_matches('/').to_string()
}

/// Joins a (possibly empty) normalized prefix with a pattern the way `MATCH P IN prefix` does:
/// an empty prefix yields the bare pattern.
pub fn prefixed_pattern(prefix: &str, pattern: &str) -> String {
    let prefix = normalize_prefix(prefix);
    if prefix.is_empty() {
        pattern.to_string()
    } else {
        format!("{}/{}", prefix, pattern)
    }
}

/// Strips `prefix/` from `path`, returning `None` if `path` is not under `prefix`.
pub fn strip_prefix<'a>(prefix: &str, path: &'a str) -> Option<&'a str> {
    let prefix = normalize_prefix(prefix);
    if prefix.is_empty() {
        Some(path)
    } else {
        path.strip_prefix(&prefix)
            .and_then(|rest| rest.strip_prefix('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_does_not_cross_slash() {
        assert!(matches("foo/*", "foo/bar"));
        assert!(!matches("foo/*", "foo/bar/baz"));
    }

    #[test]
    fn star_matches_whole_path_without_slash() {
        assert!(matches("*", "foo"));
        assert!(!matches("*", "foo/bar"));
    }

    #[test]
    fn question_mark_matches_single_char() {
        assert!(matches("fo?", "foo"));
        assert!(!matches("fo?", "fooo"));
    }

    #[test]
    fn trailing_slash_normalization() {
        assert_eq!(normalize_prefix("dir/"), normalize_prefix("dir"));
        assert_eq!(strip_prefix("dir/", "dir/foo"), Some("foo"));
        assert_eq!(strip_prefix("dir", "dir/foo"), Some("foo"));
    }

    #[test]
    fn empty_prefix_is_identity() {
        assert_eq!(strip_prefix("", "foo/bar"), Some("foo/bar"));
        assert_eq!(prefixed_pattern("", "foo"), "foo");
    }
}
