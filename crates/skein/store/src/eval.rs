//! In-process evaluation of query trees against documents
//!
//! Group semantics:
//! - every `Must` clause matches
//! - no `MustNot` clause matches
//! - when the group has no `Must` clause, at least one `Should` clause matches
//!
//! A group holding only `MustNot` clauses matches every document none of
//! them match. The root clause's own occurrence applies too: a `MustNot`
//! root negates the result.

use crate::Document;
use skein_types::{MatchType, Occurrence, QueryTree};

/// Whether `doc` satisfies `tree`
pub fn matches(tree: &QueryTree, doc: &Document) -> bool {
    let hit = clause_matches(tree, doc);
    match tree.occurrence() {
        Occurrence::MustNot => !hit,
        _ => hit,
    }
}

/// Match a clause's content, ignoring its own occurrence
fn clause_matches(tree: &QueryTree, doc: &Document) -> bool {
    match tree {
        QueryTree::Term {
            field,
            value,
            match_type,
            case_insensitive,
            ..
        } => doc.field_values(field).iter().any(|candidate| {
            let candidate = if *case_insensitive {
                candidate.to_lowercase()
            } else {
                candidate.clone()
            };
            value_matches(*match_type, &candidate, value)
        }),
        QueryTree::AnyOf { field, values, .. } => {
            !values.is_empty() && doc.field_values(field).iter().any(|v| values.contains(v))
        }
        QueryTree::Group { clauses, .. } => group_matches(clauses, doc),
    }
}

fn group_matches(clauses: &[QueryTree], doc: &Document) -> bool {
    let mut has_must = false;
    let mut has_should = false;
    let mut any_should = false;

    for clause in clauses {
        match clause.occurrence() {
            Occurrence::Must => {
                has_must = true;
                if !clause_matches(clause, doc) {
                    return false;
                }
            }
            Occurrence::MustNot => {
                if clause_matches(clause, doc) {
                    return false;
                }
            }
            Occurrence::Should => {
                has_should = true;
                if !any_should && clause_matches(clause, doc) {
                    any_should = true;
                }
            }
        }
    }

    has_must || !has_should || any_should
}

fn value_matches(match_type: MatchType, candidate: &str, pattern: &str) -> bool {
    match match_type {
        MatchType::Term => candidate == pattern,
        MatchType::Prefix => candidate.starts_with(pattern),
        MatchType::Wildcard => glob_matches(pattern.as_bytes(), candidate.as_bytes()),
    }
}

/// `*` matches any run of characters, `?` exactly one
fn glob_matches(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use skein_types::Link;

    fn account(name: &str, endpoint: &str, tags: &[&str]) -> Document {
        Document::from_value(
            Link::new(format!("/accounts/{}", name)),
            "account",
            json!({ "name": name, "endpointType": endpoint, "tagLinks": tags }),
        )
    }

    fn insensitive(field: &str, value: &str, match_type: MatchType) -> QueryTree {
        QueryTree::Term {
            field: field.into(),
            value: value.into(),
            match_type,
            occurrence: Occurrence::Must,
            case_insensitive: true,
        }
    }

    #[test]
    fn test_term_and_prefix() {
        let doc = account("Prod", "aws", &[]);
        assert!(matches(&QueryTree::term("endpointType", "aws"), &doc));
        assert!(!matches(&QueryTree::term("endpointType", "azure"), &doc));
        assert!(matches(&QueryTree::prefix("documentSelfLink", "/accounts/"), &doc));
        assert!(!matches(&QueryTree::term("name", "prod"), &doc));
        assert!(matches(&insensitive("name", "prod", MatchType::Term), &doc));
    }

    #[test]
    fn test_wildcard() {
        let doc = account("prod-east-1", "aws", &[]);
        assert!(matches(&insensitive("name", "prod*", MatchType::Wildcard), &doc));
        assert!(matches(&insensitive("name", "*east*", MatchType::Wildcard), &doc));
        assert!(matches(&insensitive("name", "prod-east-?", MatchType::Wildcard), &doc));
        assert!(!matches(&insensitive("name", "prod-west*", MatchType::Wildcard), &doc));
        assert!(!matches(&insensitive("name", "prod-east-??", MatchType::Wildcard), &doc));
    }

    #[test]
    fn test_any_of_over_array_field() {
        let doc = account("a", "aws", &["/tags/1", "/tags/2"]);
        assert!(matches(&QueryTree::any_of("tagLinks", ["/tags/2", "/tags/9"]), &doc));
        assert!(!matches(&QueryTree::any_of("tagLinks", ["/tags/9"]), &doc));
        assert!(!matches(&QueryTree::any_of("tagLinks", Vec::<String>::new()), &doc));
    }

    #[test]
    fn test_group_occurrences() {
        let aws = account("a", "aws", &[]);
        let azure = account("b", "azure", &[]);
        let gcp = account("c", "gcp", &[]);

        let either = QueryTree::group(vec![
            QueryTree::term("endpointType", "aws").with_occurrence(Occurrence::Should),
            QueryTree::term("endpointType", "azure").with_occurrence(Occurrence::Should),
        ]);
        assert!(matches(&either, &aws));
        assert!(matches(&either, &azure));
        assert!(!matches(&either, &gcp));

        let not_aws = QueryTree::group(vec![
            QueryTree::kind("account"),
            QueryTree::term("endpointType", "aws").with_occurrence(Occurrence::MustNot),
        ]);
        assert!(!matches(&not_aws, &aws));
        assert!(matches(&not_aws, &gcp));

        // SHOULD clauses are optional next to a MUST clause
        let optional = QueryTree::group(vec![
            QueryTree::kind("account"),
            QueryTree::term("endpointType", "aws").with_occurrence(Occurrence::Should),
        ]);
        assert!(matches(&optional, &gcp));
    }

    #[test]
    fn test_negated_root() {
        let doc = account("a", "aws", &[]);
        let tree = QueryTree::term("endpointType", "aws").with_occurrence(Occurrence::MustNot);
        assert!(!matches(&tree, &doc));
    }

    #[test]
    fn test_glob_edge_cases() {
        assert!(glob_matches(b"*", b""));
        assert!(glob_matches(b"", b""));
        assert!(!glob_matches(b"", b"a"));
        assert!(glob_matches(b"a*b*c", b"aXXbYYc"));
        assert!(!glob_matches(b"a*b*c", b"aXXbYY"));
    }
}
