//! Subtract a critical CSS fragment from a full stylesheet
//!
//! Matching works at rule granularity. A full rule is removed when it is
//! exactly equal to a critical rule. When only the declarations are equal,
//! the critical selectors are stripped from the full rule's selector list
//! and the rest of the rule stays in place. Rules inside `@media` are only
//! matched against media blocks whose query string is byte-for-byte the
//! same. Other at-rules and comments are carried over untouched, except
//! that a comment also present in the critical CSS is dropped.

use crate::ast::{MediaBlock, Node, Rule, Stylesheet};

/// Remove everything in `critical` from `full` and serialize the remainder,
/// with a trailing newline.
pub fn diff(full: &str, critical: &str) -> String {
    let remainder = diff_stylesheets(Stylesheet::parse(full), &Stylesheet::parse(critical));
    format!("{remainder}\n")
}

/// AST-level version of [`diff`].
pub fn diff_stylesheets(mut full: Stylesheet, critical: &Stylesheet) -> Stylesheet {
    let mut removed = 0usize;

    for node in &critical.nodes {
        match node {
            Node::Rule(critical_rule) => {
                full.nodes = full
                    .nodes
                    .into_iter()
                    .filter_map(|node| match node {
                        Node::Rule(rule) => {
                            let kept = subtract_rule(rule, critical_rule);
                            removed += usize::from(kept.is_none());
                            kept.map(Node::Rule)
                        }
                        other => Some(other),
                    })
                    .collect();
            }
            Node::Media(critical_media) => {
                for critical_rule in critical_media.rules() {
                    full.nodes = full
                        .nodes
                        .into_iter()
                        .map(|node| match node {
                            Node::Media(media) if media.query == critical_media.query => {
                                let before = media.rules().count();
                                let media = subtract_in_media(media, critical_rule);
                                removed += before - media.rules().count();
                                Node::Media(media)
                            }
                            other => other,
                        })
                        .collect();
                }
            }
            Node::Comment(critical_comment) => {
                full.nodes
                    .retain(|node| !matches!(node, Node::Comment(c) if c == critical_comment));
            }
            Node::AtRule(_) | Node::Raw(_) => {}
        }
    }

    let nodes: Vec<Node> = full
        .nodes
        .into_iter()
        .filter(|node| !matches!(node, Node::Media(media) if media.is_empty()))
        .collect();

    tracing::debug!(
        removed_rules = removed,
        remaining_nodes = nodes.len(),
        "subtracted critical CSS"
    );

    Stylesheet::new(nodes)
}

/// Nested at-rules and comments stay where they are.
fn subtract_in_media(media: MediaBlock, critical: &Rule) -> MediaBlock {
    MediaBlock {
        query: media.query,
        nodes: media
            .nodes
            .into_iter()
            .filter_map(|node| match node {
                Node::Rule(rule) => subtract_rule(rule, critical).map(Node::Rule),
                other => Some(other),
            })
            .collect(),
    }
}

/// Returns `None` if the rule is entirely covered by `critical`.
fn subtract_rule(rule: Rule, critical: &Rule) -> Option<Rule> {
    if rule == *critical {
        return None;
    }
    if rule.declarations != critical.declarations {
        return Some(rule);
    }

    let selectors: indexmap::IndexSet<String> = rule
        .selectors
        .iter()
        .filter(|selector| !critical.selectors.contains(*selector))
        .cloned()
        .collect();

    if selectors.is_empty() {
        None
    } else {
        Some(Rule {
            selectors,
            declarations: rule.declarations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_end_to_end_example() {
        assert_eq!(
            diff(".a{color:red}.b{color:blue}", ".a{color:red}"),
            ".b{color:blue}\n"
        );
    }

    #[test]
    fn test_disjoint_rules_are_untouched() {
        let a = ".a{color:red}@media print{.p{display:none}}";
        let b = ".b{margin:0}@media screen{.s{padding:0}}";
        let full = format!("{a}{b}");
        assert_eq!(diff(&full, b).trim(), Stylesheet::parse(a).to_css());
    }

    #[test]
    fn test_empty_critical_returns_full() {
        let full = ".a { color: red }\n\n@media print { .b { display: none } }";
        assert_eq!(
            diff(full, ""),
            ".a{color:red}@media print{.b{display:none}}\n"
        );
    }

    #[test]
    fn test_self_diff_is_empty() {
        let full = ".a{color:red}.b,.c{margin:0}@media (min-width: 10px){.d{x:y}}";
        assert_eq!(diff(full, full).trim(), "");
    }

    #[test]
    fn test_partial_selector_match_strips_selector() {
        assert_eq!(
            diff(".s1,.s2{color:red;margin:0}", ".s1{color:red;margin:0}"),
            ".s2{color:red;margin:0}\n"
        );
    }

    #[test]
    fn test_selector_order_does_not_matter_for_exact_match() {
        assert_eq!(diff(".b,.a{color:red}", ".a,.b{color:red}"), "\n");
    }

    #[test]
    fn test_same_selector_different_declarations_is_kept() {
        assert_eq!(
            diff(".a{color:red;margin:0}", ".a{color:red}"),
            ".a{color:red;margin:0}\n"
        );
    }

    #[test]
    fn test_declaration_order_matters() {
        assert_eq!(
            diff(".a{color:red;margin:0}", ".a{margin:0;color:red}"),
            ".a{color:red;margin:0}\n"
        );
    }

    #[test]
    fn test_critical_selector_superset_removes_rule() {
        assert_eq!(diff(".a{color:red}", ".a,.b{color:red}"), "\n");
    }

    #[test]
    fn test_media_rules_only_match_identical_query() {
        let full = "@media screen and (min-width: 768px){.a{color:red}}\
                    @media screen and (min-width:768px){.a{color:red}}";
        let critical = "@media screen and (min-width: 768px){.a{color:red}}";
        assert_eq!(
            diff(full, critical),
            "@media screen and (min-width:768px){.a{color:red}}\n"
        );
    }

    #[test]
    fn test_top_level_critical_rule_does_not_touch_media() {
        let full = ".a{color:red}@media print{.a{color:red}}";
        assert_eq!(
            diff(full, ".a{color:red}"),
            "@media print{.a{color:red}}\n"
        );
    }

    #[test]
    fn test_media_partial_strip() {
        let full = "@media print{.a,.b{display:none}.c{x:y}}";
        let critical = "@media print{.a{display:none}}";
        assert_eq!(diff(full, critical), "@media print{.b{display:none}.c{x:y}}\n");
    }

    #[test]
    fn test_emptied_media_blocks_are_pruned() {
        let full = ".x{a:b}@media print{.a{display:none}}@media print{.a{display:none}}.y{c:d}";
        let critical = "@media print{.a{display:none}}";
        let out = diff(full, critical);
        assert_eq!(out, ".x{a:b}.y{c:d}\n");

        let sheet = Stylesheet::parse(&out);
        assert!(
            !sheet
                .nodes
                .iter()
                .any(|n| matches!(n, Node::Media(m) if m.is_empty()))
        );
    }

    #[test]
    fn test_untouched_empty_media_in_full_is_pruned() {
        assert_eq!(diff(".a{x:y}@media print{}", ""), ".a{x:y}\n");
    }

    #[test]
    fn test_unmatched_critical_rule_is_ignored() {
        assert_eq!(diff(".a{x:y}", ".zzz{x:y}"), ".a{x:y}\n");
    }

    #[test]
    fn test_comments_survive_the_diff() {
        let full = "/*! license */.a{x:y}\n/*# sourceMappingURL=main.css.map */";
        assert_eq!(
            diff(full, ""),
            "/*! license */.a{x:y}/*# sourceMappingURL=main.css.map */\n"
        );
        assert_eq!(
            diff(full, ".a{x:y}"),
            "/*! license *//*# sourceMappingURL=main.css.map */\n"
        );
    }

    #[test]
    fn test_comment_shared_with_critical_is_removed() {
        let full = "/*! license */.a{x:y}.b{x:z}";
        assert_eq!(diff(full, "/*! license */.a{x:y}"), ".b{x:z}\n");
        assert_eq!(diff(full, full), "\n");
    }

    #[test]
    fn test_media_with_nested_at_rule_still_subtracts() {
        assert_eq!(
            diff(
                "@media print{@page{margin:0}.a{x:y}.b{x:z}}",
                "@media print{.a{x:y}}"
            ),
            "@media print{@page{margin:0}.b{x:z}}\n"
        );
    }

    #[test]
    fn test_media_left_with_only_an_at_rule_is_kept() {
        assert_eq!(
            diff("@media print{@page{margin:0}.a{x:y}}", "@media print{.a{x:y}}"),
            "@media print{@page{margin:0}}\n"
        );
        assert_eq!(
            diff("@media print{/* x */.a{x:y}}", "@media print{.a{x:y}}"),
            "\n"
        );
    }

    #[test]
    fn test_at_rules_pass_through() {
        let full = "@font-face{font-family:X;src:url(x.woff2)}.a{x:y}";
        let critical = "@font-face{font-family:X;src:url(x.woff2)}.a{x:y}";
        assert_eq!(
            diff(full, critical),
            "@font-face{font-family:X;src:url(x.woff2)}\n"
        );
    }

    #[test]
    fn test_consecutive_matches_are_all_removed() {
        // Deleting while scanning must not skip the neighbour of a removed node.
        let full = ".a{x:y}.a{x:y}.a{x:y}.b{x:z}";
        assert_eq!(diff(full, ".a{x:y}"), ".b{x:z}\n");
    }
}
