//! Post-processing of concatenated critical CSS
//!
//! Critical CSS comes back from the renderer once per render target and is
//! concatenated, so the same rules show up many times. This module first
//! drops anything matching the configured exclusion patterns, then (if asked)
//! removes the structural duplicates.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde::Deserialize;

use crate::ast::{Declaration, MediaBlock, Node, Rule, Stylesheet};

/// One exclusion pattern.
#[derive(Debug, Clone)]
pub enum ExcludePattern {
    /// Case-sensitive substring match.
    Literal(String),
    Regex(Regex),
}

impl ExcludePattern {
    pub fn is_match(&self, text: &str) -> bool {
        match self {
            ExcludePattern::Literal(needle) => text.contains(needle.as_str()),
            ExcludePattern::Regex(regex) => regex.is_match(text),
        }
    }
}

/// Which parts of the stylesheet exclusion patterns are matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IgnoreOptions {
    /// Remove matching selectors from their rule.
    pub match_selectors: bool,
    /// Remove at-rules whose `@name prelude` header matches (`@font-face`).
    pub match_types: bool,
    /// Remove declarations whose property matches.
    pub match_declaration_properties: bool,
    /// Remove declarations whose value matches.
    pub match_declaration_values: bool,
    /// Remove whole `@media` blocks whose query matches.
    pub match_media: bool,
}

impl Default for IgnoreOptions {
    fn default() -> Self {
        Self {
            match_selectors: true,
            match_types: true,
            match_declaration_properties: true,
            match_declaration_values: true,
            match_media: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OptimizeOptions {
    pub exclude: Vec<ExcludePattern>,
    pub ignore: IgnoreOptions,
    pub minify: bool,
}

/// Filter and deduplicate critical CSS text.
///
/// With no exclusion patterns and `minify == false` the text is returned
/// untouched.
pub fn optimize(css: &str, options: &OptimizeOptions) -> String {
    if options.exclude.is_empty() && !options.minify {
        return css.to_owned();
    }

    let mut sheet = Stylesheet::parse(css);
    if !options.exclude.is_empty() {
        sheet = exclude(sheet, &options.exclude, &options.ignore);
    }
    if options.minify {
        sheet = dedupe(sheet);
    }
    sheet.to_css()
}

// ============================================================================
// Exclusion
// ============================================================================

/// Drop every selector, declaration, media block or at-rule matching one of
/// `patterns`. Rules left without selectors or declarations are dropped.
pub fn exclude(sheet: Stylesheet, patterns: &[ExcludePattern], ignore: &IgnoreOptions) -> Stylesheet {
    let matches = |text: &str| patterns.iter().any(|p| p.is_match(text));
    let before = sheet.nodes.len();

    let nodes: Vec<Node> = sheet
        .nodes
        .into_iter()
        .filter_map(|node| exclude_node(node, &matches, ignore))
        .collect();

    tracing::debug!(
        dropped_nodes = before - nodes.len(),
        patterns = patterns.len(),
        "applied critical CSS exclusions"
    );

    Stylesheet::new(nodes)
}

fn exclude_node(
    node: Node,
    matches: &impl Fn(&str) -> bool,
    ignore: &IgnoreOptions,
) -> Option<Node> {
    match node {
        Node::Rule(rule) => exclude_in_rule(rule, matches, ignore).map(Node::Rule),
        Node::Media(media) => {
            if ignore.match_media && matches(&media.query) {
                return None;
            }
            let had_content = !media.is_empty();
            let media = MediaBlock {
                query: media.query,
                nodes: media
                    .nodes
                    .into_iter()
                    .filter_map(|node| exclude_node(node, matches, ignore))
                    .collect(),
            };
            if had_content && media.is_empty() {
                None
            } else {
                Some(Node::Media(media))
            }
        }
        Node::AtRule(at_rule) => {
            if ignore.match_types && matches(&at_rule.header()) {
                None
            } else {
                Some(Node::AtRule(at_rule))
            }
        }
        other @ (Node::Raw(_) | Node::Comment(_)) => Some(other),
    }
}

fn exclude_in_rule(rule: Rule, matches: &impl Fn(&str) -> bool, ignore: &IgnoreOptions) -> Option<Rule> {
    let had_declarations = !rule.declarations.is_empty();

    let selectors: indexmap::IndexSet<String> = if ignore.match_selectors {
        rule.selectors.into_iter().filter(|s| !matches(s)).collect()
    } else {
        rule.selectors
    };

    let declarations: Vec<Declaration> = rule
        .declarations
        .into_iter()
        .filter(|d| {
            !((ignore.match_declaration_properties && matches(&d.property))
                || (ignore.match_declaration_values && matches(&d.value)))
        })
        .collect();

    if selectors.is_empty() || (had_declarations && declarations.is_empty()) {
        None
    } else {
        Some(Rule {
            selectors,
            declarations,
        })
    }
}

// ============================================================================
// Structural minification
// ============================================================================

/// Drop empty rules and media blocks, merge media blocks with identical
/// queries into their first occurrence, and drop duplicate rules and
/// duplicate `@font-face` rules. Survivors keep their first-occurrence order.
pub fn dedupe(sheet: Stylesheet) -> Stylesheet {
    let before = sheet.nodes.len();
    let mut nodes: Vec<Node> = Vec::with_capacity(sheet.nodes.len());
    let mut media_slots: HashMap<String, usize> = HashMap::new();
    let mut seen_font_faces: HashSet<String> = HashSet::new();

    for node in sheet.nodes {
        match node {
            Node::Rule(rule) => nodes.push(Node::Rule(rule)),
            Node::Media(media) => match media_slots.get(&media.query) {
                Some(&slot) => {
                    if let Node::Media(existing) = &mut nodes[slot] {
                        existing.nodes.extend(media.nodes);
                    }
                }
                None => {
                    media_slots.insert(media.query.clone(), nodes.len());
                    nodes.push(Node::Media(media));
                }
            },
            Node::AtRule(at_rule) if at_rule.is_font_face() => {
                if seen_font_faces.insert(font_face_key(&at_rule.to_string())) {
                    nodes.push(Node::AtRule(at_rule));
                }
            }
            other => nodes.push(other),
        }
    }

    let mut seen_rules = HashSet::new();
    let mut seen_comments = HashSet::new();
    let nodes: Vec<Node> = nodes
        .into_iter()
        .filter_map(|node| match node {
            Node::Rule(rule) => is_new_rule(&rule, &mut seen_rules).then_some(Node::Rule(rule)),
            Node::Media(media) => {
                let mut seen_in_media = HashSet::new();
                let media = MediaBlock {
                    query: media.query,
                    nodes: media
                        .nodes
                        .into_iter()
                        .filter(|node| match node {
                            Node::Rule(rule) => is_new_rule(rule, &mut seen_in_media),
                            Node::Comment(comment) => is_kept_comment(comment, &mut seen_comments),
                            _ => true,
                        })
                        .collect(),
                };
                (!media.is_empty()).then_some(Node::Media(media))
            }
            Node::Comment(comment) => {
                is_kept_comment(&comment, &mut seen_comments).then_some(Node::Comment(comment))
            }
            other => Some(other),
        })
        .collect();

    tracing::debug!(
        before,
        after = nodes.len(),
        "deduplicated critical CSS"
    );

    Stylesheet::new(nodes)
}

type RuleKey = (Vec<String>, Vec<Declaration>);

/// Non-empty and not seen before.
fn is_new_rule(rule: &Rule, seen: &mut HashSet<RuleKey>) -> bool {
    if rule.declarations.is_empty() {
        return false;
    }
    let (selectors, declarations) = rule.dedup_key();
    seen.insert((
        selectors.into_iter().map(str::to_owned).collect(),
        declarations.to_vec(),
    ))
}

/// Only `/*! ... */` comments survive minification, once each.
fn is_kept_comment(comment: &str, seen: &mut HashSet<String>) -> bool {
    comment.starts_with("/*!") && seen.insert(comment.to_owned())
}

fn font_face_key(css: &str) -> String {
    css.split_whitespace().collect::<Vec<_>>().join(" ")
}
