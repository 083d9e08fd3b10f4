//! Stylesheet AST with raw-text fidelity
//!
//! Selectors, declaration values and media queries are kept exactly as they
//! appear in the source (only trimmed), so comparing two stylesheets is a
//! matter of comparing strings. Nothing is normalized: `(min-width:768px)`
//! and `(min-width: 768px)` are different queries as far as this module is
//! concerned.
//!
//! Anything that isn't a style rule or an `@media` block (other at-rules,
//! comments, unparseable text) is kept verbatim, so serializing a parsed
//! stylesheet never loses content.

use std::fmt;

use cssparser::{
    AtRuleParser, BasicParseErrorKind, CowRcStr, DeclarationParser, ParseError, Parser,
    ParserInput, ParserState, QualifiedRuleParser, RuleBodyItemParser, RuleBodyParser,
    StyleSheetParser,
};
use indexmap::IndexSet;

/// A single `property: value` pair. `!important` stays part of the value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Declaration {
    pub property: String,
    pub value: String,
}

impl Declaration {
    pub fn new(property: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            value: value.into(),
        }
    }
}

/// A style rule: a selector set and an ordered declaration list.
///
/// Equality treats the selectors as a set (order-insensitive) and the
/// declarations as a sequence (order-sensitive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub selectors: IndexSet<String>,
    pub declarations: Vec<Declaration>,
}

impl Rule {
    pub fn new<S, D>(selectors: S, declarations: D) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        D: IntoIterator<Item = Declaration>,
    {
        Self {
            selectors: selectors.into_iter().map(Into::into).collect(),
            declarations: declarations.into_iter().collect(),
        }
    }

    /// Key that is equal for two rules iff the rules are equal.
    pub fn dedup_key(&self) -> (Vec<&str>, &[Declaration]) {
        let mut selectors: Vec<&str> = self.selectors.iter().map(String::as_str).collect();
        selectors.sort_unstable();
        (selectors, &self.declarations)
    }
}

/// An `@media` block.
///
/// Style rules are parsed; nested at-rules (`@page`, `@font-face`, another
/// `@media`...) and comments are kept as opaque children in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaBlock {
    pub query: String,
    pub nodes: Vec<Node>,
}

impl MediaBlock {
    /// The style rules of the block, in order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.nodes.iter().filter_map(|node| match node {
            Node::Rule(rule) => Some(rule),
            _ => None,
        })
    }

    /// No rules and no nested at-rules left. Comments alone don't count.
    pub fn is_empty(&self) -> bool {
        self.nodes.iter().all(|node| matches!(node, Node::Comment(_)))
    }
}

/// Any other at-rule (`@font-face`, `@keyframes`, `@import`...), kept as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtRule {
    /// Name without the leading `@`, as written.
    pub name: String,
    pub prelude: String,
    /// Raw block contents, `None` for statement at-rules like `@import`.
    pub block: Option<String>,
}

impl AtRule {
    /// `@name prelude`, the part exclusion patterns are matched against.
    pub fn header(&self) -> String {
        if self.prelude.is_empty() {
            format!("@{}", self.name)
        } else {
            format!("@{} {}", self.name, self.prelude)
        }
    }

    pub fn is_font_face(&self) -> bool {
        self.name.eq_ignore_ascii_case("font-face")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Rule(Rule),
    Media(MediaBlock),
    AtRule(AtRule),
    /// Source text the parser could not turn into a rule.
    Raw(String),
    /// A `/* ... */` comment between rules, delimiters included.
    Comment(String),
}

/// An ordered sequence of top-level nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stylesheet {
    pub nodes: Vec<Node>,
}

impl Stylesheet {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Parse CSS text. Never fails: unparseable rules become [`Node::Raw`],
    /// comments between rules become [`Node::Comment`].
    pub fn parse(css: &str) -> Self {
        let mut input = ParserInput::new(css);
        let mut parser = Parser::new(&mut input);
        Self {
            nodes: parse_rule_list(&mut parser, false),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Compact serialization (`a,b{color:red;margin:0}`).
    pub fn to_css(&self) -> String {
        self.to_string()
    }
}

fn raw_node(raw: &str) -> Option<Node> {
    let raw = raw.trim();
    (!raw.is_empty()).then(|| Node::Raw(raw.to_owned()))
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.property, self.value)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, selector) in self.selectors.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(selector)?;
        }
        f.write_str("{")?;
        for (i, declaration) in self.declarations.iter().enumerate() {
            if i > 0 {
                f.write_str(";")?;
            }
            write!(f, "{declaration}")?;
        }
        f.write_str("}")
    }
}

impl fmt::Display for MediaBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@media {}{{", self.query)?;
        for node in &self.nodes {
            write!(f, "{node}")?;
        }
        f.write_str("}")
    }
}

impl fmt::Display for AtRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.header())?;
        match &self.block {
            Some(block) => write!(f, "{{{block}}}"),
            None => f.write_str(";"),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Rule(rule) => rule.fmt(f),
            Node::Media(media) => media.fmt(f),
            Node::AtRule(at_rule) => at_rule.fmt(f),
            Node::Raw(raw) | Node::Comment(raw) => f.write_str(raw),
        }
    }
}

impl fmt::Display for Stylesheet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            write!(f, "{node}")?;
        }
        Ok(())
    }
}

// ============================================================================
// cssparser glue
// ============================================================================

/// Consume the rest of `input` and return it as trimmed source text.
fn consume_raw<'i>(input: &mut Parser<'i, '_>) -> &'i str {
    let start = input.position();
    while input.next_including_whitespace_and_comments().is_ok() {}
    input.slice_from(start).trim()
}

/// Selector list prelude: the raw text plus its top-level comma-separated parts.
struct SelectorPrelude {
    raw: String,
    selectors: IndexSet<String>,
}

fn parse_selector_prelude<'i>(
    input: &mut Parser<'i, '_>,
) -> Result<SelectorPrelude, ParseError<'i, ()>> {
    let start = input.position();
    let parts = input.parse_comma_separated(|input: &mut Parser<'i, '_>| {
        Ok::<_, ParseError<'i, ()>>(consume_raw(input).to_owned())
    })?;
    let raw = input.slice_from(start).trim().to_owned();
    let selectors: IndexSet<String> = parts.into_iter().filter(|s| !s.is_empty()).collect();
    if selectors.is_empty() {
        return Err(input.new_error(BasicParseErrorKind::QualifiedRuleInvalid));
    }
    Ok(SelectorPrelude { raw, selectors })
}

/// Parse a style rule block. Falls back to a raw node if the block holds
/// anything besides declarations (nested rules, broken declarations).
fn parse_rule_block<'i>(prelude: SelectorPrelude, input: &mut Parser<'i, '_>) -> Node {
    let start = input.position();
    let mut body = DeclarationListParser;
    let mut declarations = Vec::new();
    let mut clean = true;
    for item in RuleBodyParser::new(input, &mut body) {
        match item {
            Ok(declaration) => declarations.push(declaration),
            Err(_) => clean = false,
        }
    }
    if clean {
        Node::Rule(Rule {
            selectors: prelude.selectors,
            declarations,
        })
    } else {
        let block = input.slice_from(start).trim();
        tracing::trace!(selector = %prelude.raw, "keeping rule with unsupported body verbatim");
        Node::Raw(format!("{}{{{}}}", prelude.raw, block))
    }
}

/// Run a rule list over `input`, keeping the comments cssparser skips
/// between rules.
fn parse_rule_list<'i>(input: &mut Parser<'i, '_>, in_media: bool) -> Vec<Node> {
    let mut parser = RuleListParser { in_media };
    let mut rules = StyleSheetParser::new(input, &mut parser);
    let mut nodes = Vec::new();
    loop {
        let before = rules.input.position();
        let item = rules.next();
        push_leading_comments(rules.input.slice_from(before), &mut nodes);
        match item {
            None => break,
            Some(Ok(node)) => nodes.push(node),
            Some(Err((_, raw))) => nodes.extend(raw_node(raw)),
        }
    }
    nodes
}

/// Collect the comments in the whitespace-and-comments run that starts `text`.
fn push_leading_comments(mut text: &str, nodes: &mut Vec<Node>) {
    loop {
        text = text.trim_start();
        let Some(rest) = text.strip_prefix("/*") else {
            return;
        };
        match rest.find("*/") {
            Some(end) => {
                nodes.push(Node::Comment(text[..end + 4].to_owned()));
                text = &rest[end + 2..];
            }
            None => {
                // Unterminated comments run to the end of input.
                nodes.push(Node::Comment(format!("{}*/", text.trim_end())));
                return;
            }
        }
    }
}

enum AtPrelude {
    Media(String),
    Other { name: String, prelude: String },
}

/// Top-level rules, or the body of an `@media` block (`in_media`), where a
/// nested `@media` is kept opaque.
struct RuleListParser {
    in_media: bool,
}

impl<'i> QualifiedRuleParser<'i> for RuleListParser {
    type Prelude = SelectorPrelude;
    type QualifiedRule = Node;
    type Error = ();

    fn parse_prelude<'t>(
        &mut self,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::Prelude, ParseError<'i, Self::Error>> {
        parse_selector_prelude(input)
    }

    fn parse_block<'t>(
        &mut self,
        prelude: Self::Prelude,
        _start: &ParserState,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::QualifiedRule, ParseError<'i, Self::Error>> {
        Ok(parse_rule_block(prelude, input))
    }
}

impl<'i> AtRuleParser<'i> for RuleListParser {
    type Prelude = AtPrelude;
    type AtRule = Node;
    type Error = ();

    fn parse_prelude<'t>(
        &mut self,
        name: CowRcStr<'i>,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::Prelude, ParseError<'i, Self::Error>> {
        let prelude = consume_raw(input).to_owned();
        if !self.in_media && name.eq_ignore_ascii_case("media") {
            Ok(AtPrelude::Media(prelude))
        } else {
            Ok(AtPrelude::Other {
                name: name.to_string(),
                prelude,
            })
        }
    }

    fn rule_without_block(
        &mut self,
        prelude: Self::Prelude,
        _start: &ParserState,
    ) -> Result<Self::AtRule, ()> {
        let (name, prelude) = match prelude {
            AtPrelude::Media(query) => ("media".to_owned(), query),
            AtPrelude::Other { name, prelude } => (name, prelude),
        };
        Ok(Node::AtRule(AtRule {
            name,
            prelude,
            block: None,
        }))
    }

    fn parse_block<'t>(
        &mut self,
        prelude: Self::Prelude,
        _start: &ParserState,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::AtRule, ParseError<'i, Self::Error>> {
        match prelude {
            AtPrelude::Media(query) => Ok(Node::Media(MediaBlock {
                query,
                nodes: parse_rule_list(input, true),
            })),
            AtPrelude::Other { name, prelude } => Ok(Node::AtRule(AtRule {
                name,
                prelude,
                block: Some(consume_raw(input).to_owned()),
            })),
        }
    }
}

/// Declaration-only rule body.
struct DeclarationListParser;

impl<'i> DeclarationParser<'i> for DeclarationListParser {
    type Declaration = Declaration;
    type Error = ();

    fn parse_value<'t>(
        &mut self,
        name: CowRcStr<'i>,
        input: &mut Parser<'i, 't>,
        _declaration_start: &ParserState,
    ) -> Result<Self::Declaration, ParseError<'i, Self::Error>> {
        let value = consume_raw(input);
        Ok(Declaration::new(name.to_string(), value))
    }
}

impl<'i> AtRuleParser<'i> for DeclarationListParser {
    type Prelude = ();
    type AtRule = Declaration;
    type Error = ();
}

impl<'i> QualifiedRuleParser<'i> for DeclarationListParser {
    type Prelude = ();
    type QualifiedRule = Declaration;
    type Error = ();
}

impl<'i> RuleBodyItemParser<'i, Declaration, ()> for DeclarationListParser {
    fn parse_declarations(&self) -> bool {
        true
    }

    fn parse_qualified(&self) -> bool {
        false
    }
}
