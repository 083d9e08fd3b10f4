//! Inline critical CSS into the index document.
//!
//! Plain text substitution, no HTML parsing: the critical CSS goes in a
//! `<style>` element right before `</head>`, and stylesheet `<link>`s are
//! turned into preloads that switch to stylesheets once loaded, with a
//! `<noscript>` fallback.

use std::sync::LazyLock;

use regex::{Captures, Regex};

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<link\b[^>]*>").unwrap());
static REL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\brel\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).unwrap()
});
static HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).unwrap()
});
static HEAD_END_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</head\s*>").unwrap());

fn attr<'h>(re: &Regex, tag: &'h str) -> Option<&'h str> {
    let caps = re.captures(tag)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str())
}

/// Insert `critical` into `html` and defer the stylesheets not in `ignore`.
pub fn inline_critical(html: &str, critical: &str, ignore: &[String]) -> String {
    let mut deferred = 0usize;
    let html = LINK_RE.replace_all(html, |caps: &Captures<'_>| {
        let tag = &caps[0];
        let is_stylesheet = attr(&REL_RE, tag).is_some_and(|rel| {
            rel.split_ascii_whitespace()
                .any(|r| r.eq_ignore_ascii_case("stylesheet"))
        });
        let Some(href) = attr(&HREF_RE, tag).filter(|_| is_stylesheet) else {
            return tag.to_string();
        };
        if ignore.iter().any(|i| i == href) {
            return tag.to_string();
        }

        deferred += 1;
        format!(
            r#"<link rel="preload" href="{href}" as="style" onload="this.onload=null;this.rel='stylesheet'"><noscript>{tag}</noscript>"#
        )
    });

    let style = format!("<style>{critical}</style>");
    let inlined = match HEAD_END_RE.find(&html) {
        Some(m) => format!("{}{style}{}", &html[..m.start()], &html[m.start()..]),
        None => {
            tracing::warn!("no </head> in index html, prepending critical CSS");
            format!("{style}{html}")
        }
    };

    tracing::debug!(deferred, critical = critical.len(), "inlined critical CSS");
    inlined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inlines_before_head_end() {
        let html = "<html><head><title>t</title></head><body></body></html>";
        assert_eq!(
            inline_critical(html, ".a{x:y}", &[]),
            "<html><head><title>t</title><style>.a{x:y}</style></head><body></body></html>"
        );
    }

    #[test]
    fn test_defers_stylesheets() {
        let html = r#"<head><link rel="stylesheet" href="/main.css"></head>"#;
        let out = inline_critical(html, "", &[]);
        assert_eq!(
            out,
            r#"<head><link rel="preload" href="/main.css" as="style" onload="this.onload=null;this.rel='stylesheet'"><noscript><link rel="stylesheet" href="/main.css"></noscript><style></style></head>"#
        );
    }

    #[test]
    fn test_ignored_and_non_stylesheet_links_are_kept() {
        let html = concat!(
            "<head>",
            r#"<link rel="icon" href="/favicon.ico">"#,
            r#"<link href='/vendor.css' rel='stylesheet'>"#,
            "</head>"
        );
        let out = inline_critical(html, ".c{}", &["/vendor.css".to_string()]);
        assert_eq!(
            out,
            concat!(
                "<head>",
                r#"<link rel="icon" href="/favicon.ico">"#,
                r#"<link href='/vendor.css' rel='stylesheet'>"#,
                "<style>.c{}</style></head>"
            )
        );
    }

    #[test]
    fn test_missing_head_prepends() {
        assert_eq!(inline_critical("<p>x</p>", ".a{}", &[]), "<style>.a{}</style><p>x</p>");
    }
}
