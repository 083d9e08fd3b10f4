//! Split the stylesheets in the build output.
//!
//! Every managed stylesheet loses the rules that were inlined as critical
//! CSS, gets a new name from the filename template, and replaces the
//! original in the build output and in its chunk's file list. The index
//! HTML is updated to point at the new names.
//!
//! Everything is planned before anything is touched: if one stylesheet
//! can't be rewritten, the build output is left as it was.

use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::build::BuildOutput;
use crate::error::RewriteError;
use crate::filename::{TemplateContext, render_filename};
use crate::minify::minify_css;

#[derive(Debug, Clone, Copy)]
pub struct RewriteOptions<'a> {
    /// Filename template for the rewritten stylesheets.
    pub filename: &'a str,
    /// Replace the stylesheets. When false only the HTML is updated.
    pub commit: bool,
    pub minify: bool,
}

/// A stylesheet that was moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renamed {
    pub old: String,
    pub new: String,
}

struct Planned {
    old: String,
    new: String,
    chunk: usize,
    content: String,
}

fn plan(
    build: &BuildOutput,
    css_files: &[String],
    critical: &str,
    options: &RewriteOptions<'_>,
) -> Result<Vec<Planned>, RewriteError> {
    let mut planned = Vec::with_capacity(css_files.len());

    for path in css_files {
        let bytes = build
            .assets
            .get(path)
            .ok_or_else(|| RewriteError::MissingAsset(path.clone()))?;
        let full = std::str::from_utf8(bytes).map_err(|_| RewriteError::NotUtf8(path.clone()))?;

        let mut content = dodeca_css_diff::diff(full, critical);
        if options.minify {
            content = minify_css(&content).map_err(|source| RewriteError::Minify {
                path: path.clone(),
                source,
            })?;
        }

        let chunk = build
            .chunks
            .iter()
            .position(|c| c.files.iter().any(|f| f == path))
            .ok_or_else(|| RewriteError::MissingChunk(path.clone()))?;

        let ctx = TemplateContext {
            chunk: &build.chunks[chunk],
            build_hash: &build.hash,
            content: content.as_bytes(),
        };
        let new = render_filename(options.filename, &ctx).map_err(|token| {
            RewriteError::UnresolvedToken {
                token,
                path: path.clone(),
            }
        })?;

        tracing::debug!(
            old = %path,
            new = %new,
            before = full.len(),
            after = content.len(),
            "planned stylesheet rewrite"
        );

        planned.push(Planned {
            old: path.clone(),
            new,
            chunk,
            content,
        });
    }

    let moving: HashSet<&str> = planned.iter().map(|p| p.old.as_str()).collect();
    let mut claimed: Vec<&Planned> = Vec::with_capacity(planned.len());
    for p in &planned {
        if let Some(other) = claimed.iter().find(|other| other.new == p.new) {
            return Err(RewriteError::PathCollision {
                old: p.old.clone(),
                new: p.new.clone(),
                existing: other.old.clone(),
            });
        }
        if build.assets.contains_key(&p.new) && !moving.contains(p.new.as_str()) {
            return Err(RewriteError::PathCollision {
                old: p.old.clone(),
                new: p.new.clone(),
                existing: p.new.clone(),
            });
        }
        claimed.push(p);
    }

    Ok(planned)
}

/// Rewrite `css_files` and store `inlined_html` (with stylesheet references
/// updated) as the new content of `index_html`.
pub fn rewrite_assets(
    build: &mut BuildOutput,
    index_html: &str,
    inlined_html: &str,
    css_files: &[String],
    critical: &str,
    options: &RewriteOptions<'_>,
) -> Result<Vec<Renamed>, RewriteError> {
    if !build.assets.contains_key(index_html) {
        return Err(RewriteError::MissingAsset(index_html.to_string()));
    }

    let planned = plan(build, css_files, critical, options)?;
    let mut renamed = Vec::new();

    if options.commit {
        for p in &planned {
            build.assets.shift_remove(&p.old);
            build.chunks[p.chunk].files.retain(|f| f != &p.old);
        }
        for p in planned {
            build.chunks[p.chunk].files.push(p.new.clone());
            build.assets.insert(p.new.clone(), p.content.into_bytes());
            renamed.push(Renamed {
                old: p.old,
                new: p.new,
            });
        }
    }

    let html = replace_paths(inlined_html, &renamed)?;
    build.assets.insert(index_html.to_string(), html.into_bytes());

    tracing::info!(
        stylesheets = css_files.len(),
        renamed = renamed.len(),
        commit = options.commit,
        "rewrote assets"
    );

    Ok(renamed)
}

/// Replace every literal occurrence of an old path in one pass, so a new
/// path that is also some other stylesheet's old path is left alone.
/// Longer paths win over their prefixes.
fn replace_paths(html: &str, renamed: &[Renamed]) -> Result<String, RewriteError> {
    if renamed.is_empty() {
        return Ok(html.to_string());
    }

    let new_paths: HashMap<&str, &str> = renamed
        .iter()
        .map(|r| (r.old.as_str(), r.new.as_str()))
        .collect();
    let mut olds: Vec<&str> = new_paths.keys().copied().collect();
    olds.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));

    let alternation = olds
        .iter()
        .map(|old| regex::escape(old))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = Regex::new(&alternation)?;

    Ok(pattern
        .replace_all(html, |caps: &regex::Captures<'_>| {
            let old = &caps[0];
            new_paths.get(old).copied().unwrap_or(old).to_string()
        })
        .into_owned())
}
