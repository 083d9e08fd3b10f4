//! Configuration types for dodeca critical CSS extraction.
//!
//! The configuration is read from YAML, with the same camelCase keys the
//! webpack critical-styles plugins use, so existing configs carry over:
//!
//! ```yaml
//! filename: "[name].[contenthash:md5:8].css"
//! urls: ["/", "/about"]
//! dimensions:
//!   - { width: 375, height: 667 }
//!   - { width: 1440, height: 900 }
//! parallel: 3
//! commit: true
//! ```
//!
//! Validation happens in [`CriticalConfig::validate`], before any work starts.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use dodeca_css_diff::{ExcludePattern, IgnoreOptions};
use regex::Regex;
use serde::Deserialize;

/// Upper bound on concurrent render calls, whatever the config says.
pub const MAX_PARALLEL: u32 = 5;

/// Upper bound on `stall`, in minutes.
pub const MAX_STALL_MINUTES: u32 = 5;

/// Errors found while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The config file is not valid YAML for this schema.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// An option has the right shape but an invalid value.
    #[error("invalid `{option}` option: {message}")]
    Invalid {
        option: &'static str,
        message: String,
    },
}

impl ConfigError {
    fn invalid(option: &'static str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            option,
            message: message.into(),
        }
    }
}

/// One viewport size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Dimension {
    pub width: u32,
    pub height: u32,
}

impl Dimension {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Dimension {
    fn default() -> Self {
        Self::new(900, 1300)
    }
}

/// An exclusion pattern as written in config: a plain string (substring
/// match) or `{ regex: "..." }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum IgnorePattern {
    Literal(String),
    Regex { regex: String },
}

/// Where a proxied prefix goes: a bare origin, or `{ target: "..." }` as
/// http-proxy-middleware writes it. Other proxy options are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ProxyTarget {
    Url(String),
    Options(ProxyOptions),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyOptions {
    pub target: String,
}

impl ProxyTarget {
    /// The upstream origin.
    pub fn target(&self) -> &str {
        match self {
            ProxyTarget::Url(url) => url,
            ProxyTarget::Options(options) => &options.target,
        }
    }
}

impl From<String> for ProxyTarget {
    fn from(url: String) -> Self {
        ProxyTarget::Url(url)
    }
}

impl From<&str> for ProxyTarget {
    fn from(url: &str) -> Self {
        ProxyTarget::Url(url.to_owned())
    }
}

/// A static directory served next to the build output.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Externals {
    /// Directory on disk.
    pub root: Utf8PathBuf,
    /// URL prefix to mount it under. Mounted at `/` when absent.
    #[serde(default)]
    pub url_path: Option<String>,
}

/// Critical CSS configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CriticalConfig {
    /// Root-relative URLs to render.
    #[serde(default = "default_urls")]
    pub urls: Vec<String>,

    /// Viewport sizes to render every URL at.
    #[serde(default = "default_dimensions")]
    pub dimensions: Vec<Dimension>,

    /// Output filename template for the non-critical stylesheet, e.g.
    /// `[name].[contenthash:8].css`.
    pub filename: String,

    /// Maximum number of concurrent render calls (1-5).
    #[serde(default = "default_parallel")]
    pub parallel: u32,

    /// Persist the rewritten stylesheets. When false, only the HTML is
    /// updated (dry run for the CSS).
    #[serde(default, alias = "extract")]
    pub commit: bool,

    /// Minify the non-critical stylesheets and the critical CSS.
    #[serde(default)]
    pub minify: bool,

    /// Selectors, declarations or at-rules to keep out of the critical CSS.
    #[serde(default)]
    pub ignore: Vec<IgnorePattern>,

    /// What `ignore` patterns are matched against.
    #[serde(default)]
    pub ignore_options: IgnoreOptions,

    /// Chunks whose files are left out of the whole pipeline.
    #[serde(default)]
    pub exclude_chunks: Vec<String>,

    /// Prefix the build output is served under.
    #[serde(default = "default_public_path")]
    pub public_path: String,

    /// Extra static directory to serve to the renderer.
    #[serde(default)]
    pub externals: Option<Externals>,

    /// Path prefix -> upstream origin, for APIs the page needs while rendering.
    #[serde(default)]
    pub proxy: BTreeMap<String, ProxyTarget>,

    /// Keep the local server up for this many minutes before extracting.
    #[serde(default)]
    pub stall: Option<u32>,

    /// Options passed through verbatim to the renderer.
    #[serde(default, alias = "penthouse")]
    pub render: serde_json::Map<String, serde_json::Value>,
}

fn default_urls() -> Vec<String> {
    vec!["/".to_string()]
}

fn default_dimensions() -> Vec<Dimension> {
    vec![Dimension::default()]
}

fn default_parallel() -> u32 {
    MAX_PARALLEL
}

fn default_public_path() -> String {
    "/".to_string()
}

impl CriticalConfig {
    /// A config with every option at its default.
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            urls: default_urls(),
            dimensions: default_dimensions(),
            filename: filename.into(),
            parallel: default_parallel(),
            commit: false,
            minify: false,
            ignore: Vec::new(),
            ignore_options: IgnoreOptions::default(),
            exclude_chunks: Vec::new(),
            public_path: default_public_path(),
            externals: None,
            proxy: BTreeMap::new(),
            stall: None,
            render: serde_json::Map::new(),
        }
    }

    /// Parse and validate YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Self::parse_named(yaml, "<inline>")
    }

    /// Read, parse and validate a YAML config file.
    pub fn load(path: &Utf8Path) -> Result<Self, ConfigError> {
        let yaml = fs_err::read_to_string(path)?;
        Self::parse_named(&yaml, path.as_str())
    }

    fn parse_named(yaml: &str, name: &str) -> Result<Self, ConfigError> {
        let config: CriticalConfig =
            serde_yaml::from_str(yaml).map_err(|source| ConfigError::Parse {
                path: name.to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check option ranges and shapes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_PARALLEL).contains(&self.parallel) {
            return Err(ConfigError::invalid(
                "parallel",
                format!("{} is outside 1..={MAX_PARALLEL}", self.parallel),
            ));
        }

        if let Some(stall) = self.stall
            && !(1..=MAX_STALL_MINUTES).contains(&stall)
        {
            return Err(ConfigError::invalid(
                "stall",
                format!("{stall} is outside 1..={MAX_STALL_MINUTES}"),
            ));
        }

        if let Some(url) = self.urls.iter().find(|url| !url.starts_with('/')) {
            return Err(ConfigError::invalid(
                "urls",
                format!("'{url}' must be root-relative (start with '/')"),
            ));
        }

        if !self.filename.ends_with(".css") {
            return Err(ConfigError::invalid(
                "filename",
                format!("'{}' must end with .css", self.filename),
            ));
        }

        if let Some(dim) = self
            .dimensions
            .iter()
            .find(|d| d.width == 0 || d.height == 0)
        {
            return Err(ConfigError::invalid(
                "dimensions",
                format!("{}x{} is not a usable viewport", dim.width, dim.height),
            ));
        }

        if let Some(url_path) = self
            .externals
            .as_ref()
            .and_then(|e| e.url_path.as_deref())
            .filter(|p| !p.starts_with('/'))
        {
            return Err(ConfigError::invalid(
                "externals",
                format!("urlPath '{url_path}' must start with '/'"),
            ));
        }

        if let Some(prefix) = self.proxy.keys().find(|p| !p.starts_with('/')) {
            return Err(ConfigError::invalid(
                "proxy",
                format!("prefix '{prefix}' must start with '/'"),
            ));
        }

        self.exclude_patterns().map(|_| ())
    }

    /// Compile the `ignore` list.
    pub fn exclude_patterns(&self) -> Result<Vec<ExcludePattern>, ConfigError> {
        self.ignore
            .iter()
            .map(|pattern| match pattern {
                IgnorePattern::Literal(text) => Ok(ExcludePattern::Literal(text.clone())),
                IgnorePattern::Regex { regex } => Regex::new(regex)
                    .map(ExcludePattern::Regex)
                    .map_err(|e| ConfigError::invalid("ignore", format!("bad regex '{regex}': {e}"))),
            })
            .collect()
    }
}
