//! The render call: one page, one viewport, the full stylesheet in, the
//! critical subset out.
//!
//! The renderer itself is a headless browser living somewhere else. The
//! request is posted as flat JSON with the same keys penthouse takes
//! (`url`, `width`, `height`, `cssString`, plus whatever passthrough
//! options were configured), so a thin penthouse wrapper service works
//! as-is.

use serde_json::{Map, Value};

use crate::error::RenderError;

/// Option keys that are always set per target.
pub const PER_TARGET_KEYS: [&str; 4] = ["url", "width", "height", "cssString"];

/// One rendering context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTarget {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

/// What a single render call receives.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub target: &'a RenderTarget,
    pub css: &'a str,
    pub options: &'a Map<String, Value>,
}

impl RenderRequest<'_> {
    /// Flat JSON body. Per-target keys win over passthrough options.
    pub fn to_json(&self) -> Value {
        let mut body = self.options.clone();
        body.insert("url".into(), Value::from(self.target.url.as_str()));
        body.insert("width".into(), Value::from(self.target.width));
        body.insert("height".into(), Value::from(self.target.height));
        body.insert("cssString".into(), Value::from(self.css));

        if let Some(Value::Object(screenshots)) = body.get_mut("screenshots")
            && let Some(Value::String(base)) = screenshots.get("basePath")
        {
            let base = screenshot_base_path(base, self.target);
            screenshots.insert("basePath".into(), Value::String(base));
        }

        Value::Object(body)
    }
}

/// `{base}{slug(url)}-{width}-{height}`, so screenshots of different
/// targets don't overwrite each other.
pub fn screenshot_base_path(base: &str, target: &RenderTarget) -> String {
    format!(
        "{base}{}-{}-{}",
        slug(&target.url),
        target.width,
        target.height
    )
}

fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_dash = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Something that can find the critical CSS of a page.
#[allow(async_fn_in_trait)]
pub trait CriticalRenderer {
    async fn render(&self, request: &RenderRequest<'_>) -> Result<String, RenderError>;
}

/// Posts render requests to an HTTP render service.
#[derive(Debug, Clone)]
pub struct HttpRenderer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRenderer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl CriticalRenderer for HttpRenderer {
    async fn render(&self, request: &RenderRequest<'_>) -> Result<String, RenderError> {
        let url = &request.target.url;
        tracing::debug!(
            endpoint = %self.endpoint,
            %url,
            width = request.target.width,
            height = request.target.height,
            "render request"
        );

        let transport = |e: reqwest::Error| RenderError::Transport {
            url: url.clone(),
            message: e.to_string(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request.to_json())
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let body = response.text().await.map_err(transport)?;

        if !status.is_success() {
            return Err(RenderError::Status {
                url: url.clone(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}
