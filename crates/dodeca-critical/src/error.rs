//! Error types for critical CSS extraction.

use camino::Utf8PathBuf;
use dodeca_critical_config::ConfigError;

/// A render call failed.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The request never got a response.
    #[error("render request for {url} failed: {message}")]
    Transport { url: String, message: String },

    /// The render service answered with a non-success status.
    #[error("render service returned {status} for {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// The renderer reported a failure of its own.
    #[error("rendering {url} failed: {message}")]
    Failed { url: String, message: String },
}

/// The asset rewrite could not be planned. Nothing was committed.
#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    /// A managed stylesheet is not listed in any chunk.
    #[error("no chunk owns {0}")]
    MissingChunk(String),

    /// A path the rewrite relies on is not in the build output.
    #[error("asset not found: {0}")]
    MissingAsset(String),

    /// The filename template has a token that cannot be filled in.
    #[error("unresolved token [{token}] in filename for {path}")]
    UnresolvedToken { token: String, path: String },

    /// The minifier rejected the remaining stylesheet.
    #[error("failed to minify {path}")]
    Minify {
        path: String,
        #[source]
        source: MinifyError,
    },

    /// The old stylesheet paths could not be compiled into one pattern.
    #[error("failed to build the stylesheet path pattern")]
    PathPattern(#[from] regex::Error),

    /// Two stylesheets would end up at the same path, or one would
    /// overwrite an unrelated asset.
    #[error("{new} (from {old}) collides with {existing}")]
    PathCollision {
        old: String,
        new: String,
        existing: String,
    },

    /// An HTML or CSS asset is not valid UTF-8.
    #[error("{0} is not valid UTF-8")]
    NotUtf8(String),
}

/// lightningcss rejected a stylesheet.
#[derive(Debug, thiserror::Error)]
pub enum MinifyError {
    /// Parse errors borrow the input, so only their message is kept.
    #[error("failed to parse CSS: {0}")]
    Parse(String),

    #[error("failed to serialize CSS")]
    Print(#[source] lightningcss::error::PrinterError),
}

/// A dist directory could not be loaded or written back.
#[derive(Debug, thiserror::Error)]
pub enum DistError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to walk the dist directory")]
    Walk(#[from] ignore::Error),

    #[error("non UTF-8 path in dist: {}", .0.display())]
    NonUtf8Path(std::path::PathBuf),

    #[error("{path} is outside {dir}")]
    OutsideDist { path: Utf8PathBuf, dir: Utf8PathBuf },

    /// `chunks.json` could not be parsed or serialized.
    #[error("invalid chunk manifest {path}")]
    Manifest {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The local asset server could not be started.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind asset server: {0}")]
    Bind(#[source] std::io::Error),

    #[error("invalid proxy upstream for {prefix}: {upstream}")]
    InvalidUpstream { prefix: String, upstream: String },
}

/// Any failure of a critical CSS run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Rewrite(#[from] RewriteError),

    #[error(transparent)]
    Server(#[from] ServerError),
}
