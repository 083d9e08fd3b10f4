//! Critical CSS extraction for built sites.
//!
//! Given a build output (HTML, stylesheets and everything else they
//! reference), [`CriticalStyles::run`]:
//!
//! - serves the build on a local port ([`server`]);
//! - asks a [`CriticalRenderer`] for the critical CSS of every configured
//!   url at every configured viewport, a few at a time ([`scheduler`]);
//! - filters and deduplicates the result ([`dodeca_css_diff::optimize`]);
//! - inlines it into the index document ([`inline`]);
//! - removes it from the stylesheets, renames them and patches the
//!   references ([`rewrite`]).

pub mod build;
pub mod dist;
pub mod error;
pub mod filename;
pub mod inline;
pub mod minify;
pub mod pipeline;
pub mod renderer;
pub mod rewrite;
pub mod scheduler;
pub mod server;

pub use build::{BuildOutput, Chunk, ChunkId};
pub use dodeca_critical_config::CriticalConfig;
pub use error::{DistError, Error, MinifyError, RenderError, RewriteError, ServerError};
pub use pipeline::{CriticalStyles, RunReport};
pub use renderer::{CriticalRenderer, HttpRenderer, RenderRequest, RenderTarget};
pub use rewrite::Renamed;
pub use server::AssetServer;
