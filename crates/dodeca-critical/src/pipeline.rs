//! One critical CSS run over a build output.

use std::time::Duration;

use dodeca_critical_config::CriticalConfig;
use dodeca_css_diff::{OptimizeOptions, optimize};

use crate::build::{AssetKind, BuildOutput, Classified};
use crate::error::{Error, RewriteError};
use crate::inline::inline_critical;
use crate::renderer::CriticalRenderer;
use crate::rewrite::{Renamed, RewriteOptions, rewrite_assets};
use crate::scheduler::{build_targets, extract_critical};
use crate::server::AssetServer;

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Index document that received the critical CSS, if there was one.
    pub index_html: Option<String>,
    pub targets: usize,
    /// Size of the inlined critical CSS, in bytes.
    pub critical_bytes: usize,
    pub renamed: Vec<Renamed>,
}

/// Critical CSS extraction configured for a build.
#[derive(Debug, Clone)]
pub struct CriticalStyles {
    config: CriticalConfig,
}

impl CriticalStyles {
    pub fn new(config: CriticalConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CriticalConfig {
        &self.config
    }

    /// Extract, inline and split the critical CSS of `build` in place.
    pub async fn run<R>(&self, build: &mut BuildOutput, renderer: &R) -> Result<RunReport, Error>
    where
        R: CriticalRenderer + ?Sized,
    {
        let config = &self.config;

        let excluded = build.chunk_files(&config.exclude_chunks);
        let files = Classified::new(build.assets.keys(), &excluded);

        let Some(index_html) = files.html.first().cloned() else {
            tracing::warn!("no HTML file in build output, skipping critical CSS");
            return Ok(RunReport::default());
        };

        let served: Vec<String> = files.css.iter().chain(&files.other).cloned().collect();
        let server = AssetServer::start(build, &index_html, &served, config).await?;

        if let Some(minutes) = config.stall {
            tracing::info!(
                url = %server.base_url(),
                minutes,
                "stalling before extraction"
            );
            tokio::time::sleep(Duration::from_secs(u64::from(minutes) * 60)).await;
        }

        let result = self
            .extract_and_rewrite(build, renderer, &server, &index_html, &files, &excluded)
            .await;
        server.shutdown().await;

        if let Err(e) = &result {
            tracing::error!(error = %e, "critical CSS extraction failed");
        }
        result
    }

    async fn extract_and_rewrite<R>(
        &self,
        build: &mut BuildOutput,
        renderer: &R,
        server: &AssetServer,
        index_html: &str,
        files: &Classified,
        excluded: &[String],
    ) -> Result<RunReport, Error>
    where
        R: CriticalRenderer + ?Sized,
    {
        let config = &self.config;

        let mut full_css = String::new();
        for path in &files.css {
            let css = build
                .text(path)
                .ok_or_else(|| RewriteError::NotUtf8(path.clone()))?;
            full_css.push_str(css);
        }

        let targets = build_targets(&server.base_url(), &config.urls, &config.dimensions);
        let raw = extract_critical(renderer, &targets, &full_css, &config.render, config.parallel)
            .await?;

        let critical = optimize(
            &raw,
            &OptimizeOptions {
                exclude: config.exclude_patterns()?,
                ignore: config.ignore_options,
                minify: true,
            },
        );

        let ignore: Vec<String> = excluded
            .iter()
            .filter(|file| AssetKind::of(file) == AssetKind::Css)
            .map(|file| format!("{}{}", config.public_path, file))
            .collect();
        let html = build
            .text(index_html)
            .ok_or_else(|| RewriteError::NotUtf8(index_html.to_string()))?;
        let inlined = inline_critical(html, &critical, &ignore);

        let renamed = rewrite_assets(
            build,
            index_html,
            &inlined,
            &files.css,
            &critical,
            &RewriteOptions {
                filename: &config.filename,
                commit: config.commit,
                minify: config.minify,
            },
        )?;

        tracing::info!(
            index = %index_html,
            targets = targets.len(),
            critical_bytes = critical.len(),
            renamed = renamed.len(),
            "critical CSS done"
        );

        Ok(RunReport {
            index_html: Some(index_html.to_string()),
            targets: targets.len(),
            critical_bytes: critical.len(),
            renamed,
        })
    }
}
