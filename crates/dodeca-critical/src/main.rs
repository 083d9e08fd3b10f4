//! `ddc-critical`: extract critical CSS for a built site directory.

use camino::Utf8PathBuf;
use clap::Parser;
use color_eyre::eyre::Result;
use dodeca_critical::dist::{load_dist, write_dist};
use dodeca_critical::{CriticalConfig, CriticalStyles, HttpRenderer};

/// Inline the critical CSS of a built site and split it out of its stylesheets.
#[derive(Debug, Parser)]
#[command(name = "ddc-critical", version)]
struct Args {
    /// Build output directory
    #[arg(long, default_value = "dist")]
    dist: Utf8PathBuf,

    /// YAML configuration file
    #[arg(long, default_value = "critical.yaml")]
    config: Utf8PathBuf,

    /// Render service endpoint (penthouse-compatible, JSON over HTTP)
    #[arg(long, env = "DDC_CRITICAL_RENDERER")]
    renderer: String,

    /// Build hash used for `[hash]` in filenames (default: digest of the output)
    #[arg(long)]
    hash: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dodeca_critical=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let config = CriticalConfig::load(&args.config)?;
    let styles = CriticalStyles::new(config)?;
    let renderer = HttpRenderer::new(args.renderer);

    let mut build = load_dist(&args.dist, args.hash)?;
    tracing::info!(dist = %args.dist, assets = build.assets.len(), "loaded build output");

    let report = styles.run(&mut build, &renderer).await?;
    write_dist(&args.dist, &build, &report.renamed)?;

    match &report.index_html {
        Some(index) => {
            tracing::info!(
                %index,
                targets = report.targets,
                critical_bytes = report.critical_bytes,
                "inlined critical CSS"
            );
            for renamed in &report.renamed {
                tracing::info!(old = %renamed.old, new = %renamed.new, "renamed stylesheet");
            }
        }
        None => tracing::warn!("nothing to do"),
    }

    Ok(())
}
