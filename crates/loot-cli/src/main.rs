use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use loot_core::normalize_name;
use loot_storage::{HttpFetcher, ImageCache, TokenBucketConfig};
use loot_sync::{
    backfill_local_images, download_images, ProgressHook, SyncConfig, SyncPipeline,
};
use tracing::warn;

#[derive(Debug, Parser)]
#[command(name = "loot-cli")]
#[command(about = "Builds the loot catalog from the wiki")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(flatten)]
    fetch: FetchArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch, enrich and write the catalog (default)
    Fetch(FetchArgs),
    /// Download catalog images into the local asset cache
    Images {
        #[arg(long)]
        catalog: Option<PathBuf>,
        #[arg(long)]
        assets_dir: Option<PathBuf>,
    },
    /// Recompute localImage for every record of an existing catalog
    LocalImages {
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
struct FetchArgs {
    /// Catalog file to write
    #[arg(long)]
    output: Option<PathBuf>,

    /// Curated adjustments file
    #[arg(long)]
    adjustments: Option<PathBuf>,

    /// Read pages from a captured fixture directory instead of the network
    #[arg(long, value_name = "DIR")]
    fixtures: Option<PathBuf>,

    /// Item pages fetched at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Skip the infobox template membership query
    #[arg(long)]
    no_discovery: bool,

    /// Minimum spacing between wiki requests, 0 disables pacing
    #[arg(long, value_name = "MS")]
    rate_limit_ms: Option<u64>,

    /// Only build the entry for this item
    #[arg(value_name = "NAME")]
    name: Vec<String>,
}

impl FetchArgs {
    fn apply(&self, config: &mut SyncConfig) {
        if let Some(output) = &self.output {
            config.output_path = output.clone();
        }
        if let Some(adjustments) = &self.adjustments {
            config.adjustments_path = adjustments.clone();
        }
        if let Some(fixtures) = &self.fixtures {
            config.fixtures_dir = Some(fixtures.clone());
        }
        if let Some(concurrency) = self.concurrency {
            config.enrich_concurrency = concurrency.max(1);
        }
        if self.no_discovery {
            config.discovery = false;
        }
        if let Some(ms) = self.rate_limit_ms {
            let burst = config.rate_limit.map_or(1, |bucket| bucket.burst);
            config.rate_limit = TokenBucketConfig::new(burst, Duration::from_millis(ms));
        }
    }

    fn target(&self) -> Option<String> {
        let joined = normalize_name(&self.name.join(" "));
        (!joined.is_empty()).then_some(joined)
    }
}

struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Result<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
                .progress_chars("=> "),
        );
        Ok(Self { bar })
    }
}

impl ProgressHook for BarProgress {
    fn start(&self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn advance(&self, name: &str) {
        self.bar.set_message(name.to_string());
        self.bar.inc(1);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

async fn run_fetch(args: FetchArgs) -> Result<()> {
    let mut config = SyncConfig::from_env();
    args.apply(&mut config);
    let target = args.target();

    let pipeline = SyncPipeline::new(config)?.with_progress(Box::new(BarProgress::new()?));
    let summary = pipeline.run_once(target.as_deref()).await?;
    println!(
        "catalog written: run_id={} records={} path={} sha256={} enriched={} failed={} discovered={} adjustments={}",
        summary.run_id,
        summary.manifest.records,
        summary.manifest.path,
        summary.manifest.sha256,
        summary.enriched,
        summary.enrich_failures,
        summary.discovered,
        summary.adjustments_applied
    );
    Ok(())
}

async fn run_images(catalog: Option<PathBuf>, assets_dir: Option<PathBuf>) -> Result<()> {
    let config = SyncConfig::from_env();
    let catalog = catalog.unwrap_or_else(|| config.output_path.clone());
    let cache = ImageCache::new(assets_dir.unwrap_or_else(|| config.assets_dir.clone()));
    let http = HttpFetcher::new(config.http_client_config())?;

    let report = download_images(&catalog, &cache, &http).await?;
    println!(
        "images: downloaded={} skipped={} failed={}",
        report.downloaded,
        report.skipped,
        report.failures.len()
    );
    if !report.is_success() {
        for failure in &report.failures {
            warn!(url = %failure.url, error = %failure.error, "image not downloaded");
            eprintln!(" - {} ({})", failure.url, failure.error);
        }
        bail!("failed to download {} images", report.failures.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        None => run_fetch(cli.fetch).await?,
        Some(Commands::Fetch(args)) => run_fetch(args).await?,
        Some(Commands::Images {
            catalog,
            assets_dir,
        }) => run_images(catalog, assets_dir).await?,
        Some(Commands::LocalImages { catalog }) => {
            let catalog = catalog.unwrap_or_else(|| SyncConfig::from_env().output_path);
            let changed = backfill_local_images(&catalog).await?;
            println!("localImage backfilled: path={} changed={}", catalog.display(), changed);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_invocation_is_a_fetch_with_name_words() {
        let cli = Cli::try_parse_from(["loot-cli", "Rusted_Gear", "Mk.", "2"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.fetch.target().as_deref(), Some("Rusted Gear Mk. 2"));
    }

    #[test]
    fn fetch_flags_override_config() {
        let cli = Cli::try_parse_from([
            "loot-cli",
            "fetch",
            "--output",
            "out/loot.json",
            "--fixtures",
            "fixtures/arc-raiders-wiki",
            "--concurrency",
            "0",
            "--no-discovery",
            "--rate-limit-ms",
            "250",
        ])
        .unwrap();
        let Some(Commands::Fetch(args)) = cli.command else {
            panic!("expected fetch subcommand");
        };
        let mut config = SyncConfig::default();
        args.apply(&mut config);
        assert_eq!(config.output_path, PathBuf::from("out/loot.json"));
        assert_eq!(config.fixtures_dir, Some(PathBuf::from("fixtures/arc-raiders-wiki")));
        assert_eq!(config.enrich_concurrency, 1);
        assert!(!config.discovery);
        assert_eq!(
            config.rate_limit,
            TokenBucketConfig::new(1, Duration::from_millis(250))
        );
        assert_eq!(args.target(), None);
    }

    #[test]
    fn zero_rate_limit_turns_pacing_off() {
        let cli = Cli::try_parse_from(["loot-cli", "--rate-limit-ms", "0"]).unwrap();
        let mut config = SyncConfig {
            rate_limit: TokenBucketConfig::new(4, Duration::from_millis(100)),
            ..SyncConfig::default()
        };
        cli.fetch.apply(&mut config);
        assert_eq!(config.rate_limit, None);
    }

    #[test]
    fn image_subcommands_parse() {
        let cli = Cli::try_parse_from(["loot-cli", "images", "--assets-dir", "public/x"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Images { catalog: None, assets_dir: Some(_) })
        ));
        let cli = Cli::try_parse_from(["loot-cli", "local-images"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::LocalImages { catalog: None })));
    }
}
