//! Catalog build pipeline: listing, discovery, filtering, enrichment,
//! adjustments and the final atomic catalog write.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use loot_adapters::{
    enrich_page, parse_listing, AdapterError, FixtureWikiSource, HttpWikiSource, WikiSite,
    WikiSource,
};
use loot_core::{loot_key, merge_page_details, normalize_name, LootRecord};
use loot_storage::{write_atomically, HttpClientConfig, TokenBucketConfig};
use serde::Serialize;
use sha2::{Digest, Sha256};
use strsim::jaro_winkler;
use tracing::{debug, info, warn};
use uuid::Uuid;

mod adjust;
mod assets;

pub use adjust::{apply_adjustments, load_adjustments};
pub use assets::{
    backfill_local_images, download_images, read_catalog, render_catalog, unique_image_urls,
    ImageDownloadReport, ImageFailure,
};

pub const CRATE_NAME: &str = "loot-sync";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub base_url: String,
    pub listing_path: String,
    pub api_path: String,
    pub infobox_template: String,
    pub output_path: PathBuf,
    pub adjustments_path: PathBuf,
    pub assets_dir: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub enrich_concurrency: usize,
    /// Read pages from a captured directory instead of the network.
    pub fixtures_dir: Option<PathBuf>,
    pub discovery: bool,
    /// Paces every wiki and image request when set.
    pub rate_limit: Option<TokenBucketConfig>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: WikiSite::DEFAULT_BASE_URL.to_string(),
            listing_path: WikiSite::DEFAULT_LISTING_PATH.to_string(),
            api_path: WikiSite::DEFAULT_API_PATH.to_string(),
            infobox_template: WikiSite::DEFAULT_INFOBOX_TEMPLATE.to_string(),
            output_path: PathBuf::from("data/loot.json"),
            adjustments_path: PathBuf::from("data/loot-adjustments.json"),
            assets_dir: PathBuf::from("public/assets/loot"),
            user_agent: "loot-catalog-bot/0.1".to_string(),
            http_timeout_secs: 20,
            enrich_concurrency: 1,
            fixtures_dir: None,
            discovery: true,
            rate_limit: None,
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `LOOT_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let string = |key: &str, default: String| std::env::var(key).unwrap_or(default);
        let path = |key: &str, default: PathBuf| {
            std::env::var(key).map(PathBuf::from).unwrap_or(default)
        };
        Self {
            base_url: string("LOOT_WIKI_BASE_URL", defaults.base_url),
            listing_path: string("LOOT_LISTING_PATH", defaults.listing_path),
            api_path: string("LOOT_API_PATH", defaults.api_path),
            infobox_template: string("LOOT_INFOBOX_TEMPLATE", defaults.infobox_template),
            output_path: path("LOOT_OUTPUT_PATH", defaults.output_path),
            adjustments_path: path("LOOT_ADJUSTMENTS_PATH", defaults.adjustments_path),
            assets_dir: path("LOOT_ASSETS_DIR", defaults.assets_dir),
            user_agent: string("LOOT_USER_AGENT", defaults.user_agent),
            http_timeout_secs: std::env::var("LOOT_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            enrich_concurrency: std::env::var("LOOT_ENRICH_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.enrich_concurrency),
            fixtures_dir: defaults.fixtures_dir,
            discovery: defaults.discovery,
            rate_limit: rate_limit_from_env().or(defaults.rate_limit),
        }
    }

    pub fn wiki_site(&self) -> Result<WikiSite> {
        WikiSite::new(
            &self.base_url,
            &self.listing_path,
            &self.api_path,
            &self.infobox_template,
        )
        .context("building wiki urls")
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            global_concurrency: self.enrich_concurrency.max(1),
            token_bucket: self.rate_limit,
            ..Default::default()
        }
    }
}

fn rate_limit_from_env() -> Option<TokenBucketConfig> {
    let interval_ms: u64 = std::env::var("LOOT_RATE_LIMIT_INTERVAL_MS").ok()?.parse().ok()?;
    let burst = std::env::var("LOOT_RATE_LIMIT_BURST")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);
    TokenBucketConfig::new(burst, Duration::from_millis(interval_ms))
}

/// Observer for the enrichment loop. Kept apart from the pipeline so the
/// binary can render it however it likes.
pub trait ProgressHook: Send + Sync {
    fn start(&self, total: usize);
    fn advance(&self, name: &str);
    fn finish(&self);
}

#[derive(Default)]
pub struct NoopProgress;

impl ProgressHook for NoopProgress {
    fn start(&self, _total: usize) {}
    fn advance(&self, _name: &str) {}
    fn finish(&self) {}
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogManifest {
    pub records: usize,
    pub path: String,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub listing_rows: usize,
    pub discovered: usize,
    pub enriched: usize,
    pub enrich_failures: usize,
    pub adjustments_applied: usize,
    pub manifest: CatalogManifest,
}

pub struct SyncPipeline {
    config: SyncConfig,
    source: Box<dyn WikiSource>,
    progress: Box<dyn ProgressHook>,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig) -> Result<Self> {
        let site = config.wiki_site()?;
        let source: Box<dyn WikiSource> = match &config.fixtures_dir {
            Some(dir) => Box::new(FixtureWikiSource::new(dir.clone(), site)),
            None => Box::new(
                HttpWikiSource::new(site, config.http_client_config())
                    .context("building http wiki source")?,
            ),
        };
        Ok(Self::with_source(config, source))
    }

    pub fn with_source(config: SyncConfig, source: Box<dyn WikiSource>) -> Self {
        Self {
            config,
            source,
            progress: Box::<NoopProgress>::default(),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn ProgressHook>) -> Self {
        self.progress = progress;
        self
    }

    /// One full catalog build. With `target`, only the record whose key
    /// matches it is enriched and written.
    pub async fn run_once(&self, target: Option<&str>) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let site = self.source.site();

        let listing = self
            .source
            .fetch_listing(run_id)
            .await
            .context("fetching loot listing")?;
        let rows = parse_listing(&listing.body, site)
            .with_context(|| format!("parsing loot listing {}", listing.url))?;
        if rows.is_empty() {
            bail!("no loot rows were parsed from {}", listing.url);
        }
        let listing_rows = rows.len();
        let mut records = dedup_listing_rows(rows);
        info!(%run_id, listing_rows, records = records.len(), "parsed loot listing");

        let discovered = if self.config.discovery {
            self.discover(run_id, &mut records).await
        } else {
            0
        };

        if let Some(target) = target {
            records = filter_to_target(records, target)?;
            info!(name = %records[0].name, "filtered to requested item");
        }

        let (enriched, enrich_failures) = self.enrich_all(run_id, &mut records).await;

        let adjustments = load_adjustments(&self.config.adjustments_path).await;
        let adjustments_applied = apply_adjustments(&mut records, &adjustments);

        for record in &mut records {
            record.finalize();
        }

        let manifest = write_catalog(&self.config.output_path, &records).await?;
        info!(
            %run_id,
            records = manifest.records,
            path = %manifest.path,
            sha256 = %manifest.sha256,
            "wrote loot catalog"
        );

        Ok(SyncRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            listing_rows,
            discovered,
            enriched,
            enrich_failures,
            adjustments_applied,
            manifest,
        })
    }

    /// Appends a bare record for every infobox page the listing lacks.
    async fn discover(&self, run_id: Uuid, records: &mut Vec<LootRecord>) -> usize {
        let members = match self.source.fetch_template_members(run_id).await {
            Ok(members) => members,
            Err(err) => {
                warn!(%run_id, error = %err, "template membership query failed, skipping discovery");
                return 0;
            }
        };
        info!(pages = members.len(), "discovered infobox item pages");

        let mut known: HashSet<String> = records.iter().map(LootRecord::key).collect();
        let before = records.len();
        for member in members {
            if known.insert(loot_key(&member.title)) {
                records.push(LootRecord::bare(normalize_name(&member.title), member.page_url));
            }
        }
        records.len() - before
    }

    /// Enriches every record that has a page, at most `enrich_concurrency`
    /// pages in flight. Results are merged in record order once all arrived.
    async fn enrich_all(&self, run_id: Uuid, records: &mut [LootRecord]) -> (usize, usize) {
        let site = self.source.site();
        let jobs: Vec<(usize, String, String)> = records
            .iter()
            .enumerate()
            .filter_map(|(idx, record)| {
                record
                    .page_url
                    .clone()
                    .map(|url| (idx, record.name.clone(), url))
            })
            .collect();

        self.progress.start(jobs.len());
        let results: Vec<(usize, String, Result<LootRecord, AdapterError>)> =
            stream::iter(jobs)
                .map(|(idx, name, url)| async move {
                    let details = self
                        .source
                        .fetch_page(run_id, &url)
                        .await
                        .map(|page| enrich_page(&page.body, &name, site));
                    self.progress.advance(&name);
                    (idx, name, details)
                })
                .buffered(self.config.enrich_concurrency.max(1))
                .collect()
                .await;
        self.progress.finish();

        let mut enriched = 0;
        let mut failures = 0;
        for (idx, name, details) in results {
            match details {
                Ok(details) => {
                    merge_page_details(&mut records[idx], details);
                    enriched += 1;
                }
                Err(err) => {
                    warn!(%run_id, %name, error = %err, "failed to enrich item page");
                    failures += 1;
                }
            }
        }
        (enriched, failures)
    }
}

/// Keeps the first row per key; later rows only fill its empty fields.
pub fn dedup_listing_rows(rows: Vec<LootRecord>) -> Vec<LootRecord> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut records: Vec<LootRecord> = Vec::with_capacity(rows.len());
    for mut row in rows {
        let key = row.key();
        match positions.get(&key) {
            Some(&idx) => {
                debug!(name = %row.name, "duplicate listing row");
                let first = &mut records[idx];
                if first.page_url.is_none() {
                    first.page_url = row.page_url.take();
                }
                merge_page_details(first, row);
            }
            None => {
                positions.insert(key, records.len());
                records.push(row);
            }
        }
    }
    records
}

/// Restricts `records` to the one whose key matches `target`.
pub fn filter_to_target(records: Vec<LootRecord>, target: &str) -> Result<Vec<LootRecord>> {
    let key = loot_key(target);
    let closest = records
        .iter()
        .map(|record| (jaro_winkler(&key, &record.key()), record.name.clone()))
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, name)| name);

    let matched: Vec<LootRecord> = records.into_iter().filter(|r| r.key() == key).collect();
    if matched.is_empty() {
        match closest {
            Some(closest) => bail!(
                "requested item '{target}' not found on the listing or infobox pages (closest: '{closest}')"
            ),
            None => bail!("requested item '{target}' not found on the listing or infobox pages"),
        }
    }
    Ok(matched)
}

/// Serializes and atomically replaces the catalog file.
pub async fn write_catalog(path: &Path, records: &[LootRecord]) -> Result<CatalogManifest> {
    let bytes = render_catalog(records)?;
    write_atomically(path, &bytes)
        .await
        .with_context(|| format!("writing catalog {}", path.display()))?;
    Ok(manifest_entry(path, records.len(), &bytes))
}

fn manifest_entry(path: &Path, records: usize, bytes: &[u8]) -> CatalogManifest {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    CatalogManifest {
        records,
        path: path.display().to_string(),
        bytes: bytes.len() as u64,
        sha256: hex::encode(hasher.finalize()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loot_core::Part;

    fn row(name: &str) -> LootRecord {
        LootRecord::named(name)
    }

    #[test]
    fn later_listing_rows_only_fill_blanks() {
        let mut first = row("Rusted Gear");
        first.rarity = "Uncommon".into();
        let mut second = row("rusted_gear");
        second.rarity = "Epic".into();
        second.category = "Topside Material".into();
        second.parts = vec![Part::new(2, "Metal Parts")];
        second.page_url = Some("https://site/wiki/Rusted_Gear".into());

        let records = dedup_listing_rows(vec![first, row("Battery"), second]);
        assert_eq!(records.len(), 2);
        let gear = &records[0];
        assert_eq!(gear.name, "Rusted Gear");
        assert_eq!(gear.rarity, "Uncommon");
        assert_eq!(gear.category, "Topside Material");
        assert_eq!(gear.parts, vec![Part::new(2, "Metal Parts")]);
        assert_eq!(gear.page_url.as_deref(), Some("https://site/wiki/Rusted_Gear"));
    }

    #[test]
    fn filter_keeps_exactly_the_named_record() {
        let records = vec![row("Widget"), row("Gadget")];
        let filtered = filter_to_target(records, "widget").unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "Widget");
    }

    #[test]
    fn filter_miss_names_the_closest_item() {
        let records = vec![row("Widget"), row("Gadget")];
        let err = filter_to_target(records, "Widgett").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("'Widgett' not found"));
        assert!(message.contains("closest: 'Widget'"));
    }

    #[test]
    fn rate_limit_reaches_the_http_client() {
        let config = SyncConfig {
            enrich_concurrency: 3,
            rate_limit: TokenBucketConfig::new(2, Duration::from_millis(500)),
            ..SyncConfig::default()
        };
        let http = config.http_client_config();
        assert_eq!(http.global_concurrency, 3);
        assert_eq!(
            http.token_bucket,
            Some(TokenBucketConfig {
                burst: 2,
                refill_every: Duration::from_millis(500),
            })
        );
        assert_eq!(SyncConfig::default().http_client_config().token_bucket, None);
    }

    #[test]
    fn manifest_hashes_the_written_bytes() {
        let manifest = manifest_entry(Path::new("data/loot.json"), 0, b"[]\n");
        assert_eq!(manifest.bytes, 3);
        assert_eq!(manifest.sha256.len(), 64);
        assert_eq!(manifest.path, "data/loot.json");
    }
}
