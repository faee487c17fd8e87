//! Catalog-side asset steps: image downloads into the local cache and the
//! `localImage` backfill.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use loot_core::{local_image_name, LootRecord};
use loot_storage::{write_atomically, HttpFetcher, ImageCache};
use serde::Serialize;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct ImageFailure {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImageDownloadReport {
    pub downloaded: usize,
    pub skipped: usize,
    pub failures: Vec<ImageFailure>,
}

impl ImageDownloadReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub async fn read_catalog(path: &Path) -> Result<Vec<LootRecord>> {
    let data = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading catalog {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing catalog {}", path.display()))
}

pub fn render_catalog(records: &[LootRecord]) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(records).context("serializing catalog")?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Unique non-empty image URLs in catalog order.
pub fn unique_image_urls(records: &[LootRecord]) -> Vec<String> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(|record| record.image.as_deref())
        .map(str::trim)
        .filter(|url| !url.is_empty() && seen.insert(*url))
        .map(str::to_string)
        .collect()
}

/// Downloads every catalog image not already cached. Each URL is attempted
/// once through the fetcher's retry policy; failures are collected, not fatal.
pub async fn download_images(
    catalog_path: &Path,
    cache: &ImageCache,
    http: &HttpFetcher,
) -> Result<ImageDownloadReport> {
    let records = read_catalog(catalog_path).await?;
    let urls = unique_image_urls(&records);
    let run_id = Uuid::new_v4();
    info!(%run_id, images = urls.len(), cache = %cache.root().display(), "downloading loot images");

    let mut report = ImageDownloadReport::default();
    for url in urls {
        match download_one(&url, cache, http, run_id).await {
            Ok(true) => report.downloaded += 1,
            Ok(false) => report.skipped += 1,
            Err(err) => {
                warn!(%url, error = %err, "image download failed");
                report.failures.push(ImageFailure {
                    url,
                    error: format!("{err:#}"),
                });
            }
        }
    }

    info!(
        downloaded = report.downloaded,
        skipped = report.skipped,
        failed = report.failures.len(),
        "image download finished"
    );
    Ok(report)
}

/// `Ok(false)` when the file was already cached.
async fn download_one(url: &str, cache: &ImageCache, http: &HttpFetcher, run_id: Uuid) -> Result<bool> {
    let file_name = local_image_name(url).ok_or_else(|| anyhow!("no file name in image url"))?;
    if cache.contains(&file_name).await? {
        info!(%file_name, "image already cached");
        return Ok(false);
    }
    let response = http.fetch_bytes(run_id, url).await?;
    let stored = cache.store_bytes(&file_name, &response.body).await?;
    info!(file_name = %stored.file_name, bytes = stored.byte_size, "downloaded image");
    Ok(!stored.deduplicated)
}

/// Recomputes `localImage` for every record of an existing catalog and
/// rewrites it. Returns how many records changed.
pub async fn backfill_local_images(catalog_path: &Path) -> Result<usize> {
    let mut records = read_catalog(catalog_path).await?;
    let mut changed = 0;
    for record in &mut records {
        let before = record.local_image.clone();
        record.refresh_local_image();
        if record.local_image != before {
            changed += 1;
        }
    }
    write_atomically(catalog_path, &render_catalog(&records)?).await?;
    info!(path = %catalog_path.display(), records = records.len(), changed, "backfilled localImage");
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use loot_storage::HttpClientConfig;

    fn with_image(name: &str, image: Option<&str>) -> LootRecord {
        let mut record = LootRecord::named(name);
        record.image = image.map(str::to_string);
        record
    }

    #[test]
    fn image_urls_are_unique_and_ordered() {
        let records = vec![
            with_image("A", Some("https://site/a.png")),
            with_image("B", None),
            with_image("C", Some("https://site/c.png")),
            with_image("D", Some("https://site/a.png")),
            with_image("E", Some("  ")),
        ];
        assert_eq!(
            unique_image_urls(&records),
            vec!["https://site/a.png", "https://site/c.png"]
        );
    }

    #[tokio::test]
    async fn cached_images_are_skipped_and_bad_urls_reported() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = dir.path().join("loot.json");
        let records = vec![
            with_image("Gear", Some("https://site/img/Gear.png?rev=3")),
            with_image("Broken", Some("https://site/")),
        ];
        std::fs::write(&catalog, render_catalog(&records).unwrap()).unwrap();

        let cache = ImageCache::new(dir.path().join("assets"));
        cache.store_bytes("Gear.png", b"png").await.unwrap();

        let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        let report = download_images(&catalog, &cache, &http).await.unwrap();
        assert_eq!(report.downloaded, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].url, "https://site/");
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn backfill_rewrites_local_image() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = dir.path().join("loot.json");
        let mut stale = with_image("Gear", Some("https://site/img/Gear%20Big.png"));
        stale.local_image = Some("old.png".into());
        let records = vec![stale, with_image("Plain", None)];
        std::fs::write(&catalog, render_catalog(&records).unwrap()).unwrap();

        assert_eq!(backfill_local_images(&catalog).await.unwrap(), 1);
        let reread = read_catalog(&catalog).await.unwrap();
        assert_eq!(reread[0].local_image.as_deref(), Some("Gear Big.png"));
        assert_eq!(reread[1].local_image, None);

        assert_eq!(backfill_local_images(&catalog).await.unwrap(), 0);
    }
}
