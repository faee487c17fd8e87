//! Where raw wiki pages come from: the live site over HTTP, or a fixture
//! directory captured from it.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loot_storage::{HttpClientConfig, HttpFetcher};
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::{AdapterError, WikiSite};

/// Upper bound on `eicontinue` round trips for one membership query.
const MAX_CONTINUATIONS: usize = 500;

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

/// Article embedding the item infobox template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateMember {
    pub title: String,
    pub page_url: String,
}

#[async_trait]
pub trait WikiSource: Send + Sync {
    fn site(&self) -> &WikiSite;

    /// `run_id` tags every request made on behalf of one catalog build.
    async fn fetch_listing(&self, run_id: Uuid) -> Result<FetchedPage, AdapterError>;

    async fn fetch_page(&self, run_id: Uuid, url: &str) -> Result<FetchedPage, AdapterError>;

    /// Every main-namespace article embedding the infobox template. Pages
    /// collected before a failing continuation are still returned.
    async fn fetch_template_members(
        &self,
        run_id: Uuid,
    ) -> Result<Vec<TemplateMember>, AdapterError>;
}

#[derive(Debug, Deserialize)]
struct EmbeddedInResponse {
    #[serde(default)]
    query: Option<EmbeddedInQuery>,
    #[serde(default, rename = "continue")]
    continuation: Option<EmbeddedInContinue>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct EmbeddedInQuery {
    #[serde(default)]
    embeddedin: Vec<EmbeddedInPage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddedInPage {
    title: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddedInContinue {
    eicontinue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    info: String,
}

/// Titles from one `list=embeddedin` response plus its continuation token.
pub fn parse_embeddedin(body: &str) -> Result<(Vec<String>, Option<String>), AdapterError> {
    let response: EmbeddedInResponse =
        serde_json::from_str(body).map_err(|source| AdapterError::Json {
            what: "embeddedin",
            source,
        })?;
    if let Some(error) = response.error {
        return Err(AdapterError::Message(format!(
            "query api error {}: {}",
            error.code, error.info
        )));
    }
    let titles = response
        .query
        .map(|q| q.embeddedin.into_iter().map(|page| page.title).collect())
        .unwrap_or_default();
    let next = response
        .continuation
        .and_then(|c| c.eicontinue)
        .filter(|token| !token.is_empty());
    Ok((titles, next))
}

fn members_from_titles(site: &WikiSite, titles: Vec<String>) -> Vec<TemplateMember> {
    titles
        .into_iter()
        .filter(|title| !title.trim().is_empty())
        .map(|title| TemplateMember {
            page_url: site.page_url_for_title(&title),
            title,
        })
        .collect()
}

/// Live wiki over HTTP.
#[derive(Debug)]
pub struct HttpWikiSource {
    http: HttpFetcher,
    site: WikiSite,
}

impl HttpWikiSource {
    pub fn new(site: WikiSite, config: HttpClientConfig) -> Result<Self, AdapterError> {
        Ok(Self {
            http: HttpFetcher::new(config)?,
            site,
        })
    }

    fn embeddedin_url(&self, continuation: Option<&str>) -> Url {
        let mut url = self.site.api_url().clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("action", "query")
                .append_pair("list", "embeddedin")
                .append_pair("eititle", self.site.infobox_template())
                .append_pair("einamespace", "0")
                .append_pair("eilimit", "max")
                .append_pair("format", "json");
            if let Some(token) = continuation {
                query.append_pair("eicontinue", token);
            }
        }
        url
    }

    async fn get_text(&self, run_id: Uuid, url: &str) -> Result<FetchedPage, AdapterError> {
        let response = self.http.fetch_bytes(run_id, url).await?;
        Ok(FetchedPage {
            url: response.final_url.clone(),
            body: response.text(),
            fetched_at: Utc::now(),
        })
    }
}

#[async_trait]
impl WikiSource for HttpWikiSource {
    fn site(&self) -> &WikiSite {
        &self.site
    }

    async fn fetch_listing(&self, run_id: Uuid) -> Result<FetchedPage, AdapterError> {
        let url = self.site.listing_url().to_string();
        info!(%run_id, %url, "fetching loot listing");
        self.get_text(run_id, &url).await
    }

    async fn fetch_page(&self, run_id: Uuid, url: &str) -> Result<FetchedPage, AdapterError> {
        self.get_text(run_id, url).await
    }

    async fn fetch_template_members(
        &self,
        run_id: Uuid,
    ) -> Result<Vec<TemplateMember>, AdapterError> {
        let mut titles = Vec::new();
        let mut seen_tokens = HashSet::new();
        let mut continuation: Option<String> = None;
        let mut batches = 0usize;

        loop {
            let url = self.embeddedin_url(continuation.as_deref());
            let batch = match self.get_text(run_id, url.as_str()).await {
                Ok(page) => parse_embeddedin(&page.body),
                Err(err) => Err(err),
            };
            let (page_titles, next) = match batch {
                Ok(batch) => batch,
                Err(err) if batches > 0 => {
                    warn!(error = %err, collected = titles.len(), "template membership query stopped early");
                    break;
                }
                Err(err) => return Err(err),
            };
            batches += 1;
            debug!(batch = batches, titles = page_titles.len(), "embeddedin batch");
            titles.extend(page_titles);

            match next {
                Some(token) if batches >= MAX_CONTINUATIONS => {
                    warn!(%token, "too many embeddedin continuations, stopping");
                    break;
                }
                Some(token) if !seen_tokens.insert(token.clone()) => {
                    warn!(%token, "repeated embeddedin continuation, stopping");
                    break;
                }
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        Ok(members_from_titles(&self.site, titles))
    }
}

/// Offline source backed by a captured directory:
///
/// ```text
/// <root>/listing.html
/// <root>/pages/<Title_With_Underscores>.html
/// <root>/embeddedin.json      (optional)
/// ```
#[derive(Debug, Clone)]
pub struct FixtureWikiSource {
    root: PathBuf,
    site: WikiSite,
}

impl FixtureWikiSource {
    pub fn new(root: impl Into<PathBuf>, site: WikiSite) -> Self {
        Self {
            root: root.into(),
            site,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read(&self, path: PathBuf, url: String) -> Result<FetchedPage, AdapterError> {
        let body = fs::read_to_string(&path).map_err(|source| AdapterError::Fixture { path, source })?;
        Ok(FetchedPage {
            url,
            body,
            fetched_at: Utc::now(),
        })
    }

    /// Fixture file for an article URL, named after its decoded title.
    fn page_path(&self, url: &str) -> Result<PathBuf, AdapterError> {
        let parsed = Url::parse(url).map_err(|source| AdapterError::Url {
            url: url.to_string(),
            source,
        })?;
        let title = parsed
            .path()
            .split_once("/wiki/")
            .map(|(_, title)| percent_decode_str(title).decode_utf8_lossy().replace(' ', "_"))
            .filter(|title| !title.is_empty() && !title.contains(['/', '\\']))
            .ok_or_else(|| AdapterError::Message(format!("no article title in {url}")))?;
        Ok(self.root.join("pages").join(format!("{title}.html")))
    }
}

#[async_trait]
impl WikiSource for FixtureWikiSource {
    fn site(&self) -> &WikiSite {
        &self.site
    }

    async fn fetch_listing(&self, _run_id: Uuid) -> Result<FetchedPage, AdapterError> {
        self.read(
            self.root.join("listing.html"),
            self.site.listing_url().to_string(),
        )
    }

    async fn fetch_page(&self, _run_id: Uuid, url: &str) -> Result<FetchedPage, AdapterError> {
        let path = self.page_path(url)?;
        self.read(path, url.to_string())
    }

    async fn fetch_template_members(
        &self,
        _run_id: Uuid,
    ) -> Result<Vec<TemplateMember>, AdapterError> {
        let path = self.root.join("embeddedin.json");
        if !path.exists() {
            debug!(root = %self.root.display(), "no embeddedin fixture");
            return Ok(Vec::new());
        }
        let page = self.read(path, self.site.api_url().to_string())?;
        let (titles, _) = parse_embeddedin(&page.body)?;
        Ok(members_from_titles(&self.site, titles))
    }
}
