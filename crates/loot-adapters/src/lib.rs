//! Wiki markup adapters: text segmentation, field extractors, the listing
//! row parser, the item page enricher and the sources that supply raw pages.

use std::path::PathBuf;

use loot_storage::FetchError;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use scraper::{ElementRef, Selector};
use thiserror::Error;
use url::Url;

pub mod extract;
pub mod image;
pub mod listing;
pub mod markers;
pub mod page;
pub mod segment;
pub mod source;

pub use extract::{find_column, parse_numeric_value, parse_sell_value, tokenize_parts};
pub use listing::{parse_listing, Column, ColumnMap};
pub use page::enrich_page;
pub use segment::{segments, split_segments};
pub use source::{
    parse_embeddedin, FetchedPage, FixtureWikiSource, HttpWikiSource, TemplateMember, WikiSource,
};

pub const CRATE_NAME: &str = "loot-adapters";

/// Characters `encodeURIComponent` leaves alone.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid {what} payload: {source}")]
    Json {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("no wikitable found on listing page {0}")]
    MissingTable(String),
    #[error("invalid url {url}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("reading fixture {}: {source}", .path.display())]
    Fixture {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Addresses of the wiki being scraped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiSite {
    base_url: Url,
    listing_url: Url,
    api_url: Url,
    infobox_template: String,
}

impl WikiSite {
    pub const DEFAULT_BASE_URL: &'static str = "https://arcraiders.wiki";
    pub const DEFAULT_LISTING_PATH: &'static str = "/wiki/Loot";
    pub const DEFAULT_API_PATH: &'static str = "/w/api.php";
    pub const DEFAULT_INFOBOX_TEMPLATE: &'static str = "Template:Infobox_item";

    pub fn new(
        base_url: &str,
        listing_path: &str,
        api_path: &str,
        infobox_template: &str,
    ) -> Result<Self, AdapterError> {
        let parse = |raw: &str| {
            Url::parse(raw).map_err(|source| AdapterError::Url {
                url: raw.to_string(),
                source,
            })
        };
        let base_url = parse(base_url)?;
        let join = |path: &str| {
            base_url.join(path).map_err(|source| AdapterError::Url {
                url: path.to_string(),
                source,
            })
        };
        let listing_url = join(listing_path)?;
        let api_url = join(api_path)?;
        Ok(Self {
            base_url,
            listing_url,
            api_url,
            infobox_template: infobox_template.to_string(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn listing_url(&self) -> &Url {
        &self.listing_url
    }

    pub fn api_url(&self) -> &Url {
        &self.api_url
    }

    pub fn infobox_template(&self) -> &str {
        &self.infobox_template
    }

    fn origin(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Article URL for a page title as returned by the query API.
    pub fn page_url_for_title(&self, title: &str) -> String {
        let slug = title.split_whitespace().collect::<Vec<_>>().join("_");
        format!(
            "{}/wiki/{}",
            self.origin(),
            utf8_percent_encode(&slug, URI_COMPONENT)
        )
    }

    /// Direct file-serving URL for a `File:` page name.
    pub fn file_path_url(&self, file_page: &str) -> String {
        let encoded = utf8_percent_encode(file_page, URI_COMPONENT)
            .to_string()
            .replace("%2F", "/");
        format!("{}/wiki/Special:FilePath/{}", self.origin(), encoded)
    }

    /// Resolves an href found on the listing page to an absolute URL.
    pub fn resolve(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() {
            return None;
        }
        if let Some(rest) = href.strip_prefix("//") {
            return Some(format!("https://{rest}"));
        }
        self.listing_url.join(href).ok().map(String::from)
    }
}

impl Default for WikiSite {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_BASE_URL,
            Self::DEFAULT_LISTING_PATH,
            Self::DEFAULT_API_PATH,
            Self::DEFAULT_INFOBOX_TEMPLATE,
        )
        .expect("default wiki urls are valid")
    }
}

pub(crate) fn selector(css: &'static str) -> Selector {
    Selector::parse(css).expect("static selector is valid")
}

pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    loot_core::sanitize(&element.text().collect::<String>())
}

pub(crate) fn has_class(element: ElementRef<'_>, class: &str) -> bool {
    element
        .value()
        .classes()
        .any(|c| c.eq_ignore_ascii_case(class))
}
