//! Listing page tables to candidate records, one per data row.

use loot_core::{normalize_rarity, sanitize, LootRecord};
use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::extract::{find_column, parse_parts, parse_sell_value};
use crate::image::{file_link_url, resolve_image_href};
use crate::markers::NON_ARTICLE_NAMESPACES;
use crate::segment::segments;
use crate::{element_text, selector, AdapterError, WikiSite};

pub(crate) static WIKITABLE: Lazy<Selector> = Lazy::new(|| selector("table.wikitable"));
pub(crate) static ROW: Lazy<Selector> = Lazy::new(|| selector("tr"));
pub(crate) static HEADER_CELL: Lazy<Selector> = Lazy::new(|| selector("th"));
pub(crate) static DATA_CELL: Lazy<Selector> = Lazy::new(|| selector("td"));
static IMG: Lazy<Selector> = Lazy::new(|| selector("img"));
static IMAGE_LINK: Lazy<Selector> = Lazy::new(|| selector("a.image"));
static WIKI_LINK: Lazy<Selector> = Lazy::new(|| selector(r#"a[href*="/wiki/"]"#));

/// Logical listing columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Name,
    Rarity,
    Value,
    Description,
    Parts,
    Category,
    KeepForQuest,
}

/// Header keywords per logical column, in fallback order.
pub const COLUMN_KEYWORDS: &[(Column, &[&str])] = &[
    (Column::Name, &["name", "item"]),
    (Column::Rarity, &["rarity"]),
    (Column::Value, &["sell price", "sell value", "value"]),
    (Column::Description, &["description"]),
    (Column::Parts, &["parts", "recycle"]),
    (Column::Category, &["category"]),
    (Column::KeepForQuest, &["keep for quest"]),
];

/// Header row resolved to candidate cell indices per logical column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    columns: Vec<(Column, Vec<usize>)>,
}

impl ColumnMap {
    pub fn resolve(headers: &[String]) -> Self {
        let columns = COLUMN_KEYWORDS
            .iter()
            .map(|&(column, keywords)| {
                let mut indices = Vec::new();
                for keyword in keywords {
                    if let Some(idx) = find_column(headers, keyword) {
                        if !indices.contains(&idx) {
                            indices.push(idx);
                        }
                    }
                }
                (column, indices)
            })
            .collect();
        Self { columns }
    }

    pub fn candidates(&self, column: Column) -> &[usize] {
        self.columns
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, indices)| indices.as_slice())
            .unwrap_or_default()
    }
}

struct RowCells<'a> {
    cells: Vec<ElementRef<'a>>,
    texts: Vec<String>,
}

impl<'a> RowCells<'a> {
    /// First non-empty text among the column's candidate cells.
    fn text(&self, columns: &ColumnMap, column: Column) -> String {
        columns
            .candidates(column)
            .iter()
            .filter_map(|&idx| self.texts.get(idx))
            .find(|text| !text.is_empty())
            .cloned()
            .unwrap_or_default()
    }

    /// Cell of the first candidate column that exists in this row.
    fn element(&self, columns: &ColumnMap, column: Column) -> Option<ElementRef<'a>> {
        columns
            .candidates(column)
            .iter()
            .find_map(|&idx| self.cells.get(idx).copied())
    }
}

fn is_article_href(href: &str) -> bool {
    let Some((_, title)) = href.split_once("/wiki/") else {
        return false;
    };
    let title = percent_decode_str(title).decode_utf8_lossy();
    match title.split_once(':') {
        Some((namespace, _)) => !NON_ARTICLE_NAMESPACES
            .iter()
            .any(|ns| namespace.trim().eq_ignore_ascii_case(ns)),
        None => !title.is_empty(),
    }
}

/// First link in `row` pointing at an item article.
fn item_page_url(row: ElementRef<'_>, site: &WikiSite) -> Option<String> {
    row.select(&WIKI_LINK)
        .filter_map(|anchor| anchor.value().attr("href"))
        .find(|href| is_article_href(href))
        .and_then(|href| {
            if href.starts_with("http") {
                Some(href.to_string())
            } else {
                site.resolve(href)
            }
        })
}

fn row_image(row: ElementRef<'_>, site: &WikiSite) -> Option<String> {
    row.select(&IMG)
        .next()
        .and_then(|img| resolve_image_href(img, site))
        .or_else(|| {
            row.select(&IMAGE_LINK)
                .next()
                .and_then(|link| link.value().attr("href"))
                .and_then(|href| file_link_url(href, site))
        })
}

/// One candidate record from a data row; `None` for spacer rows and rows
/// without a name.
pub fn parse_row(row: ElementRef<'_>, columns: &ColumnMap, site: &WikiSite) -> Option<LootRecord> {
    let cells: Vec<ElementRef<'_>> = row.select(&DATA_CELL).collect();
    if cells.is_empty() {
        return None;
    }
    let texts = cells.iter().map(|cell| element_text(*cell)).collect();
    let row_cells = RowCells { cells, texts };

    let name = row_cells.text(columns, Column::Name);
    if name.is_empty() {
        return None;
    }

    Some(LootRecord {
        name,
        rarity: normalize_rarity(&row_cells.text(columns, Column::Rarity)),
        category: row_cells
            .element(columns, Column::Category)
            .map(element_text)
            .unwrap_or_default(),
        value: parse_sell_value(&row_cells.text(columns, Column::Value)),
        description: row_cells.text(columns, Column::Description),
        parts: parse_parts(row_cells.element(columns, Column::Parts)),
        keep_for_quests_workshop: row_cells
            .element(columns, Column::KeepForQuest)
            .map(segments)
            .unwrap_or_default(),
        image: row_image(row, site),
        page_url: item_page_url(row, site),
        ..Default::default()
    })
}

/// Every record found in the listing page's wiki tables, in document order.
pub fn parse_listing(html: &str, site: &WikiSite) -> Result<Vec<LootRecord>, AdapterError> {
    let document = Html::parse_document(html);
    let mut tables = document.select(&WIKITABLE).peekable();
    if tables.peek().is_none() {
        return Err(AdapterError::MissingTable(site.listing_url().to_string()));
    }

    let mut records = Vec::new();
    for table in tables {
        let Some(header_row) = table.select(&ROW).next() else {
            continue;
        };
        let headers: Vec<String> = header_row
            .select(&HEADER_CELL)
            .map(|th| sanitize(&th.text().collect::<String>()))
            .collect();
        let columns = ColumnMap::resolve(&headers);
        let before = records.len();
        records.extend(
            table
                .select(&ROW)
                .skip(1)
                .filter_map(|row| parse_row(row, &columns, site)),
        );
        debug!(?headers, rows = records.len() - before, "parsed listing table");
    }
    Ok(records)
}
