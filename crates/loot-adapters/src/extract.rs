//! Single-field extractors. All of them are total: missing or malformed input
//! yields the field's empty value.

use loot_core::{sanitize, Part};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::ElementRef;

use crate::markers::PART_DELIMITERS;
use crate::segment::segments;

static NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-+]?\d[\d,]*(?:\.\d+)?").expect("number pattern"));

static QUANTITY_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(\d+)\s*(?:x|×)\s+(.*)$").expect("quantity pattern"));

/// First signed, comma-grouped number in `text`, truncated to an integer.
pub fn parse_numeric_value(text: &str) -> i64 {
    let Some(token) = NUMBER.find(text) else {
        return 0;
    };
    token
        .as_str()
        .replace(',', "")
        .parse::<f64>()
        .map(|v| v.trunc() as i64)
        .unwrap_or(0)
}

/// [`parse_numeric_value`] clamped to the non-negative sell value domain.
pub fn parse_sell_value(text: &str) -> u64 {
    u64::try_from(parse_numeric_value(text)).unwrap_or(0)
}

fn parse_part(token: &str) -> Part {
    QUANTITY_PREFIX
        .captures(token)
        .and_then(|caps| {
            let quantity = caps[1].parse::<u32>().ok().filter(|q| *q > 0)?;
            let name = sanitize(&caps[2]);
            (!name.is_empty()).then(|| Part::new(quantity, name))
        })
        .unwrap_or_else(|| Part::new(1, sanitize(token)))
}

/// `"3x Scrap Metal; 2× Wiring"` style text to quantity/name pairs.
pub fn tokenize_parts(text: &str) -> Vec<Part> {
    text.split(PART_DELIMITERS)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(parse_part)
        .collect()
}

/// Recycle parts held in a table cell, one or more per segment.
pub fn parse_parts(cell: Option<ElementRef<'_>>) -> Vec<Part> {
    let Some(cell) = cell else {
        return Vec::new();
    };
    segments(cell)
        .iter()
        .flat_map(|segment| tokenize_parts(segment))
        .collect()
}

/// Index of the first header containing `keyword`, case-insensitively.
pub fn find_column(headers: &[String], keyword: &str) -> Option<usize> {
    let keyword = keyword.to_lowercase();
    headers
        .iter()
        .position(|header| header.to_lowercase().contains(&keyword))
}
