//! Item page enrichment: infobox, Sources and Quest sections, recycling
//! tables and the page image.

use std::collections::HashSet;

use loot_core::{loot_key, normalize_rarity, union_dedup, LootRecord, Part, Rarity};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use crate::extract::{find_column, parse_parts, parse_sell_value};
use crate::image::resolve_image_href;
use crate::listing::{DATA_CELL, HEADER_CELL, ROW, WIKITABLE};
use crate::markers::{
    INFOBOX_DELIMITERS, QUEST_ANCHORS, QUOTE_ROW_CLASSES, RECYCLING_HEADER, SALVAGING_HEADER,
    SOURCES_ANCHORS, TAG_ROW_CLASS, WEIGHT_ROW_CLASS,
};
use crate::segment::{segments, split_segments};
use crate::{element_text, has_class, selector, WikiSite};

static INFOBOX: Lazy<Selector> = Lazy::new(|| selector(".infobox"));
static INFOBOX_TITLE: Lazy<Selector> = Lazy::new(|| selector(".infobox-title"));
static WEIGHT_VALUE: Lazy<Selector> = Lazy::new(|| selector(".template-weight"));
static WITH_ID: Lazy<Selector> = Lazy::new(|| selector("[id]"));
static SECTION: Lazy<Selector> = Lazy::new(|| selector("section"));
static LIST: Lazy<Selector> = Lazy::new(|| selector("ul, ol"));
static LIST_ITEM: Lazy<Selector> = Lazy::new(|| selector("li"));
static OG_IMAGE: Lazy<Selector> = Lazy::new(|| selector(r#"meta[property="og:image"]"#));
static INFOBOX_IMAGE: Lazy<Selector> = Lazy::new(|| selector(".infobox .image img"));
static ANCHOR_IMAGE: Lazy<Selector> = Lazy::new(|| selector("a.image img"));

/// Generic infobox rows a label can populate. Each is filled at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum InfoboxTarget {
    Sources,
    CanBeFoundIn,
    Weight,
    StackSize,
    Value,
}

enum LabelMatch {
    Contains(&'static str),
    Exact(&'static str),
}

impl LabelMatch {
    fn matches(&self, label: &str) -> bool {
        match self {
            LabelMatch::Contains(needle) => label.contains(needle),
            LabelMatch::Exact(expected) => label == *expected,
        }
    }
}

const INFOBOX_LABEL_TARGETS: &[(InfoboxTarget, &[LabelMatch])] = &[
    (InfoboxTarget::Sources, &[LabelMatch::Contains("source")]),
    (
        InfoboxTarget::CanBeFoundIn,
        &[LabelMatch::Contains("can be found in"), LabelMatch::Contains("found in")],
    ),
    (InfoboxTarget::Weight, &[LabelMatch::Contains("weight")]),
    (InfoboxTarget::StackSize, &[LabelMatch::Contains("stack size")]),
    (
        InfoboxTarget::Value,
        &[
            LabelMatch::Contains("sell price"),
            LabelMatch::Contains("sell value"),
            LabelMatch::Exact("value"),
        ],
    ),
];

fn apply_infobox_target(details: &mut LootRecord, target: InfoboxTarget, mut entries: Vec<String>) {
    match target {
        InfoboxTarget::Sources => details.sources = entries,
        InfoboxTarget::CanBeFoundIn => details.can_be_found_in = entries,
        InfoboxTarget::Weight => details.weight = Some(entries.swap_remove(0)),
        InfoboxTarget::StackSize => details.stack_size = Some(entries.swap_remove(0)),
        InfoboxTarget::Value => details.value = parse_sell_value(&entries[0]),
    }
}

fn parse_infobox(document: &Html) -> LootRecord {
    let mut details = LootRecord::default();
    let Some(infobox) = document.select(&INFOBOX).next() else {
        return details;
    };

    if let Some(title) = infobox.select(&INFOBOX_TITLE).next() {
        details.name = element_text(title);
    }

    let mut tags = Vec::new();
    let mut claimed = HashSet::new();

    for row in infobox.select(&ROW) {
        if QUOTE_ROW_CLASSES.iter().any(|class| has_class(row, class)) {
            let quote = element_text(row);
            if !quote.is_empty() && details.description.is_empty() {
                details.description = quote;
            }
            continue;
        }

        if has_class(row, TAG_ROW_CLASS) {
            let tag = element_text(row);
            let rarity = Rarity::detect(&tag).or_else(|| row.value().classes().find_map(Rarity::detect));
            if details.rarity.is_empty() {
                if let Some(rarity) = rarity {
                    details.rarity = rarity.label().to_string();
                }
            }
            if !tag.is_empty() {
                tags.push(tag);
            }
            continue;
        }

        if has_class(row, WEIGHT_ROW_CLASS) {
            if let Some(weight) = row.select(&WEIGHT_VALUE).next().map(element_text) {
                if !weight.is_empty() {
                    details.weight = Some(weight);
                    claimed.insert(InfoboxTarget::Weight);
                }
            }
            continue;
        }

        let (Some(header), Some(value_cell)) =
            (row.select(&HEADER_CELL).next(), row.select(&DATA_CELL).next())
        else {
            continue;
        };
        let label = element_text(header).to_lowercase();
        if label.is_empty() {
            continue;
        }
        let entries = split_segments(value_cell, INFOBOX_DELIMITERS);
        if entries.is_empty() {
            continue;
        }

        let target = INFOBOX_LABEL_TARGETS
            .iter()
            .filter(|(target, _)| !claimed.contains(target))
            .find(|(_, matchers)| matchers.iter().any(|m| m.matches(&label)))
            .map(|(target, _)| *target);
        if let Some(target) = target {
            apply_infobox_target(&mut details, target, entries);
            claimed.insert(target);
        }
    }

    if let Some(category) = tags.into_iter().find(|tag| normalize_rarity(tag).is_empty()) {
        details.category = category;
    }

    details
}

/// First `<section>` following the heading anchor with one of `ids`, looking
/// through later siblings and then through the siblings of each ancestor.
fn find_section_after_anchor<'a>(document: &'a Html, ids: &[&str]) -> Option<ElementRef<'a>> {
    let anchor = document
        .select(&WITH_ID)
        .find(|el| el.value().id().is_some_and(|id| ids.contains(&id)))?;

    let mut cursor = Some(anchor);
    while let Some(current) = cursor {
        for sibling in current.next_siblings().filter_map(ElementRef::wrap) {
            if sibling.value().name() == "section" {
                return Some(sibling);
            }
            if let Some(inner) = sibling.select(&SECTION).next() {
                return Some(inner);
            }
        }
        cursor = current.parent().and_then(ElementRef::wrap);
    }
    None
}

fn parse_sources_section(document: &Html) -> Vec<String> {
    let Some(section) = find_section_after_anchor(document, SOURCES_ANCHORS) else {
        return Vec::new();
    };

    let entries: Vec<String> = section
        .select(&LIST)
        .next()
        .map(|list| {
            list.select(&LIST_ITEM)
                .map(element_text)
                .filter(|entry| !entry.is_empty())
                .collect()
        })
        .unwrap_or_default();
    if !entries.is_empty() {
        return entries;
    }

    let fallback = element_text(section);
    if fallback.is_empty() {
        Vec::new()
    } else {
        vec![fallback]
    }
}

fn parse_quest_section(document: &Html) -> Vec<String> {
    find_section_after_anchor(document, QUEST_ANCHORS)
        .and_then(|section| section.select(&DATA_CELL).next())
        .map(segments)
        .unwrap_or_default()
}

/// Parts from the first recycling/salvaging table row about `subject`.
/// Recycling wins over salvaging when both are filled.
fn parse_recycled_materials(document: &Html, subject: &str) -> Vec<Part> {
    let target = loot_key(subject);

    for table in document.select(&WIKITABLE) {
        let Some(header_row) = table.select(&ROW).next() else {
            continue;
        };
        let headers: Vec<String> = header_row.select(&HEADER_CELL).map(element_text).collect();
        let recycling_idx = find_column(&headers, RECYCLING_HEADER);
        let salvaging_idx = find_column(&headers, SALVAGING_HEADER);
        if recycling_idx.is_none() && salvaging_idx.is_none() {
            continue;
        }

        for row in table.select(&ROW).skip(1) {
            let cells: Vec<ElementRef<'_>> = row.select(&DATA_CELL).collect();
            let Some(first) = cells.first() else {
                continue;
            };
            let row_subject = loot_key(&element_text(*first));
            if !target.is_empty() && !row_subject.is_empty() && row_subject != target {
                continue;
            }

            let column_parts = |idx: Option<usize>| parse_parts(idx.and_then(|i| cells.get(i).copied()));
            let recycling = column_parts(recycling_idx);
            if !recycling.is_empty() {
                return recycling;
            }
            let salvaging = column_parts(salvaging_idx);
            if !salvaging.is_empty() {
                return salvaging;
            }
        }
    }

    Vec::new()
}

fn page_image(document: &Html, site: &WikiSite) -> Option<String> {
    document
        .select(&OG_IMAGE)
        .next()
        .and_then(|meta| meta.value().attr("content"))
        .and_then(|content| site.resolve(content))
        .or_else(|| {
            document
                .select(&INFOBOX_IMAGE)
                .next()
                .and_then(|img| resolve_image_href(img, site))
        })
        .or_else(|| {
            document
                .select(&ANCHOR_IMAGE)
                .next()
                .and_then(|img| resolve_image_href(img, site))
        })
}

/// Secondary record scraped from an item's own page. `item_name` is the
/// subject used for recycling tables when the infobox carries no title.
pub fn enrich_page(html: &str, item_name: &str, site: &WikiSite) -> LootRecord {
    let document = Html::parse_document(html);

    let mut details = parse_infobox(&document);
    let infobox_sources = std::mem::take(&mut details.sources);
    details.sources = union_dedup(infobox_sources, parse_sources_section(&document));
    details.keep_for_quests_workshop = parse_quest_section(&document);

    let subject = if details.name.is_empty() {
        item_name.to_string()
    } else {
        details.name.clone()
    };
    details.parts = parse_recycled_materials(&document, &subject);
    details.image = page_image(&document, site);
    details
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITEM_PAGE: &str = r#"
        <html><head>
          <meta property="og:image" content="https://arcraiders.wiki/images/3/3a/Rusted_Gear.png">
        </head><body>
        <table class="infobox">
          <tr><th class="infobox-title">Rusted Gear</th></tr>
          <tr class="infobox-image"><td><a class="image"><img src="/images/thumb/Rusted_Gear.png"></a></td></tr>
          <tr class="data-quote"><td>A gear that has seen better days.</td></tr>
          <tr class="data-tag rarity-uncommon"><td>Uncommon</td></tr>
          <tr class="data-tag"><td>Topside Material</td></tr>
          <tr class="data-weight"><td><div class="template-weight">0.5</div></td></tr>
          <tr><th>Sources</th><td>Raider caches; Mechanical crates</td></tr>
          <tr><th>Can be found in</th><td>Industrial<br>Mechanical</td></tr>
          <tr><th>Stack Size</th><td>15</td></tr>
          <tr><th>Sell Price</th><td>2,000</td></tr>
          <tr><th>Value</th><td>9,999</td></tr>
        </table>
        <h2><span class="mw-headline" id="Sources">Sources</span></h2>
        <section><ul><li>Mechanical crates</li><li>Rusted machinery</li></ul></section>
        <h2><span class="mw-headline" id="Quests">Quests</span></h2>
        <div><section><table><tr><td>Clearer Skies<br>Gear Bench L2</td></tr></table></section></div>
        <table class="wikitable">
          <tr><th>Item</th><th>Recycling</th><th>Salvaging</th></tr>
          <tr><td>Other Gear</td><td>9x Nothing</td><td></td></tr>
          <tr><td>Rusted Gear</td><td>3x Metal Parts</td><td>1x Metal Parts</td></tr>
        </table>
        </body></html>"#;

    #[test]
    fn infobox_rows_populate_details() {
        let details = enrich_page(ITEM_PAGE, "Rusted Gear", &WikiSite::default());
        assert_eq!(details.name, "Rusted Gear");
        assert_eq!(details.description, "A gear that has seen better days.");
        assert_eq!(details.rarity, "Uncommon");
        assert_eq!(details.category, "Topside Material");
        assert_eq!(details.weight.as_deref(), Some("0.5"));
        assert_eq!(details.stack_size.as_deref(), Some("15"));
        assert_eq!(details.value, 2000);
        assert_eq!(details.can_be_found_in, vec!["Industrial", "Mechanical"]);
    }

    #[test]
    fn infobox_and_section_sources_are_unioned() {
        let details = enrich_page(ITEM_PAGE, "Rusted Gear", &WikiSite::default());
        assert_eq!(
            details.sources,
            vec!["Raider caches", "Mechanical crates", "Rusted machinery"]
        );
    }

    #[test]
    fn quest_section_is_found_through_ancestors() {
        let details = enrich_page(ITEM_PAGE, "Rusted Gear", &WikiSite::default());
        assert_eq!(details.keep_for_quests_workshop, vec!["Clearer Skies", "Gear Bench L2"]);
    }

    #[test]
    fn recycling_row_must_match_the_subject() {
        let details = enrich_page(ITEM_PAGE, "Rusted Gear", &WikiSite::default());
        assert_eq!(details.parts, vec![Part::new(3, "Metal Parts")]);
    }

    #[test]
    fn salvaging_is_used_when_recycling_is_empty() {
        let html = r#"
            <table class="wikitable">
              <tr><th>Item</th><th>Recycling</th><th>Salvaging</th></tr>
              <tr><td>Battery</td><td></td><td>2x Wires</td></tr>
            </table>"#;
        let details = enrich_page(html, "battery", &WikiSite::default());
        assert_eq!(details.parts, vec![Part::new(2, "Wires")]);
    }

    #[test]
    fn og_image_wins_over_infobox_image() {
        let details = enrich_page(ITEM_PAGE, "Rusted Gear", &WikiSite::default());
        assert_eq!(
            details.image.as_deref(),
            Some("https://arcraiders.wiki/images/3/3a/Rusted_Gear.png")
        );

        let without_meta = ITEM_PAGE.replace(r#"property="og:image""#, r#"property="og:title""#);
        let details = enrich_page(&without_meta, "Rusted Gear", &WikiSite::default());
        assert_eq!(
            details.image.as_deref(),
            Some("https://arcraiders.wiki/images/thumb/Rusted_Gear.png")
        );
    }

    #[test]
    fn linked_image_is_the_last_resort() {
        let html = r#"
            <html><body>
            <p>Found in the <a href="/wiki/Stella_Montis">mountains</a>.</p>
            <div class="gallery">
              <a class="image" href="/wiki/File:Stella_Key.png"><img data-src="/images/9/9c/Stella_Key.png" src="data:image/gif;base64,R0lGOD"></a>
            </div>
            </body></html>"#;
        let details = enrich_page(html, "Stella Key", &WikiSite::default());
        assert_eq!(
            details.image.as_deref(),
            Some("https://arcraiders.wiki/images/9/9c/Stella_Key.png")
        );
    }

    #[test]
    fn section_without_list_falls_back_to_text() {
        let html = r#"
            <h2 id="sources">Sources</h2>
            <section><p>Only from   the event vendor.</p></section>"#;
        let details = enrich_page(html, "Token", &WikiSite::default());
        assert_eq!(details.sources, vec!["Only from the event vendor."]);
    }

    #[test]
    fn page_without_markup_enriches_nothing() {
        let details = enrich_page("<html><body><p>Stub</p></body></html>", "Stub", &WikiSite::default());
        assert_eq!(details, LootRecord::default());
    }
}
