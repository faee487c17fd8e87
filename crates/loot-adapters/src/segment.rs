//! Turns mixed inline/list markup into ordered plain-text segments.
//!
//! `<br>` and the end of every `<li>` close the current segment; `<ul>`/`<ol>`
//! only group; `<style>`/`<script>` are dropped; everything else contributes
//! its text.

use loot_core::sanitize;
use scraper::{ElementRef, Node};

#[derive(Default)]
struct Segmenter {
    buffer: String,
    segments: Vec<String>,
}

impl Segmenter {
    fn flush(&mut self) {
        let value = sanitize(&self.buffer);
        if !value.is_empty() {
            self.segments.push(value);
        }
        self.buffer.clear();
    }

    fn walk(&mut self, element: ElementRef<'_>) {
        for child in element.children() {
            match child.value() {
                Node::Text(text) => self.buffer.push_str(text),
                Node::Element(_) => {
                    if let Some(child) = ElementRef::wrap(child) {
                        self.visit(child);
                    }
                }
                _ => {}
            }
        }
    }

    fn visit(&mut self, element: ElementRef<'_>) {
        match element.value().name() {
            "br" => self.flush(),
            "li" => {
                self.walk(element);
                self.flush();
            }
            "style" | "script" => {}
            _ => self.walk(element),
        }
    }
}

/// Plain-text segments of `element`'s content, in document order.
pub fn segments(element: ElementRef<'_>) -> Vec<String> {
    let mut segmenter = Segmenter::default();
    segmenter.walk(element);
    segmenter.flush();
    segmenter.segments
}

/// [`segments`], with every segment further split on `delimiters`.
pub fn split_segments(element: ElementRef<'_>, delimiters: &[char]) -> Vec<String> {
    segments(element)
        .iter()
        .flat_map(|segment| segment.split(delimiters))
        .map(sanitize)
        .filter(|entry| !entry.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};

    fn cell_segments(fragment: &str) -> Vec<String> {
        let html = Html::parse_fragment(&format!("<table><tr><td>{fragment}</td></tr></table>"));
        let td = Selector::parse("td").unwrap();
        segments(html.select(&td).next().unwrap())
    }

    #[test]
    fn list_items_and_breaks_delimit_segments() {
        assert_eq!(
            cell_segments("<ul><li>A</li><li>B<br>C</li></ul>"),
            vec!["A", "B", "C"]
        );
    }

    #[test]
    fn inline_markup_is_joined_into_one_segment() {
        assert_eq!(
            cell_segments("<a href=\"/wiki/Scrap\">2x</a> <b>Scrap  Metal</b><br>\n 1x Wire"),
            vec!["2x Scrap Metal", "1x Wire"]
        );
    }

    #[test]
    fn style_and_script_are_dropped() {
        assert_eq!(
            cell_segments("<style>.x{color:red}</style>Quest <script>var a;</script>item"),
            vec!["Quest item"]
        );
    }

    #[test]
    fn empty_markup_has_no_segments() {
        assert!(cell_segments("<br><br> \n ").is_empty());
    }

    #[test]
    fn split_segments_applies_inline_delimiters() {
        let html = Html::parse_fragment("<div>Raider caches; Drawers • Lockers<br>Crates</div>");
        let div = Selector::parse("div").unwrap();
        let entries = split_segments(html.select(&div).next().unwrap(), &[';', '•']);
        assert_eq!(entries, vec!["Raider caches", "Drawers", "Lockers", "Crates"]);
    }
}
