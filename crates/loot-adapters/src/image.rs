//! Image URL resolution shared by the listing parser and the page enricher.

use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use scraper::ElementRef;

use crate::markers::IMAGE_SOURCE_ATTRIBUTES;
use crate::WikiSite;

static FILE_PAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)/wiki/(File:.+)$").expect("file page pattern"));

fn attribute_candidate<'a>(img: ElementRef<'a>, attribute: &str) -> Option<&'a str> {
    let raw = img.value().attr(attribute)?;
    let value = if attribute.ends_with("srcset") {
        raw.split_whitespace().next()?
    } else {
        raw.trim()
    };
    let usable = !value.is_empty()
        && value != "none"
        && !value.starts_with("data:");
    usable.then_some(value)
}

/// Best available source of an `<img>`, made absolute against the listing page.
pub fn resolve_image_href(img: ElementRef<'_>, site: &WikiSite) -> Option<String> {
    IMAGE_SOURCE_ATTRIBUTES
        .iter()
        .find_map(|attribute| attribute_candidate(img, attribute))
        .and_then(|source| site.resolve(source))
}

/// Rewrites a `/wiki/File:...` description link into a direct file URL.
pub fn file_link_url(href: &str, site: &WikiSite) -> Option<String> {
    let caps = FILE_PAGE.captures(href.trim())?;
    let file_page = percent_decode_str(&caps[1]).decode_utf8_lossy();
    Some(site.file_path_url(&file_page))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::{Html, Selector};

    fn first_img(html: &str) -> Option<String> {
        let doc = Html::parse_fragment(html);
        let img = Selector::parse("img").unwrap();
        resolve_image_href(doc.select(&img).next().unwrap(), &WikiSite::default())
    }

    #[test]
    fn lazy_attributes_win_over_src() {
        assert_eq!(
            first_img(r#"<img src="data:image/gif;base64,AAAA" data-src="/images/a/Widget.png">"#)
                .as_deref(),
            Some("https://arcraiders.wiki/images/a/Widget.png")
        );
        assert_eq!(
            first_img(r#"<img src="/x.png" data-srcset="//cdn.example/w.png 1x, //cdn.example/w2.png 2x">"#)
                .as_deref(),
            Some("https://cdn.example/w.png")
        );
    }

    #[test]
    fn placeholder_values_are_skipped() {
        assert_eq!(
            first_img(r#"<img data-src="none" src="https://site/img/Gear.png">"#).as_deref(),
            Some("https://site/img/Gear.png")
        );
        assert_eq!(first_img(r#"<img alt="nothing">"#), None);
    }

    #[test]
    fn file_description_links_become_file_path_urls() {
        let site = WikiSite::default();
        assert_eq!(
            file_link_url("/wiki/File:Rusted_Gear.png", &site).as_deref(),
            Some("https://arcraiders.wiki/wiki/Special:FilePath/File%3ARusted_Gear.png")
        );
        assert_eq!(file_link_url("/wiki/Rusted_Gear", &site), None);
    }
}
