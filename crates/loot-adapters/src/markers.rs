//! Wiki template markers. Template drift on the wiki is fixed here.

/// Headings that open the item page's acquisition section.
pub const SOURCES_ANCHORS: &[&str] = &["Sources", "sources"];

/// Headings that open the quest/workshop retention section.
pub const QUEST_ANCHORS: &[&str] = &["Quest", "Quests"];

pub const QUOTE_ROW_CLASSES: &[&str] = &["infobox-quote", "data-quote"];
pub const TAG_ROW_CLASS: &str = "data-tag";
pub const WEIGHT_ROW_CLASS: &str = "data-weight";

pub const RECYCLING_HEADER: &str = "recycling";
pub const SALVAGING_HEADER: &str = "salvaging";

/// Namespaces whose links never point at an item article.
pub const NON_ARTICLE_NAMESPACES: &[&str] = &[
    "file", "image", "special", "category", "template", "help", "user", "talk", "module",
];

/// Image attributes in preference order; lazy-load attributes come first.
pub const IMAGE_SOURCE_ATTRIBUTES: &[&str] = &[
    "data-src",
    "data-srcset",
    "data-lazy-src",
    "data-original",
    "src",
];

/// Delimiters splitting one recycle segment into several parts.
pub const PART_DELIMITERS: &[char] = &['•', '\n', ';', ','];

/// Delimiters splitting one infobox value segment into several entries.
pub const INFOBOX_DELIMITERS: &[char] = &['•', '\n', ';'];
