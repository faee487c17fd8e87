//! Core loot record model, name keys and merge precedence for the loot catalog.

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use url::Url;

mod merge;

pub use merge::{merge_page_details, union_dedup, MergeRule, RecordField, MERGE_RULES};

pub const CRATE_NAME: &str = "loot-core";

/// Closed rarity enumeration used by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    /// Detection order. `uncommon` has to be tested before `common`.
    pub const DETECTION_ORDER: [Rarity; 5] = [
        Rarity::Uncommon,
        Rarity::Common,
        Rarity::Rare,
        Rarity::Epic,
        Rarity::Legendary,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Rarity::Common => "common",
            Rarity::Uncommon => "uncommon",
            Rarity::Rare => "rare",
            Rarity::Epic => "epic",
            Rarity::Legendary => "legendary",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Rarity::Common => "Common",
            Rarity::Uncommon => "Uncommon",
            Rarity::Rare => "Rare",
            Rarity::Epic => "Epic",
            Rarity::Legendary => "Legendary",
        }
    }

    pub fn detect(text: &str) -> Option<Rarity> {
        let lower = text.to_lowercase();
        Self::DETECTION_ORDER
            .into_iter()
            .find(|rarity| lower.contains(rarity.token()))
    }
}

/// Free text to a capitalized rarity label, or empty when nothing matches.
pub fn normalize_rarity(text: &str) -> String {
    Rarity::detect(text)
        .map(|r| r.label().to_string())
        .unwrap_or_default()
}

/// Collapses every whitespace run (newlines included) to one space and trims.
pub fn sanitize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Display form of a wiki title: underscores become spaces.
pub fn normalize_name(text: &str) -> String {
    sanitize(&text.replace('_', " "))
}

/// Deduplication key: normalized name, lowercased.
pub fn loot_key(name: &str) -> String {
    normalize_name(name).to_lowercase()
}

/// Percent-decoded basename of an image URL path, ignoring the query string.
pub fn local_image_name(image: &str) -> Option<String> {
    let url = Url::parse(image).ok()?;
    let base = url
        .path()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    let decoded = percent_decode_str(base).decode_utf8_lossy().into_owned();
    if decoded.is_empty() {
        None
    } else {
        Some(decoded)
    }
}

/// One recycle/salvage yield entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    pub quantity: u32,
    pub name: String,
}

impl Part {
    pub fn new(quantity: u32, name: impl Into<String>) -> Self {
        Self {
            quantity,
            name: name.into(),
        }
    }
}

/// Canonical catalog entry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LootRecord {
    pub name: String,
    #[serde(default)]
    pub rarity: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub value: u64,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_size: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub can_be_found_in: Vec<String>,
    #[serde(default)]
    pub keep_for_quests_workshop: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_image: Option<String>,
    /// Item page location, only meaningful during a run.
    #[serde(skip)]
    pub page_url: Option<String>,
    /// Fields introduced by curated adjustments that have no typed slot.
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl LootRecord {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Record discovered only through template membership.
    pub fn bare(name: impl Into<String>, page_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            page_url: Some(page_url.into()),
            ..Default::default()
        }
    }

    pub fn key(&self) -> String {
        loot_key(&self.name)
    }

    pub fn refresh_local_image(&mut self) {
        self.local_image = self.image.as_deref().and_then(local_image_name);
    }

    /// Prepares the record for persistence.
    pub fn finalize(&mut self) {
        if self.image.as_deref().is_some_and(|s| s.trim().is_empty()) {
            self.image = None;
        }
        self.refresh_local_image();
        self.page_url = None;
        self.extra.remove("pageUrl");
    }

    /// Overwrites every named field with the given value. Leaves the record
    /// untouched when the result does not fit the record shape.
    pub fn apply_replace(&mut self, edits: &Map<String, JsonValue>) -> Result<(), serde_json::Error> {
        let mut value = serde_json::to_value(&*self)?;
        if let JsonValue::Object(fields) = &mut value {
            for (field, edit) in edits {
                fields.insert(field.clone(), edit.clone());
            }
        }
        let mut updated: LootRecord = serde_json::from_value(value)?;
        updated.page_url = self.page_url.clone();
        *self = updated;
        Ok(())
    }
}

/// How a curated adjustment edits its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditType {
    #[default]
    Replace,
    #[serde(other)]
    Unsupported,
}

/// Manually authored override keyed by item name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LootAdjustment {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub edit_type: EditType,
    #[serde(flatten)]
    pub edits: Map<String, JsonValue>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rarity_detection_prefers_whole_tokens() {
        assert_eq!(normalize_rarity("Epic Weapon Part"), "Epic");
        assert_eq!(normalize_rarity("mystery"), "");
        assert_eq!(normalize_rarity("UNCOMMON"), "Uncommon");
        assert_eq!(normalize_rarity("rarity-legendary"), "Legendary");
    }

    #[test]
    fn keys_ignore_case_underscores_and_spacing() {
        assert_eq!(loot_key("Arc_Alloy"), "arc alloy");
        assert_eq!(loot_key("  ARC   alloy\n"), "arc alloy");
        assert_eq!(normalize_name("Rusted_Gear"), "Rusted Gear");
    }

    #[test]
    fn local_image_is_decoded_basename_without_query() {
        assert_eq!(
            local_image_name("https://site/x/y/Sword_Icon.png?rev=2").as_deref(),
            Some("Sword_Icon.png")
        );
        assert_eq!(
            local_image_name("https://site/images/Bob%27s_Gear.png").as_deref(),
            Some("Bob's_Gear.png")
        );
        assert_eq!(local_image_name("not a url"), None);
        assert_eq!(local_image_name("https://site/"), None);
    }

    #[test]
    fn finalize_strips_page_url_and_tracks_image() {
        let mut record = LootRecord::bare("Widget", "https://site/wiki/Widget");
        record.image = Some("https://site/img/Widget.png".into());
        record.local_image = Some("stale.png".into());
        record.finalize();
        assert_eq!(record.page_url, None);
        assert_eq!(record.local_image.as_deref(), Some("Widget.png"));

        record.image = Some("   ".into());
        record.finalize();
        assert_eq!(record.image, None);
        assert_eq!(record.local_image, None);
    }

    #[test]
    fn serialized_shape_keeps_lists_and_drops_page_url() {
        let record = LootRecord::bare("Widget", "https://site/wiki/Widget");
        let value = serde_json::to_value(&record).unwrap();
        let obj = value.as_object().unwrap();
        for key in ["parts", "sources", "canBeFoundIn", "keepForQuestsWorkshop"] {
            assert_eq!(obj.get(key), Some(&json!([])), "{key} should be an empty list");
        }
        assert_eq!(obj.get("value"), Some(&json!(0)));
        assert!(!obj.contains_key("pageUrl"));
        assert!(!obj.contains_key("image"));
        assert!(!obj.contains_key("localImage"));
    }

    #[test]
    fn replace_adjustment_is_idempotent() {
        let adjustment: LootAdjustment = serde_json::from_value(json!({
            "name": "widget",
            "editType": "replace",
            "value": 640,
            "sources": ["Quest reward"],
            "note": "verified in game"
        }))
        .unwrap();
        assert_eq!(adjustment.edit_type, EditType::Replace);

        let mut once = LootRecord::named("Widget");
        once.value = 10;
        once.page_url = Some("https://site/wiki/Widget".into());
        once.apply_replace(&adjustment.edits).unwrap();

        let mut twice = once.clone();
        twice.apply_replace(&adjustment.edits).unwrap();

        assert_eq!(once, twice);
        assert_eq!(once.value, 640);
        assert_eq!(once.sources, vec!["Quest reward".to_string()]);
        assert_eq!(once.extra.get("note"), Some(&json!("verified in game")));
        assert_eq!(once.page_url.as_deref(), Some("https://site/wiki/Widget"));
    }

    #[test]
    fn page_url_from_an_adjustment_is_not_persisted() {
        let adjustment: LootAdjustment = serde_json::from_value(json!({
            "name": "Widget",
            "pageUrl": "https://site/wiki/Widget_(old)",
            "value": 7
        }))
        .unwrap();
        let mut record = LootRecord::bare("Widget", "https://site/wiki/Widget");
        record.apply_replace(&adjustment.edits).unwrap();
        record.finalize();

        assert_eq!(record.value, 7);
        assert_eq!(record.page_url, None);
        let value = serde_json::to_value(&record).unwrap();
        assert!(!value.as_object().unwrap().contains_key("pageUrl"));
    }

    #[test]
    fn mistyped_adjustment_leaves_record_untouched() {
        let mut record = LootRecord::named("Widget");
        record.value = 5;
        let edits = json!({ "value": "lots" });
        assert!(record.apply_replace(edits.as_object().unwrap()).is_err());
        assert_eq!(record.value, 5);
    }

    #[test]
    fn unknown_edit_types_deserialize_as_unsupported() {
        let adjustment: LootAdjustment =
            serde_json::from_value(json!({ "name": "Widget", "editType": "append" })).unwrap();
        assert_eq!(adjustment.edit_type, EditType::Unsupported);

        let defaulted: LootAdjustment = serde_json::from_value(json!({ "name": "Widget" })).unwrap();
        assert_eq!(defaulted.edit_type, EditType::Replace);
    }
}
