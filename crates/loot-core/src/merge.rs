//! Per-field precedence used when a listing row is combined with the record
//! scraped from the item's own page.

use std::collections::HashSet;

use crate::LootRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
    /// Secondary value is used only when the primary one is empty or zero.
    FillIfAbsent,
    /// Secondary value replaces the primary one whenever it is non-empty.
    OverwriteIfNonEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordField {
    Name,
    Description,
    Rarity,
    Category,
    Value,
    Weight,
    StackSize,
    Parts,
    Sources,
    CanBeFoundIn,
    KeepForQuestsWorkshop,
    Image,
}

pub const MERGE_RULES: &[(RecordField, MergeRule)] = &[
    (RecordField::Name, MergeRule::FillIfAbsent),
    (RecordField::Description, MergeRule::FillIfAbsent),
    (RecordField::Rarity, MergeRule::FillIfAbsent),
    (RecordField::Category, MergeRule::FillIfAbsent),
    (RecordField::Value, MergeRule::FillIfAbsent),
    (RecordField::Weight, MergeRule::FillIfAbsent),
    (RecordField::StackSize, MergeRule::FillIfAbsent),
    (RecordField::Parts, MergeRule::FillIfAbsent),
    (RecordField::Sources, MergeRule::OverwriteIfNonEmpty),
    (RecordField::CanBeFoundIn, MergeRule::OverwriteIfNonEmpty),
    (RecordField::KeepForQuestsWorkshop, MergeRule::FillIfAbsent),
    (RecordField::Image, MergeRule::FillIfAbsent),
];

trait Presence {
    fn is_present(&self) -> bool;
}

impl Presence for String {
    fn is_present(&self) -> bool {
        !self.trim().is_empty()
    }
}

impl Presence for u64 {
    fn is_present(&self) -> bool {
        *self != 0
    }
}

impl Presence for Option<String> {
    fn is_present(&self) -> bool {
        self.as_ref().is_some_and(|s| s.is_present())
    }
}

impl<T> Presence for Vec<T> {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

fn merge_value<T: Presence + Default>(rule: MergeRule, primary: &mut T, secondary: &mut T) {
    if !secondary.is_present() {
        return;
    }
    let replace = match rule {
        MergeRule::FillIfAbsent => !primary.is_present(),
        MergeRule::OverwriteIfNonEmpty => true,
    };
    if replace {
        *primary = std::mem::take(secondary);
    }
}

/// Folds `secondary` into `primary` following [`MERGE_RULES`].
pub fn merge_page_details(primary: &mut LootRecord, mut secondary: LootRecord) {
    for &(field, rule) in MERGE_RULES {
        match field {
            RecordField::Name => merge_value(rule, &mut primary.name, &mut secondary.name),
            RecordField::Description => {
                merge_value(rule, &mut primary.description, &mut secondary.description)
            }
            RecordField::Rarity => merge_value(rule, &mut primary.rarity, &mut secondary.rarity),
            RecordField::Category => {
                merge_value(rule, &mut primary.category, &mut secondary.category)
            }
            RecordField::Value => merge_value(rule, &mut primary.value, &mut secondary.value),
            RecordField::Weight => merge_value(rule, &mut primary.weight, &mut secondary.weight),
            RecordField::StackSize => {
                merge_value(rule, &mut primary.stack_size, &mut secondary.stack_size)
            }
            RecordField::Parts => merge_value(rule, &mut primary.parts, &mut secondary.parts),
            RecordField::Sources => merge_value(rule, &mut primary.sources, &mut secondary.sources),
            RecordField::CanBeFoundIn => merge_value(
                rule,
                &mut primary.can_be_found_in,
                &mut secondary.can_be_found_in,
            ),
            RecordField::KeepForQuestsWorkshop => merge_value(
                rule,
                &mut primary.keep_for_quests_workshop,
                &mut secondary.keep_for_quests_workshop,
            ),
            RecordField::Image => merge_value(rule, &mut primary.image, &mut secondary.image),
        }
    }
}

/// Order-preserving union of two entry lists without duplicates.
pub fn union_dedup(first: Vec<String>, second: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    first
        .into_iter()
        .chain(second)
        .filter(|entry| seen.insert(entry.clone()))
        .collect()
}
