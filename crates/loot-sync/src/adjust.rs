//! Curated adjustments applied after enrichment.

use std::collections::HashMap;
use std::path::Path;

use loot_core::{loot_key, EditType, LootAdjustment, LootRecord};
use serde_json::Value as JsonValue;
use tokio::fs;
use tracing::{debug, info, warn};

/// Reads the adjustments file. A missing or unreadable file, or one that is
/// not a JSON array, means no adjustments; malformed entries are skipped.
pub async fn load_adjustments(path: &Path) -> Vec<LootAdjustment> {
    let data = match fs::read_to_string(path).await {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no adjustments file");
            return Vec::new();
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "unable to read adjustments, ignoring");
            return Vec::new();
        }
    };

    let entries: Vec<JsonValue> = match serde_json::from_str(&data) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "adjustments file is not a JSON array, ignoring");
            return Vec::new();
        }
    };

    entries
        .into_iter()
        .enumerate()
        .filter_map(|(idx, entry)| match serde_json::from_value(entry) {
            Ok(adjustment) => Some(adjustment),
            Err(err) => {
                warn!(index = idx, error = %err, "skipping malformed adjustment");
                None
            }
        })
        .collect()
}

/// Applies every `replace` adjustment to the record with the same key.
/// Returns how many adjustments changed a record.
pub fn apply_adjustments(records: &mut [LootRecord], adjustments: &[LootAdjustment]) -> usize {
    let index: HashMap<String, usize> = records
        .iter()
        .enumerate()
        .rev()
        .map(|(idx, record)| (record.key(), idx))
        .collect();

    let mut applied = 0;
    for adjustment in adjustments {
        if adjustment.edit_type != EditType::Replace {
            info!(name = %adjustment.name, "skipping adjustment with unsupported edit type");
            continue;
        }
        let Some(&idx) = index.get(&loot_key(&adjustment.name)) else {
            info!(name = %adjustment.name, "adjustment matches no loot item");
            continue;
        };
        let record = &mut records[idx];
        match record.apply_replace(&adjustment.edits) {
            Ok(()) => {
                info!(name = %record.name, fields = adjustment.edits.len(), "applied adjustment");
                applied += 1;
            }
            Err(err) => {
                warn!(name = %record.name, error = %err, "adjustment does not fit the record, skipped");
            }
        }
    }
    applied
}
