//! Latest-record selection.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::normalize::Record;

/// The most recent qualifying record of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestRecord {
    pub entity_code: String,
    pub year: i32,
    pub case_count: Option<f64>,
}

/// Reduce records to one per entity: the maximum year at or above `min_year`.
///
/// Records with a missing entity or year are dropped. When several records
/// share an entity's maximum year, the first one in input order wins. Output
/// is sorted by entity code.
pub fn select_latest(records: &[Record], min_year: i32) -> Vec<LatestRecord> {
    let mut best: BTreeMap<&str, (i32, Option<f64>)> = BTreeMap::new();

    for record in records {
        let (Some(code), Some(year)) = (record.entity_code.as_deref(), record.year) else {
            continue;
        };
        if year < min_year {
            continue;
        }
        match best.get_mut(code) {
            // Strictly greater: an equal year never displaces the first seen.
            Some(slot) if year > slot.0 => *slot = (year, record.case_count),
            Some(_) => {}
            None => {
                best.insert(code, (year, record.case_count));
            }
        }
    }

    best.into_iter()
        .map(|(code, (year, case_count))| LatestRecord {
            entity_code: code.to_string(),
            year,
            case_count,
        })
        .collect()
}
