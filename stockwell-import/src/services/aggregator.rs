//! Aggregation engine
//!
//! Collapses duplicate-key source rows into unique-key rows when the target
//! schema needs a quantity but the source only carries per-unit identifiers
//! (e.g. serial numbers). Quantity is the count of distinct sub-identifiers
//! per business key.

use std::collections::BTreeMap;

use crate::error::{ImportError, Result};
use crate::models::{AggregatedRow, SourceRow};

/// Result of aggregating one batch of source rows
#[derive(Debug, Clone)]
pub struct AggregationOutcome {
    /// One row per business key; uniqueness is guaranteed
    pub rows: Vec<AggregatedRow>,
    /// Anomalies that did not stop aggregation (e.g. duplicate serials
    /// within a group); never silently dropped
    pub warnings: Vec<String>,
}

/// Whether aggregation should run at all
///
/// Trigger: the target schema requires a quantity value, no quantity column
/// was mapped, and the source provides a per-unit identifier column.
pub fn should_aggregate(
    schema_requires_quantity: bool,
    quantity_column_mapped: bool,
    sub_identifier_mapped: bool,
) -> bool {
    schema_requires_quantity && !quantity_column_mapped && sub_identifier_mapped
}

/// Group rows by business key and count distinct sub-identifiers
///
/// A sub-identifier appearing under two different business keys is a
/// validation error surfaced to the caller, not resolved here.
pub fn aggregate(
    rows: &[SourceRow],
    key_column: &str,
    sub_id_column: &str,
) -> Result<AggregationOutcome> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    // sub-identifier → business key it was first seen under
    let mut seen_subs: BTreeMap<String, String> = BTreeMap::new();
    let mut warnings = Vec::new();

    for row in rows {
        let key = row.values.get(key_column).ok_or_else(|| {
            ImportError::Validation(format!(
                "Row {} is missing business key column '{}'",
                row.row_ref, key_column
            ))
        })?;
        let sub_id = row.values.get(sub_id_column).ok_or_else(|| {
            ImportError::Validation(format!(
                "Row {} is missing sub-identifier column '{}'",
                row.row_ref, sub_id_column
            ))
        })?;

        if let Some(owner) = seen_subs.get(sub_id) {
            if owner != key {
                return Err(ImportError::Validation(format!(
                    "Sub-identifier '{}' appears under both '{}' and '{}'",
                    sub_id, owner, key
                )));
            }
        } else {
            seen_subs.insert(sub_id.clone(), key.clone());
        }

        let group = groups.entry(key.clone()).or_default();
        if group.contains(sub_id) {
            // Duplicate within a group is an anomaly: flagged, not silently
            // deduplicated away
            warnings.push(format!(
                "Duplicate sub-identifier '{}' for key '{}' (row {})",
                sub_id, key, row.row_ref
            ));
        } else {
            group.push(sub_id.clone());
        }
    }

    let rows = groups
        .into_iter()
        .map(|(key, sub_identifiers)| AggregatedRow {
            key,
            quantity: sub_identifiers.len(),
            sub_identifiers,
        })
        .collect();

    Ok(AggregationOutcome { rows, warnings })
}
