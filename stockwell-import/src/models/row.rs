//! Source and aggregated row types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One raw row extracted from the uploaded file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRow {
    /// Position within the source file, for rejection reporting
    pub row_ref: usize,
    /// Source column name → cell value
    pub values: BTreeMap<String, String>,
}

/// One unique-key row produced by the aggregation engine.
///
/// Produced only when the source lacks an explicit quantity column but
/// provides a per-unit identifier column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRow {
    /// Business identifier (e.g. part/catalog code)
    pub key: String,
    /// Count of distinct sub-identifiers observed for the key
    pub quantity: usize,
    /// Full list of sub-identifiers, kept for traceability
    pub sub_identifiers: Vec<String>,
}

/// A row rejected by structured-store validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRow {
    pub row_ref: usize,
    pub reason: String,
}

/// Result of the structured-store write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub created_count: usize,
    pub rejected_rows: Vec<RejectedRow>,
}

/// Final result of executing an import
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub created_count: usize,
    pub rejected_rows: Vec<RejectedRow>,
    /// Warnings gathered during aggregation (e.g. duplicate sub-identifiers)
    pub warnings: Vec<String>,
    /// Requested columns that fell back to the generic side-field
    pub fallback_columns: Vec<String>,
}
