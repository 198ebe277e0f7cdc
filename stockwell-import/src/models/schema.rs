//! Schema reconciliation types

use serde::{Deserialize, Serialize};

/// Field type inferred for a requested column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Integer,
    Decimal,
    Date,
    Boolean,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Decimal => "decimal",
            FieldType::Date => "date",
            FieldType::Boolean => "boolean",
        }
    }
}

/// One column of the live target schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaColumn {
    pub name: String,
    pub field_type: FieldType,
}

/// Mandatory decision for a source column with no target field.
///
/// Import cannot proceed while any source column lacks one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum UnmappedDecision {
    /// Drop the column's values entirely
    Ignore,
    /// Preserve values in the generic structured side-field
    StoreInFallback,
    /// Ask for a schema change; tracked in requested_new_columns
    RequestNewColumn,
}

/// Append-only new-column request.
///
/// An entry is never deleted; `approved` flips once on explicit approval and
/// `fallback_used` is set if materialization had to fall back to the side
/// field. No other field changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestedColumn {
    /// Normalized column name proposed for the target schema
    pub name: String,
    /// Column name exactly as it appears in the source file
    pub original_name: String,
    /// Free-text intent supplied by the user
    pub user_intent: String,
    pub inferred_type: FieldType,
    /// Source column the request originated from
    pub source_column: String,
    pub approved: bool,
    /// Set when the column could not be added and values were routed to the
    /// fallback structured field instead; surfaced in the review summary
    pub fallback_used: bool,
}
