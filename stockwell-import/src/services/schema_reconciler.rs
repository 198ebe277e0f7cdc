//! Schema reconciliation
//!
//! Diffs proposed columns against the live schema, tracks per-column
//! decisions for anything unmapped, and materializes approved new columns
//! before the importing stage. A materialization conflict routes values to
//! the generic structured side-field and records that the fallback was used;
//! the fallback is surfaced in the review summary, never silent.

use crate::error::{ImportError, Result};
use crate::models::{FieldType, ImportSession, RequestedColumn, UnmappedDecision};
use crate::services::inventory_client::{EnsureColumnOutcome, StructuredStore};

/// Record the mandatory decision for an unmapped source column
///
/// A `RequestNewColumn` decision appends (or updates the intent of) an entry
/// in `requested_new_columns`; entries are never deleted.
pub fn record_decision(
    session: &mut ImportSession,
    source_column: &str,
    decision: UnmappedDecision,
    user_intent: Option<String>,
    inferred_type: Option<FieldType>,
) -> Result<()> {
    let known = session
        .file_analysis
        .as_ref()
        .map(|a| a.source_columns.iter().any(|c| c == source_column))
        .unwrap_or(false);
    if !known {
        return Err(ImportError::Validation(format!(
            "Unknown source column: '{}'",
            source_column
        )));
    }

    if decision == UnmappedDecision::RequestNewColumn {
        let intent = user_intent.unwrap_or_default();
        let proposed_name = normalize_column_name(source_column);

        match session
            .requested_new_columns
            .iter_mut()
            .find(|c| c.source_column == source_column)
        {
            // Re-stating the request refreshes the intent; approval state
            // and the rest of the entry are untouched
            Some(existing) => {
                if !intent.is_empty() {
                    existing.user_intent = intent;
                }
            }
            None => session.requested_new_columns.push(RequestedColumn {
                name: proposed_name,
                original_name: source_column.to_string(),
                user_intent: intent,
                inferred_type: inferred_type.unwrap_or(FieldType::Text),
                source_column: source_column.to_string(),
                approved: false,
                fallback_used: false,
            }),
        }
    }

    session
        .column_decisions
        .insert(source_column.to_string(), decision);
    session.updated_at = chrono::Utc::now();

    Ok(())
}

/// Flip the approval flag on requested columns by name
///
/// Returns how many entries were newly approved. Unknown names are a
/// validation failure so the user learns which name was wrong.
pub fn approve_columns(session: &mut ImportSession, names: &[String]) -> Result<usize> {
    let mut approved = 0;

    for name in names {
        let entry = session
            .requested_new_columns
            .iter_mut()
            .find(|c| &c.name == name)
            .ok_or_else(|| {
                ImportError::Validation(format!("No requested column named '{}'", name))
            })?;

        if !entry.approved {
            entry.approved = true;
            approved += 1;
        }
    }

    if approved > 0 {
        session.updated_at = chrono::Utc::now();
    }

    Ok(approved)
}

/// Materialize every approved requested column in the live schema
///
/// Called before the importing stage. On a conflict the entry is flagged
/// `fallback_used` and its values will land in the side-field; the returned
/// list names those columns for the review summary.
pub async fn materialize_approved(
    session: &mut ImportSession,
    store: &dyn StructuredStore,
    table: &str,
) -> Result<Vec<String>> {
    let mut fallback_columns = Vec::new();

    for entry in session
        .requested_new_columns
        .iter_mut()
        .filter(|c| c.approved)
    {
        match store
            .ensure_column(table, &entry.name, entry.inferred_type)
            .await?
        {
            EnsureColumnOutcome::Created => {
                tracing::info!(
                    session_id = %session.session_id,
                    column = %entry.name,
                    "New column added to live schema"
                );
            }
            EnsureColumnOutcome::Conflict => {
                tracing::warn!(
                    session_id = %session.session_id,
                    column = %entry.name,
                    "Column conflict; values will be stored in the fallback field"
                );
                entry.fallback_used = true;
                fallback_columns.push(entry.name.clone());
            }
        }
    }

    if !fallback_columns.is_empty() {
        session.updated_at = chrono::Utc::now();
    }

    Ok(fallback_columns)
}

/// Normalize a source column name into a schema-safe identifier
fn normalize_column_name(source: &str) -> String {
    let mut name: String = source
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();

    while name.contains("__") {
        name = name.replace("__", "_");
    }
    name.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileAnalysis, ImportSession};

    fn session_with_columns(columns: &[&str]) -> ImportSession {
        let mut session = ImportSession::new(
            "stock.xlsx".to_string(),
            "uploads/stock".to_string(),
            "application/vnd.ms-excel".to_string(),
        );
        session.file_analysis = Some(FileAnalysis {
            sections: vec![],
            source_columns: columns.iter().map(|c| c.to_string()).collect(),
            row_count: 10,
            detected_type: "spreadsheet".to_string(),
            recommended_strategy: "single_sheet".to_string(),
        });
        session
    }

    #[test]
    fn request_new_column_appends_unapproved_entry() {
        let mut s = session_with_columns(&["Bin Loc"]);

        record_decision(
            &mut s,
            "Bin Loc",
            UnmappedDecision::RequestNewColumn,
            Some("track shelf bins".to_string()),
            Some(FieldType::Text),
        )
        .unwrap();

        assert_eq!(s.requested_new_columns.len(), 1);
        let entry = &s.requested_new_columns[0];
        assert_eq!(entry.name, "bin_loc");
        assert_eq!(entry.original_name, "Bin Loc");
        assert!(!entry.approved);
        assert!(!entry.fallback_used);
        assert_eq!(
            s.column_decisions["Bin Loc"],
            UnmappedDecision::RequestNewColumn
        );
    }

    #[test]
    fn restating_request_updates_intent_not_approval() {
        let mut s = session_with_columns(&["Bin Loc"]);
        record_decision(
            &mut s,
            "Bin Loc",
            UnmappedDecision::RequestNewColumn,
            Some("first intent".to_string()),
            None,
        )
        .unwrap();
        approve_columns(&mut s, &["bin_loc".to_string()]).unwrap();

        record_decision(
            &mut s,
            "Bin Loc",
            UnmappedDecision::RequestNewColumn,
            Some("refined intent".to_string()),
            None,
        )
        .unwrap();

        // Append-only: still one entry, approval preserved
        assert_eq!(s.requested_new_columns.len(), 1);
        assert!(s.requested_new_columns[0].approved);
        assert_eq!(s.requested_new_columns[0].user_intent, "refined intent");
    }

    #[test]
    fn unknown_column_rejected() {
        let mut s = session_with_columns(&["part"]);
        let err = record_decision(&mut s, "ghost", UnmappedDecision::Ignore, None, None)
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn approving_unknown_name_is_validation_error() {
        let mut s = session_with_columns(&["part"]);
        let err = approve_columns(&mut s, &["nonexistent".to_string()]).unwrap_err();
        assert!(matches!(err, ImportError::Validation(_)));
    }

    #[test]
    fn normalizes_awkward_column_names() {
        assert_eq!(normalize_column_name("  Bin / Shelf #2 "), "bin_shelf_2");
        assert_eq!(normalize_column_name("Qty"), "qty");
    }
}
