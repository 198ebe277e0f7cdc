//! Analysis results returned by the content-understanding service

use serde::{Deserialize, Serialize};

/// Structural summary of an uploaded file
///
/// Set once per analysis round and replaced wholesale on re-analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAnalysis {
    /// Sheets or document sections discovered
    pub sections: Vec<SectionSummary>,

    /// All source column names, in file order
    pub source_columns: Vec<String>,

    /// Total data rows across sections
    pub row_count: usize,

    /// Detected overall file type (e.g. "spreadsheet", "delimited", "scanned")
    pub detected_type: String,

    /// Strategy recommended by the service (e.g. "single_sheet", "multi_section")
    pub recommended_strategy: String,
}

/// One sheet or section within the file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSummary {
    pub name: String,
    pub row_count: usize,
    pub column_count: usize,
}

/// One recognized source column mapped to a target field
///
/// Per-mapping confidence is distinct from the session-level confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub source_column: String,
    pub target_field: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Representative values observed in the column
    pub sample_values: Vec<String>,
}

/// Risk classification for the session-level confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Session-level confidence report from the last analysis round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceReport {
    /// Overall confidence in [0, 1], compared inclusively against the
    /// adaptive threshold
    pub overall: f64,
    pub extraction_quality: f64,
    pub evidence_strength: f64,
    pub historical_match: f64,
    pub risk_level: RiskLevel,
    /// Human-readable factors behind the score
    pub factors: Vec<String>,
    /// Whether the service itself recommends human review
    pub requires_hil: bool,
}

/// Kind of reasoning trace entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceKind {
    Observation,
    Thought,
    Question,
}

/// One entry of the append-only reasoning trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Clarification round the entry was produced in
    pub round: u32,
    pub kind: TraceKind,
    pub content: String,
}
