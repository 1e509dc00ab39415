use serde::Serialize;

use crate::error::GradeWarning;

/// One score row joined with its component, module and student, as returned
/// by a [`crate::db::RecordFetcher`].
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedRecord {
    pub student_id: String,
    pub student_name: String,
    pub component_id: String,
    pub category: String,
    /// `None` when the score points at a component the provider could not
    /// resolve.
    pub weight: Option<f64>,
    pub module_title: String,
    pub mark: Option<f64>,
    /// Monotonic arrival token, when the provider has one.
    pub sequence: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradedComponent {
    pub component_id: String,
    pub category: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleInfo {
    pub module_id: String,
    pub title: String,
    pub section: Option<String>,
    pub components: Vec<GradedComponent>,
}

impl ModuleInfo {
    pub fn total_weight(&self) -> f64 {
        self.components.iter().map(|c| c.weight).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentResult {
    pub student_id: String,
    pub student_name: String,
    pub module_title: String,
    /// Weighted percentage rounded half-to-even to two places. `None` until at
    /// least one component carries a usable mark.
    pub total_score: Option<f64>,
    /// Sum of the weights that actually contributed to `total_score`.
    pub scored_weight: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GradeReport {
    pub results: Vec<StudentResult>,
    pub warnings: Vec<GradeWarning>,
}

#[derive(Debug, Clone)]
pub struct ModuleGrades {
    pub module: ModuleInfo,
    pub records: Vec<FetchedRecord>,
    pub report: GradeReport,
}

#[derive(Debug, Clone)]
pub struct CategorySummary {
    pub category: String,
    pub component_count: usize,
    pub scored_count: usize,
    pub avg_mark: Option<f64>,
}
