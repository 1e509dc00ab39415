use std::fmt;

use serde::Serialize;

/// Failures that abort a grading call.
#[derive(Debug, thiserror::Error)]
pub enum GradeError {
    #[error("invalid module id {0:?}")]
    InvalidArgument(String),

    #[error("module {0} does not exist")]
    ModuleNotFound(String),

    #[error("data access error: {0}")]
    DataAccess(#[from] sqlx::Error),
}

/// Data-quality findings returned next to the results. None of these stop
/// aggregation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GradeWarning {
    DataInconsistency {
        student_id: String,
        field: String,
        kept: String,
        conflicting: String,
    },
    MissingScore {
        student_id: String,
        component_id: String,
    },
    InvalidMark {
        student_id: String,
        component_id: String,
        mark: f64,
    },
    OrphanedScore {
        student_id: String,
        component_id: String,
    },
    DuplicateRecord {
        student_id: String,
        component_id: String,
        count: usize,
    },
}

impl GradeWarning {
    pub fn student_id(&self) -> &str {
        match self {
            Self::DataInconsistency { student_id, .. }
            | Self::MissingScore { student_id, .. }
            | Self::InvalidMark { student_id, .. }
            | Self::OrphanedScore { student_id, .. }
            | Self::DuplicateRecord { student_id, .. } => student_id,
        }
    }
}

impl fmt::Display for GradeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataInconsistency {
                student_id,
                field,
                kept,
                conflicting,
            } => write!(
                f,
                "{student_id}: conflicting {field} {conflicting:?}, kept {kept:?}"
            ),
            Self::MissingScore {
                student_id,
                component_id,
            } => write!(f, "{student_id}: no mark recorded for {component_id}"),
            Self::InvalidMark {
                student_id,
                component_id,
                mark,
            } => write!(f, "{student_id}: unusable mark {mark} for {component_id}"),
            Self::OrphanedScore {
                student_id,
                component_id,
            } => write!(
                f,
                "{student_id}: score for unknown component {component_id} ignored"
            ),
            Self::DuplicateRecord {
                student_id,
                component_id,
                count,
            } => write!(
                f,
                "{student_id}: {count} records for {component_id}, kept one"
            ),
        }
    }
}
