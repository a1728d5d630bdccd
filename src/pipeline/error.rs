//! Error taxonomy for the fusion and analysis engine.
//!
//! Errors here are local to one feature, model or analysis. They are caught
//! by the component that raised them and turned into a skip with a reason;
//! only I/O failures and a missing fused table (reported through `anyhow`)
//! abort the whole run.

use serde::Serialize;
use thiserror::Error;

/// Failure modes of the analysis components.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// A source identifier could not be mapped to a cross-referenced country.
    #[error("unresolved country identifier '{identifier}' from the {source_name} source")]
    UnresolvedEntity {
        identifier: String,
        source_name: String,
    },

    /// A minimum row/feature/sample precondition is not met.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// A fit failed numerically (zero variance, singular system, non-finite values).
    #[error("degenerate fit on '{column}': {reason}")]
    DegenerateFit { column: String, reason: String },

    /// An optional algorithm is not available in this run.
    #[error("missing dependency: {0}")]
    MissingDependency(String),
}

impl AnalysisError {
    pub fn insufficient(reason: impl Into<String>) -> Self {
        AnalysisError::InsufficientData(reason.into())
    }

    pub fn degenerate(column: impl Into<String>, reason: impl Into<String>) -> Self {
        AnalysisError::DegenerateFit {
            column: column.into(),
            reason: reason.into(),
        }
    }
}

/// Outcome of a coverage-gated analysis.
///
/// Callers must check for `Unavailable` before consuming the result; the
/// reason string is itself a reportable finding.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "lowercase")]
pub enum Analysis<T> {
    Available(T),
    Unavailable { reason: String },
}

impl<T> Analysis<T> {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Analysis::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Analysis::Available(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Analysis::Available(value) => Some(value),
            Analysis::Unavailable { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Analysis::Available(_) => None,
            Analysis::Unavailable { reason } => Some(reason),
        }
    }
}

impl<T> From<Result<T, AnalysisError>> for Analysis<T> {
    fn from(result: Result<T, AnalysisError>) -> Self {
        match result {
            Ok(value) => Analysis::Available(value),
            Err(err) => Analysis::unavailable(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_message() {
        let err = AnalysisError::insufficient("only 3 countries with complete GDP data");
        assert_eq!(
            err.to_string(),
            "insufficient data: only 3 countries with complete GDP data"
        );
    }

    #[test]
    fn test_degenerate_fit_names_column() {
        let err = AnalysisError::degenerate("pollution_co", "zero variance");
        assert!(err.to_string().contains("pollution_co"));
        assert!(err.to_string().contains("zero variance"));
    }

    #[test]
    fn test_result_converts_to_unavailable() {
        let result: Result<u32, AnalysisError> =
            Err(AnalysisError::MissingDependency("community detection".into()));
        let analysis: Analysis<u32> = result.into();
        assert!(!analysis.is_available());
        assert!(analysis.reason().unwrap().contains("community detection"));
    }
}
