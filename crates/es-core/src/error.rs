//! Error types for the event-study engine

use thiserror::Error;

use crate::types::{Cohort, Id};

/// Structural problem found while indexing a panel.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PanelIssue {
    /// No observations at all.
    #[error("panel has no observations")]
    Empty,

    /// The same (unit, time) pair appears more than once.
    #[error("duplicate observation for unit {unit} at time {time}")]
    DuplicateObservation {
        /// Offending unit.
        unit: Id,
        /// Offending period.
        time: i64,
    },

    /// A unit is assigned to different cohorts across periods.
    #[error("unit {unit} changes cohort from {first} to {second}")]
    CohortChanged {
        /// Offending unit.
        unit: Id,
        /// Cohort seen first.
        first: Cohort,
        /// Conflicting cohort.
        second: Cohort,
    },

    /// Treatment switches off after having switched on.
    #[error("unit {unit} leaves treatment at time {time}; adoption must be absorbing")]
    NonAbsorbingTreatment {
        /// Offending unit.
        unit: Id,
        /// First untreated period after adoption.
        time: i64,
    },

    /// The treatment indicator disagrees with the unit's cohort.
    #[error("treatment indicator of unit {unit} at time {time} contradicts its cohort")]
    TreatmentMismatch {
        /// Offending unit.
        unit: Id,
        /// Offending period.
        time: i64,
    },

    /// Relative time `time − cohort` does not fit in an `i64`.
    #[error("relative time of unit {unit} at time {time} overflows for cohort {cohort}")]
    RelativeTimeOverflow {
        /// Offending unit.
        unit: Id,
        /// Offending period.
        time: i64,
        /// Adoption period of the unit.
        cohort: i64,
    },

    /// Outcome is NaN or infinite.
    #[error("non-finite outcome for unit {unit} at time {time}")]
    NonFiniteOutcome {
        /// Offending unit.
        unit: Id,
        /// Offending period.
        time: i64,
    },
}

/// Event-study error type
#[derive(Error, Debug)]
pub enum Error {
    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// Malformed or contradictory panel structure
    #[error("Invalid panel: {0}")]
    InvalidPanel(#[from] PanelIssue),

    /// No saturated column survived the exclusions
    #[error(
        "Empty design: no (cohort, relative time) cells remain across {n_cohorts} cohort(s) \
         with reference period {reference_period}"
    )]
    EmptyDesign {
        /// Number of adopting cohorts in the panel.
        n_cohorts: usize,
        /// Reference relative time that was excluded.
        reference_period: i64,
    },

    /// An aggregation references no estimable column
    #[error("Empty aggregation: no estimable columns contribute to `{aggregation}`")]
    EmptyAggregation {
        /// Aggregation that was requested.
        aggregation: String,
    },

    /// The linear-model fit failed
    #[error("Estimation failed: {reason} (columns {columns:?})")]
    EstimationFailed {
        /// Design column indices implicated in the failure, when known.
        columns: Vec<usize>,
        /// Description of the failure.
        reason: String,
    },

    /// Fewer than two cohorts share any relative time
    #[error(
        "Insufficient cohorts: heterogeneity test needs two cohorts at a common relative time \
         ({relative_times} relative time(s) inspected)"
    )]
    InsufficientCohorts {
        /// Number of relative times inspected.
        relative_times: usize,
    },

    /// Unknown value for an enumerated option
    #[error("Unknown {kind} `{value}`; expected one of {expected}")]
    UnknownOption {
        /// Option family (e.g. "weighting").
        kind: &'static str,
        /// The rejected value.
        value: String,
        /// Accepted spellings.
        expected: &'static str,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panel_issue_converts_into_error() {
        let err: Error =
            PanelIssue::DuplicateObservation { unit: Id::Int(7), time: 3 }.into();
        assert!(matches!(err, Error::InvalidPanel(PanelIssue::DuplicateObservation { .. })));
        assert_eq!(
            err.to_string(),
            "Invalid panel: duplicate observation for unit 7 at time 3"
        );
    }

    #[test]
    fn estimation_failed_lists_columns() {
        let err = Error::EstimationFailed { columns: vec![2, 5], reason: "singular".into() };
        assert_eq!(err.to_string(), "Estimation failed: singular (columns [2, 5])");
    }

    #[test]
    fn unknown_option_message() {
        let err = Error::UnknownOption {
            kind: "weighting",
            value: "cohort".into(),
            expected: "shares, simple",
        };
        assert!(err.to_string().contains("`cohort`"));
    }
}
