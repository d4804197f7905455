//! Common data types for panel observations

use std::fmt;

use serde::{Deserialize, Serialize};

/// Hashable, totally ordered identifier for units (integer or string).
///
/// Integers sort before strings; within a variant the natural order applies.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    /// Integer identifier.
    Int(i64),
    /// String identifier.
    Str(String),
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Int(v) => write!(f, "{v}"),
            Id::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Id {
    fn from(v: i64) -> Self {
        Id::Int(v)
    }
}

impl From<i32> for Id {
    fn from(v: i32) -> Self {
        Id::Int(i64::from(v))
    }
}

impl From<&str> for Id {
    fn from(v: &str) -> Self {
        Id::Str(v.to_string())
    }
}

impl From<String> for Id {
    fn from(v: String) -> Self {
        Id::Str(v)
    }
}

/// Treatment-adoption cohort of a unit.
///
/// Adopting cohorts order by adoption period and all sort before `Never`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Cohort {
    /// Unit adopts treatment in the given period and stays treated.
    Adopts(i64),
    /// Never-treated unit (comparison baseline).
    Never,
}

impl Cohort {
    /// Adoption period, `None` for never-treated units.
    pub fn adoption(&self) -> Option<i64> {
        match *self {
            Cohort::Adopts(g) => Some(g),
            Cohort::Never => None,
        }
    }

    /// Event time of period `time` for this cohort.
    ///
    /// `None` for never-treated units and when `time − g` overflows `i64`.
    pub fn relative_time(&self, time: i64) -> Option<i64> {
        self.adoption().and_then(|g| time.checked_sub(g))
    }

    /// Whether the cohort is treated in period `time`.
    pub fn is_treated_at(&self, time: i64) -> bool {
        self.adoption().is_some_and(|g| time >= g)
    }
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cohort::Adopts(g) => write!(f, "{g}"),
            Cohort::Never => f.write_str("never"),
        }
    }
}

/// One row of the input panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Unit identifier.
    pub unit: Id,
    /// Time period.
    pub time: i64,
    /// Outcome value.
    pub outcome: f64,
    /// Treatment indicator for this unit-period.
    pub treated: bool,
    /// Adoption cohort of the unit.
    pub cohort: Cohort,
}

impl Observation {
    /// Create an observation whose treatment indicator follows from the cohort.
    pub fn new(unit: impl Into<Id>, time: i64, outcome: f64, cohort: Cohort) -> Self {
        Self { unit: unit.into(), time, outcome, treated: cohort.is_treated_at(time), cohort }
    }
}
