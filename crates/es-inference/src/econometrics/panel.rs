//! Panel index: dense unit/time positions and event time per observation.
//!
//! The index validates the staggered-adoption structure up front (unique
//! unit × period rows, one absorbing cohort per unit, treatment indicator
//! consistent with the cohort) so every later stage can assume a clean panel.

use std::collections::{BTreeMap, BTreeSet};

use es_core::{Cohort, Id, Observation, PanelIssue, Result};

/// Validated panel with per-row dense indices and relative time.
#[derive(Debug, Clone)]
pub struct PanelIndex {
    observations: Vec<Observation>,
    unit_index: Vec<usize>,
    time_index: Vec<usize>,
    relative_time: Vec<Option<i64>>,
    units: Vec<Id>,
    times: Vec<i64>,
    cohorts: Vec<i64>,
    n_never_treated_units: usize,
}

impl PanelIndex {
    /// Index a panel whose cohorts are given explicitly.
    ///
    /// # Errors
    ///
    /// [`es_core::Error::InvalidPanel`] for an empty panel, non-finite
    /// outcomes, duplicate (unit, time) rows, a unit whose cohort changes,
    /// a treatment indicator that contradicts the cohort, or a period whose
    /// relative time overflows `i64`.
    pub fn new(observations: Vec<Observation>) -> Result<Self> {
        if observations.is_empty() {
            return Err(PanelIssue::Empty.into());
        }

        let mut unit_cohort: BTreeMap<&Id, Cohort> = BTreeMap::new();
        let mut seen: BTreeSet<(&Id, i64)> = BTreeSet::new();
        let mut times: BTreeSet<i64> = BTreeSet::new();

        for obs in &observations {
            if !obs.outcome.is_finite() {
                return Err(PanelIssue::NonFiniteOutcome { unit: obs.unit.clone(), time: obs.time }
                    .into());
            }
            if !seen.insert((&obs.unit, obs.time)) {
                return Err(PanelIssue::DuplicateObservation {
                    unit: obs.unit.clone(),
                    time: obs.time,
                }
                .into());
            }
            let first = *unit_cohort.entry(&obs.unit).or_insert(obs.cohort);
            if first != obs.cohort {
                return Err(PanelIssue::CohortChanged {
                    unit: obs.unit.clone(),
                    first,
                    second: obs.cohort,
                }
                .into());
            }
            if let Some(g) = obs.cohort.adoption().filter(|&g| obs.time.checked_sub(g).is_none()) {
                return Err(PanelIssue::RelativeTimeOverflow {
                    unit: obs.unit.clone(),
                    time: obs.time,
                    cohort: g,
                }
                .into());
            }
            if obs.treated != obs.cohort.is_treated_at(obs.time) {
                return Err(PanelIssue::TreatmentMismatch { unit: obs.unit.clone(), time: obs.time }
                    .into());
            }
            times.insert(obs.time);
        }

        let units: Vec<Id> = unit_cohort.keys().map(|u| (*u).clone()).collect();
        let cohorts: Vec<i64> = unit_cohort
            .values()
            .filter_map(Cohort::adoption)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let n_never_treated_units =
            unit_cohort.values().filter(|c| matches!(c, Cohort::Never)).count();
        let times: Vec<i64> = times.into_iter().collect();

        let unit_pos: BTreeMap<&Id, usize> =
            unit_cohort.keys().enumerate().map(|(i, u)| (*u, i)).collect();
        let time_pos: BTreeMap<i64, usize> =
            times.iter().enumerate().map(|(i, &t)| (t, i)).collect();

        let unit_index = observations.iter().map(|o| unit_pos[&o.unit]).collect();
        let time_index = observations.iter().map(|o| time_pos[&o.time]).collect();
        let relative_time = observations.iter().map(|o| o.cohort.relative_time(o.time)).collect();

        Ok(Self {
            observations,
            unit_index,
            time_index,
            relative_time,
            units,
            times,
            cohorts,
            n_never_treated_units,
        })
    }

    /// Index a panel, deriving each unit's cohort from its treatment path.
    ///
    /// The cohort is the first period in which `treated` is true; units that
    /// are never treated become [`Cohort::Never`]. Any `cohort` already set on
    /// the observations is overwritten.
    ///
    /// # Errors
    ///
    /// [`PanelIssue::NonAbsorbingTreatment`] when a unit is untreated after
    /// having been treated, plus everything [`PanelIndex::new`] rejects.
    pub fn from_treatment_paths(mut observations: Vec<Observation>) -> Result<Self> {
        let mut paths: BTreeMap<Id, Vec<(i64, bool)>> = BTreeMap::new();
        for obs in &observations {
            paths.entry(obs.unit.clone()).or_default().push((obs.time, obs.treated));
        }

        let mut derived: BTreeMap<Id, Cohort> = BTreeMap::new();
        for (unit, mut path) in paths {
            path.sort_by_key(|&(t, _)| t);
            if let Some(w) = path.windows(2).find(|w| w[0].0 == w[1].0) {
                return Err(PanelIssue::DuplicateObservation { unit, time: w[0].0 }.into());
            }
            let adoption = path.iter().find(|(_, d)| *d).map(|&(t, _)| t);
            if let Some(g) = adoption {
                if let Some(&(t, _)) = path.iter().find(|&&(t, d)| t > g && !d) {
                    return Err(PanelIssue::NonAbsorbingTreatment { unit, time: t }.into());
                }
            }
            derived.insert(unit, adoption.map_or(Cohort::Never, Cohort::Adopts));
        }

        for obs in &mut observations {
            obs.cohort = derived[&obs.unit];
        }
        Self::new(observations)
    }

    /// Number of observations.
    pub fn n_obs(&self) -> usize {
        self.observations.len()
    }

    /// Number of distinct units.
    pub fn n_units(&self) -> usize {
        self.units.len()
    }

    /// Distinct units in ascending order (dense index = position).
    pub fn units(&self) -> &[Id] {
        &self.units
    }

    /// Distinct periods in ascending order (dense index = position).
    pub fn times(&self) -> &[i64] {
        &self.times
    }

    /// Adoption periods of treated cohorts, ascending.
    pub fn cohorts(&self) -> &[i64] {
        &self.cohorts
    }

    /// Number of never-treated units.
    pub fn n_never_treated_units(&self) -> usize {
        self.n_never_treated_units
    }

    /// The validated observations, in input order.
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Dense unit index of every row.
    pub fn unit_index(&self) -> &[usize] {
        &self.unit_index
    }

    /// Dense time index of every row.
    pub fn time_index(&self) -> &[usize] {
        &self.time_index
    }

    /// Relative time of every row (`None` for never-treated units).
    pub fn relative_time(&self) -> &[Option<i64>] {
        &self.relative_time
    }

    /// Outcomes in row order.
    pub fn outcomes(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.outcome).collect()
    }
}
