//! Saturated (cohort × relative-time) event-study design.
//!
//! Every adopting cohort gets its own indicator for each relative time at
//! which it is observed, except the reference relative time. Never-treated
//! units load on no column and, together with the reference cells, form the
//! comparison baseline. Columns are ordered by cohort, then relative time, so
//! coefficient positions are reproducible across runs.
//!
//! # References
//!
//! - Sun & Abraham (2021), "Estimating dynamic treatment effects in event
//!   studies with heterogeneous treatment effects." *Journal of Econometrics*.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use es_core::{Error, Result};
use serde::{Deserialize, Serialize};

use super::panel::PanelIndex;

/// Subset of relative times a computation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventWindow {
    /// Every relative time.
    #[default]
    All,
    /// Leads only (`rel_time < 0`).
    PreOnly,
    /// Lags only (`rel_time ≥ 0`).
    PostOnly,
}

impl EventWindow {
    /// Whether relative time `rel_time` falls in the window.
    pub fn contains(self, rel_time: i64) -> bool {
        match self {
            EventWindow::All => true,
            EventWindow::PreOnly => rel_time < 0,
            EventWindow::PostOnly => rel_time >= 0,
        }
    }
}

impl FromStr for EventWindow {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "all" => Ok(EventWindow::All),
            "pre-only" | "pre" => Ok(EventWindow::PreOnly),
            "post-only" | "post" => Ok(EventWindow::PostOnly),
            _ => Err(Error::UnknownOption {
                kind: "event window",
                value: s.to_string(),
                expected: "all, pre-only, post-only",
            }),
        }
    }
}

impl fmt::Display for EventWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventWindow::All => "all",
            EventWindow::PreOnly => "pre-only",
            EventWindow::PostOnly => "post-only",
        })
    }
}

/// One saturated indicator column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignColumn {
    /// Adoption period of the cohort.
    pub cohort: i64,
    /// Relative time of the cell.
    pub rel_time: i64,
    /// Number of observations in the cell.
    pub n_obs: usize,
}

impl DesignColumn {
    /// Label in `rel_time::{r}:cohort::{g}` form.
    pub fn label(&self) -> String {
        format!("rel_time::{}:cohort::{}", self.rel_time, self.cohort)
    }

    /// Whether the column is a post-treatment cell.
    pub fn is_post(&self) -> bool {
        self.rel_time >= 0
    }
}

/// Unit and time fixed effects plus the clustering variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedEffectsSpec {
    /// Dense unit level per observation.
    pub unit: Vec<usize>,
    /// Dense time level per observation.
    pub time: Vec<usize>,
}

impl FixedEffectsSpec {
    /// FE dimensions in `[unit, time]` order.
    pub fn dimensions(&self) -> Vec<Vec<usize>> {
        vec![self.unit.clone(), self.time.clone()]
    }

    /// Cluster assignment (units).
    pub fn clusters(&self) -> &[usize] {
        &self.unit
    }
}

/// What the builder left out, and why.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignExclusions {
    /// Reference cells `(cohort, n_obs)` observed in the data.
    pub reference_cells: Vec<(i64, usize)>,
    /// Cohorts never observed at the reference relative time.
    pub cohorts_without_reference: Vec<i64>,
    /// Rows of never-treated units (baseline, no column).
    pub never_treated_rows: usize,
}

/// Saturated design with sparse row → column mapping.
#[derive(Debug, Clone)]
pub struct SaturatedDesign {
    reference_period: i64,
    columns: Vec<DesignColumn>,
    lookup: BTreeMap<(i64, i64), usize>,
    row_column: Vec<Option<usize>>,
    fixed_effects: FixedEffectsSpec,
    exclusions: DesignExclusions,
}

impl SaturatedDesign {
    /// Build the design for `panel`, omitting `reference_period`.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyDesign`] when no (cohort, relative time) cell remains.
    pub fn build(panel: &PanelIndex, reference_period: i64) -> Result<Self> {
        let mut cells: BTreeMap<(i64, i64), usize> = BTreeMap::new();
        let mut reference: BTreeMap<i64, usize> = BTreeMap::new();
        let mut never_treated_rows = 0usize;

        for (obs, rel) in panel.observations().iter().zip(panel.relative_time()) {
            match (obs.cohort.adoption(), rel) {
                (Some(g), Some(r)) if *r == reference_period => {
                    *reference.entry(g).or_default() += 1;
                }
                (Some(g), Some(r)) => *cells.entry((g, *r)).or_default() += 1,
                _ => never_treated_rows += 1,
            }
        }

        if cells.is_empty() {
            return Err(Error::EmptyDesign {
                n_cohorts: panel.cohorts().len(),
                reference_period,
            });
        }

        let columns: Vec<DesignColumn> = cells
            .iter()
            .map(|(&(cohort, rel_time), &n_obs)| DesignColumn { cohort, rel_time, n_obs })
            .collect();
        let lookup: BTreeMap<(i64, i64), usize> =
            cells.keys().enumerate().map(|(j, &key)| (key, j)).collect();

        let row_column = panel
            .observations()
            .iter()
            .zip(panel.relative_time())
            .map(|(obs, rel)| match (obs.cohort.adoption(), rel) {
                (Some(g), Some(r)) => lookup.get(&(g, *r)).copied(),
                _ => None,
            })
            .collect();

        let with_columns: BTreeSet<i64> = columns.iter().map(|c| c.cohort).collect();
        let cohorts_without_reference: Vec<i64> =
            with_columns.iter().copied().filter(|g| !reference.contains_key(g)).collect();
        if !cohorts_without_reference.is_empty() {
            log::warn!(
                "cohorts {cohorts_without_reference:?} are never observed at reference period \
                 {reference_period}; their effects are normalized by the fixed effects only"
            );
        }

        Ok(Self {
            reference_period,
            columns,
            lookup,
            row_column,
            fixed_effects: FixedEffectsSpec {
                unit: panel.unit_index().to_vec(),
                time: panel.time_index().to_vec(),
            },
            exclusions: DesignExclusions {
                reference_cells: reference.into_iter().collect(),
                cohorts_without_reference,
                never_treated_rows,
            },
        })
    }

    /// Omitted relative time.
    pub fn reference_period(&self) -> i64 {
        self.reference_period
    }

    /// Columns in (cohort, rel_time) order.
    pub fn columns(&self) -> &[DesignColumn] {
        &self.columns
    }

    /// Number of columns.
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.row_column.len()
    }

    /// Column index of the `(cohort, rel_time)` cell, if it exists.
    pub fn column_of(&self, cohort: i64, rel_time: i64) -> Option<usize> {
        self.lookup.get(&(cohort, rel_time)).copied()
    }

    /// Column activated by each row.
    pub fn row_columns(&self) -> &[Option<usize>] {
        &self.row_column
    }

    /// Fixed effects and clusters for the fitter.
    pub fn fixed_effects(&self) -> &FixedEffectsSpec {
        &self.fixed_effects
    }

    /// Exclusion metadata.
    pub fn exclusions(&self) -> &DesignExclusions {
        &self.exclusions
    }

    /// Column labels.
    pub fn labels(&self) -> Vec<String> {
        self.columns.iter().map(DesignColumn::label).collect()
    }

    /// Dense row-major `(n_rows, n_columns)` indicator matrix.
    pub fn to_dense(&self) -> Vec<f64> {
        let k = self.columns.len();
        let mut x = vec![0.0_f64; self.row_column.len() * k];
        for (i, col) in self.row_column.iter().enumerate() {
            if let Some(j) = col {
                x[i * k + j] = 1.0;
            }
        }
        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use es_core::{Cohort, Observation};

    fn staggered_panel() -> PanelIndex {
        let mut rows = Vec::new();
        // cohort 3: units 1,2; cohort 4: unit 3; never: unit 4; periods 1..=4
        let units = [
            (1, Cohort::Adopts(3)),
            (2, Cohort::Adopts(3)),
            (3, Cohort::Adopts(4)),
            (4, Cohort::Never),
        ];
        for (unit, cohort) in units {
            for t in 1..=4 {
                rows.push(Observation::new(unit as i64, t, t as f64, cohort));
            }
        }
        PanelIndex::new(rows).unwrap()
    }

    #[test]
    fn columns_sorted_by_cohort_then_relative_time() {
        let design = SaturatedDesign::build(&staggered_panel(), -1).unwrap();
        let keys: Vec<(i64, i64)> =
            design.columns().iter().map(|c| (c.cohort, c.rel_time)).collect();
        assert_eq!(keys, vec![(3, -2), (3, 0), (3, 1), (4, -3), (4, -2), (4, 0)]);
        assert_eq!(design.columns()[0].n_obs, 2);
        assert_eq!(design.column_of(4, -3), Some(3));
        assert_eq!(design.column_of(3, -1), None);
        assert_eq!(design.labels()[1], "rel_time::0:cohort::3");
    }

    #[test]
    fn rebuilding_is_deterministic() {
        let panel = staggered_panel();
        let a = SaturatedDesign::build(&panel, -1).unwrap();
        let b = SaturatedDesign::build(&panel, -1).unwrap();
        assert_eq!(a.columns(), b.columns());
        assert_eq!(a.exclusions(), b.exclusions());
        assert_eq!(a.row_columns(), b.row_columns());
    }

    #[test]
    fn exclusions_recorded() {
        let design = SaturatedDesign::build(&staggered_panel(), -1).unwrap();
        let ex = design.exclusions();
        assert_eq!(ex.reference_cells, vec![(3, 2), (4, 1)]);
        assert!(ex.cohorts_without_reference.is_empty());
        assert_eq!(ex.never_treated_rows, 4);
    }

    #[test]
    fn dense_matrix_has_one_indicator_per_treated_row() {
        let design = SaturatedDesign::build(&staggered_panel(), -1).unwrap();
        let k = design.n_columns();
        let x = design.to_dense();
        for (i, col) in design.row_columns().iter().enumerate() {
            let row_sum: f64 = x[i * k..(i + 1) * k].iter().sum();
            assert_eq!(row_sum, if col.is_some() { 1.0 } else { 0.0 });
        }
        for j in 0..k {
            assert!((0..design.n_rows()).any(|i| x[i * k + j] == 1.0), "column {j} empty");
        }
    }

    #[test]
    fn empty_design_when_only_reference_period_observed() {
        let rows = vec![
            Observation::new(1, 2, 0.0, Cohort::Adopts(3)),
            Observation::new(2, 2, 0.0, Cohort::Never),
        ];
        let panel = PanelIndex::new(rows).unwrap();
        let err = SaturatedDesign::build(&panel, -1).unwrap_err();
        assert!(matches!(err, Error::EmptyDesign { n_cohorts: 1, reference_period: -1 }));
    }

    #[test]
    fn window_parsing() {
        assert_eq!("pre-only".parse::<EventWindow>().unwrap(), EventWindow::PreOnly);
        assert_eq!("POST-ONLY".parse::<EventWindow>().unwrap(), EventWindow::PostOnly);
        assert!(matches!("lead".parse::<EventWindow>(), Err(Error::UnknownOption { .. })));
        assert!(EventWindow::PreOnly.contains(-2));
        assert!(!EventWindow::PreOnly.contains(0));
        assert!(EventWindow::PostOnly.contains(0));
    }
}
