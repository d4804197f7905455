//! Staggered-adoption difference-in-differences.
//!
//! This module provides:
//! - **Panel indexing** with validated absorbing adoption and event time.
//! - **Saturated event-study design** (cohort × relative-time indicators,
//!   Sun–Abraham style) with unit and time fixed effects.
//! - **Reference fitter**: two-way FE absorption (alternating projections)
//!   and OLS with CRV1 cluster-robust covariance.
//! - **Aggregation** of cell effects by relative time, cohort or pooled ATT.
//! - **Heterogeneity test** (Wald, pseudo-inverse fallback).
//! - **Sup-t joint confidence bands** via a cluster multiplier bootstrap.

pub mod adapter;
pub mod aggregate;
pub mod design;
pub mod event_study;
pub mod hdfe;
pub mod heterogeneity;
pub mod joint_band;
pub mod linalg;
pub mod multiplier;
pub mod ols;
pub mod panel;

pub use adapter::{CollinearPolicy, EstimatedModel, EstimatorAdapter};
pub use aggregate::{
    AggregateEstimate, Aggregation, AggregationKey, AggregationResult, Weighting, aggregate,
};
pub use design::{DesignColumn, DesignExclusions, EventWindow, FixedEffectsSpec, SaturatedDesign};
pub use event_study::{CoefficientRow, EventStudyConfig, EventStudyFit, SaturatedEventStudy};
pub use hdfe::FixedEffectsSolver;
pub use heterogeneity::{
    HeterogeneityConfig, HeterogeneityTest, ReferenceCohort, Restriction,
    test_treatment_heterogeneity,
};
pub use joint_band::{
    BandInterval, BootstrapMethod, JointBand, JointBandConfig, MAX_REPLICATIONS,
    joint_confidence_band,
};
pub use multiplier::MultiplierWeights;
pub use ols::{HdfeOls, cluster_influence, cluster_robust_se};
pub use panel::PanelIndex;
