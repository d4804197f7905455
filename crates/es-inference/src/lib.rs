//! # es-inference
//!
//! Event-study inference for staggered treatment adoption.
//!
//! This crate provides:
//! - Saturated cohort × relative-time event-study estimation
//! - Delta-method aggregation of cell effects
//! - Cross-cohort heterogeneity testing
//! - Simultaneous (sup-t) confidence bands
//!
//! ## Architecture
//!
//! The estimator talks to regression code only through the
//! `LinearModelFitter` trait from es-core. `HdfeOls` is the bundled
//! implementation; any other fitter can be plugged in.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Quantile and normal-reference helpers for bootstrap inference.
pub mod bootstrap_ci;
/// Staggered-adoption event studies (design, fitting, aggregation, bands).
pub mod econometrics;

pub use econometrics::{
    Aggregation, EventStudyConfig, EventStudyFit, EventWindow, HdfeOls, HeterogeneityConfig,
    JointBand, JointBandConfig, PanelIndex, SaturatedEventStudy, Weighting,
};
