//! Nonlinear least-squares minimization over fit parameters.

pub mod levmar;

pub use levmar::LevMarOptimizer;

use ndarray::Array1;

use crate::data::{EnergyCalibration, EnergyRange, FitElement, FitParams, Spectrum};
use crate::fitting::FitModel;

/// How a minimization terminated.
///
/// Termination is never an error: a non-convergent fit leaves the best
/// parameter values found and batch fitting proceeds to the next pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptimizerOutcome {
    /// The problem setup was unusable (no free parameters, empty range,
    /// model synthesis failure).
    ImproperInput,
    /// A tolerance test was satisfied.
    Converged,
    /// The residual-evaluation budget ran out first.
    ExceededCallLimit,
    /// A tolerance was configured below what the arithmetic can resolve.
    ToleranceTooSmall,
    /// Damping grew without any cost reduction.
    NoProgress,
}

/// Everything a minimization needs, bundled immutably.
pub struct FitContext<'a> {
    /// Model used to synthesize trial spectra.
    pub model: &'a dyn FitModel,
    /// Measured (working) spectrum.
    pub spectrum: &'a Spectrum,
    /// Per-channel residual weights over the fit range.
    pub weights: &'a Array1<f64>,
    /// Shared energy calibration.
    pub calibration: &'a EnergyCalibration,
    /// Elements being fitted.
    pub elements: &'a [FitElement],
    /// Channel sub-range being fitted.
    pub energy_range: EnergyRange,
}

/// Abstract bounded nonlinear least-squares minimizer.
///
/// `minimize` adjusts only the parameters not marked fixed, in place,
/// keeping every value inside its configured limits at all times.
pub trait Optimizer: Send + Sync {
    fn minimize(&self, fit_params: &mut FitParams, ctx: &FitContext<'_>) -> OptimizerOutcome;
}
