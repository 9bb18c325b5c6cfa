//! Polymorphic fitting-model pipeline.
//!
//! Every model variant walks the same lifecycle: initialize, pre-process,
//! numeric solve, post-process. The lifecycle is tracked with an explicit
//! state enum and driven by [`fit_pixel`], which runs the four phases
//! against one pixel's spectrum.

use ndarray::Array1;
use thiserror::Error;

use crate::data::params::*;
use crate::data::{
    Bound, EnergyCalibration, EnergyRange, FitElement, FitParam, FitParams, PixelFit, Spectrum,
};
use crate::optimizer::OptimizerOutcome;

/// Lifecycle position of a fitting model.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FitState {
    Uninitialized,
    Initialized,
    PreProcessed,
    Fitted,
    PostProcessed,
}

/// Data and setup errors raised by the fitting pipeline.
///
/// Numeric difficulty (rank deficiency, non-convergence) is never an
/// error; it is reported through [`OptimizerOutcome`] instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    /// A spectrum or energy range with no channels was passed in.
    #[error("spectrum has no channels")]
    EmptySpectrum,

    /// Spectrum channel count does not cover the fit range.
    #[error("channel count mismatch: need {expected} channels, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },

    /// Element symbol not present in the line table.
    #[error("unknown element symbol: {0}")]
    UnknownElement(String),

    /// Lifecycle phases called out of order.
    #[error("operation requires state {expected:?}, model is {actual:?}")]
    InvalidState { expected: FitState, actual: FitState },

    /// No fitting model registered under the requested kind.
    #[error("no fitting model registered for kind: {0}")]
    UnknownModel(&'static str),
}

/// A spectral fitting model variant.
///
/// Implementations own any per-pixel scratch state (estimated background,
/// fit matrix), so one instance serves one pixel at a time; workers create
/// their own instances through the model registry.
pub trait FitModel: Send {
    /// Short variant name for diagnostics.
    fn name(&self) -> &'static str;

    /// Current lifecycle state.
    fn state(&self) -> FitState;

    /// The canonical named parameters this variant requires: calibration
    /// and shape parameters plus one amplitude per element, each with
    /// default value and bounds.
    fn fit_parameters(&self, elements: &[FitElement]) -> FitParams;

    /// Variant-specific setup for a fit over `energy_range`.
    fn initialize(
        &mut self,
        fit_params: &mut FitParams,
        calibration: &EnergyCalibration,
        elements: &[FitElement],
        energy_range: EnergyRange,
    ) -> Result<(), FitError>;

    /// Prepare the working spectrum: background subtraction and initial
    /// amplitude seeding. The measured spectrum itself is never touched;
    /// `spectrum` is the pixel's working copy.
    fn pre_process(
        &mut self,
        fit_params: &mut FitParams,
        spectrum: &mut Spectrum,
        calibration: &EnergyCalibration,
        elements: &[FitElement],
    ) -> Result<(), FitError>;

    /// Numeric core: adjust the amplitude (and any free shape) parameters
    /// to match the spectrum. Non-convergence is reported through the
    /// returned outcome, with the best parameters found left in place.
    fn fit_spectrum(
        &mut self,
        fit_params: &mut FitParams,
        spectrum: &Spectrum,
        calibration: &EnergyCalibration,
        elements: &[FitElement],
    ) -> Result<OptimizerOutcome, FitError>;

    /// Convert fitted amplitudes into final per-element intensities.
    fn post_process(
        &mut self,
        fit_params: &FitParams,
        elements: &[FitElement],
        out: &mut PixelFit,
    ) -> Result<(), FitError>;

    /// Synthesize the full model spectrum over `energy_range`.
    fn model_spectrum(
        &self,
        fit_params: &FitParams,
        calibration: &EnergyCalibration,
        elements: &[FitElement],
        energy_range: EnergyRange,
    ) -> Result<Spectrum, FitError>;

    /// Synthesize one element's isolated contribution on an energy grid.
    fn model_spectrum_element(
        &self,
        fit_params: &FitParams,
        element: &FitElement,
        calibration: &EnergyCalibration,
        ev: &Array1<f64>,
    ) -> Array1<f64>;
}

/// Run the full lifecycle of `model` against one pixel's spectrum.
///
/// The measured spectrum stays untouched; background subtraction happens
/// on a private working copy. Returns the per-element intensities plus the
/// solve outcome for the pixel.
pub fn fit_pixel(
    model: &mut dyn FitModel,
    fit_params: &mut FitParams,
    spectrum: &Spectrum,
    calibration: &EnergyCalibration,
    elements: &[FitElement],
    energy_range: EnergyRange,
) -> Result<PixelFit, FitError> {
    if spectrum.is_empty() {
        return Err(FitError::EmptySpectrum);
    }
    if spectrum.len() <= energy_range.max {
        return Err(FitError::ChannelMismatch {
            expected: energy_range.max + 1,
            actual: spectrum.len(),
        });
    }

    model.initialize(fit_params, calibration, elements, energy_range)?;

    let mut working = spectrum.clone();
    model.pre_process(fit_params, &mut working, calibration, elements)?;

    let outcome = model.fit_spectrum(fit_params, &working, calibration, elements)?;

    let mut out = PixelFit::new();
    out.set_outcome(outcome);
    model.post_process(fit_params, elements, &mut out)?;
    Ok(out)
}

/// The canonical parameter set shared by the model variants: calibration,
/// detector resolution, scatter and tail shape parameters, plus one
/// bounded amplitude per element.
pub fn default_fit_parameters(elements: &[FitElement]) -> FitParams {
    let mut p = FitParams::new();

    p.add(FitParam::bounded(STR_ENERGY_OFFSET, 0.0, -0.2, 0.2, Bound::Fixed));
    p.add(FitParam::bounded(STR_ENERGY_SLOPE, 0.01, 1e-4, 0.1, Bound::Fixed));
    p.add(FitParam::bounded(STR_ENERGY_QUADRATIC, 0.0, -1e-4, 1e-4, Bound::Fixed));

    p.add(FitParam::bounded(STR_FWHM_OFFSET, 0.12, 0.005, 0.5, Bound::Fixed));
    p.add(FitParam::bounded(STR_FWHM_FANOPRIME, 0.00012, 1e-7, 0.05, Bound::Fixed));

    p.add(FitParam::bounded(STR_COHERENT_SCT_ENERGY, 10.0, 9.4, 10.4, Bound::Fixed));
    p.add(FitParam::bounded(
        STR_COHERENT_SCT_AMPLITUDE,
        0.0,
        -11.0,
        20.0,
        Bound::LimitedLoHi,
    ));

    p.add(FitParam::bounded(STR_COMPTON_ANGLE, 90.0, 70.0, 110.0, Bound::Fixed));
    p.add(FitParam::bounded(STR_COMPTON_FWHM_CORR, 1.0, 1.0, 4.0, Bound::Fixed));
    p.add(FitParam::bounded(
        STR_COMPTON_AMPLITUDE,
        0.0,
        -11.0,
        20.0,
        Bound::LimitedLoHi,
    ));
    p.add(FitParam::bounded(STR_COMPTON_F_STEP, 0.0, 0.0, 1.0, Bound::Fixed));
    p.add(FitParam::bounded(STR_COMPTON_F_TAIL, 0.0, 0.0, 3.0, Bound::Fixed));
    p.add(FitParam::bounded(STR_COMPTON_GAMMA, 1.0, 0.1, 10.0, Bound::Fixed));
    p.add(FitParam::bounded(STR_COMPTON_HI_F_TAIL, 0.0, 0.0, 1.0, Bound::Fixed));
    p.add(FitParam::bounded(STR_COMPTON_HI_GAMMA, 1.0, 0.1, 3.0, Bound::Fixed));

    p.add(FitParam::bounded(STR_SNIP_WIDTH, 0.5, 0.1, 2.0, Bound::Fixed));

    p.add(FitParam::new(STR_F_STEP_OFFSET, 0.0));
    p.add(FitParam::new(STR_F_STEP_LINEAR, 0.0));
    p.add(FitParam::new(STR_F_STEP_QUADRATIC, 0.0));

    p.add(FitParam::new(STR_F_TAIL_OFFSET, 0.04));
    p.add(FitParam::new(STR_F_TAIL_LINEAR, 0.01));
    p.add(FitParam::new(STR_F_TAIL_QUADRATIC, 0.0));

    p.add(FitParam::bounded(STR_GAMMA_OFFSET, 2.21, 0.1, 10.0, Bound::Fixed));
    p.add(FitParam::new(STR_GAMMA_LINEAR, 0.0));
    p.add(FitParam::new(STR_GAMMA_QUADRATIC, 0.0));

    p.add(FitParam::new(STR_KB_F_TAIL_OFFSET, 0.05));
    p.add(FitParam::new(STR_KB_F_TAIL_LINEAR, 0.0));
    p.add(FitParam::new(STR_KB_F_TAIL_QUADRATIC, 0.0));

    for element in elements {
        p.add(FitParam::bounded(
            element.amplitude_name(),
            0.0,
            -11.0,
            20.0,
            Bound::LimitedLoHi,
        ));
    }
    p
}

/// Check the model is in `expected` state, mapping a mismatch to
/// [`FitError::InvalidState`].
pub(crate) fn require_state(actual: FitState, expected: FitState) -> Result<(), FitError> {
    if actual == expected {
        Ok(())
    } else {
        Err(FitError::InvalidState { expected, actual })
    }
}
