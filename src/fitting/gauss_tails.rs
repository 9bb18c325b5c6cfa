//! Gaussian peak + step + tails fitting model (nonlinear variant).

use ndarray::Array1;
use tracing::debug;

use super::background::snip_background;
use super::functions::{compton_peak, elastic_peak, element_peaks, line_sigma};
use super::model::{default_fit_parameters, require_state, FitError, FitModel, FitState};
use crate::data::params::*;
use crate::data::{
    EnergyCalibration, EnergyRange, FitElement, FitParams, LineFamily, PixelFit, Spectrum,
};
use crate::optimizer::{FitContext, LevMarOptimizer, Optimizer, OptimizerOutcome};

/// Configuration for the Gauss-Tails model.
#[derive(Debug, Clone)]
pub struct GaussTailsConfig {
    /// Estimate a SNIP continuum during pre-processing.
    pub snip_background: bool,
    /// Subtract the estimated continuum from the working spectrum. When
    /// false the continuum is retained and added to the model instead.
    pub subtract_background: bool,
}

impl Default for GaussTailsConfig {
    fn default() -> Self {
        Self {
            snip_background: true,
            subtract_background: true,
        }
    }
}

/// Nonlinear fitting model: per-element Gaussian composites refined by an
/// injected bounded least-squares optimizer.
pub struct GaussTailsModel {
    config: GaussTailsConfig,
    optimizer: Box<dyn Optimizer>,
    state: FitState,
    energy_range: EnergyRange,
    background: Array1<f64>,
}

impl GaussTailsModel {
    /// Create with the default optimizer.
    pub fn new() -> Self {
        Self::with_optimizer(Box::new(LevMarOptimizer::default()))
    }

    /// Create with a custom optimizer.
    pub fn with_optimizer(optimizer: Box<dyn Optimizer>) -> Self {
        Self {
            config: GaussTailsConfig::default(),
            optimizer,
            state: FitState::Uninitialized,
            energy_range: EnergyRange::new(0, 0),
            background: Array1::zeros(0),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: GaussTailsConfig) -> Self {
        self.config = config;
        self
    }

    /// Swap the optimizer.
    pub fn set_optimizer(&mut self, optimizer: Box<dyn Optimizer>) {
        self.optimizer = optimizer;
    }

    /// Continuum estimated during pre-processing, empty before that.
    pub fn background(&self) -> &Array1<f64> {
        &self.background
    }

    /// Seed the coherent-scatter amplitude from the measured counts in a
    /// window around the coherent energy, against the unit-amplitude
    /// elastic model.
    fn calc_coherent_amplitude(
        &self,
        fit_params: &mut FitParams,
        spectrum: &Spectrum,
        calibration: &EnergyCalibration,
    ) {
        let Some(coherent_e) = fit_params.value_of(STR_COHERENT_SCT_ENERGY) else {
            return;
        };
        let sigma = line_sigma(
            fit_params.value_of(STR_FWHM_OFFSET).unwrap_or(0.0),
            fit_params.value_of(STR_FWHM_FANOPRIME).unwrap_or(0.0),
            coherent_e,
        );
        if sigma <= 0.0 || !sigma.is_finite() {
            return;
        }

        let lo = calibration.channel_of(coherent_e - 2.0 * sigma).floor();
        let hi = calibration.channel_of(coherent_e + 2.0 * sigma).ceil();
        let lo = (lo.max(self.energy_range.min as f64) as usize).min(self.energy_range.max);
        let hi = (hi.max(0.0) as usize).clamp(lo, self.energy_range.max);
        if hi <= lo {
            return;
        }

        let ev = Array1::from_iter((lo..=hi).map(|c| calibration.energy(c)));
        let mut unit = fit_params.clone();
        unit.set_value(STR_COHERENT_SCT_AMPLITUDE, 0.0);
        let model = elastic_peak(&unit, &ev, calibration.slope);

        let measured_sum: f64 = (lo..=hi).map(|c| spectrum.counts[c]).sum();
        let model_sum: f64 = model.sum();
        if measured_sum > 0.0 && model_sum > 0.0 {
            let seed = (measured_sum / model_sum).log10();
            if let Some(p) = fit_params.get_mut(STR_COHERENT_SCT_AMPLITUDE) {
                if p.is_free() {
                    p.value = p.clamp(seed);
                }
            }
        }
    }
}

impl Default for GaussTailsModel {
    fn default() -> Self {
        Self::new()
    }
}

impl FitModel for GaussTailsModel {
    fn name(&self) -> &'static str {
        "gauss_tails"
    }

    fn state(&self) -> FitState {
        self.state
    }

    fn fit_parameters(&self, elements: &[FitElement]) -> FitParams {
        default_fit_parameters(elements)
    }

    fn initialize(
        &mut self,
        _fit_params: &mut FitParams,
        _calibration: &EnergyCalibration,
        _elements: &[FitElement],
        energy_range: EnergyRange,
    ) -> Result<(), FitError> {
        self.energy_range = energy_range;
        self.background = Array1::zeros(0);
        self.state = FitState::Initialized;
        Ok(())
    }

    fn pre_process(
        &mut self,
        fit_params: &mut FitParams,
        spectrum: &mut Spectrum,
        calibration: &EnergyCalibration,
        _elements: &[FitElement],
    ) -> Result<(), FitError> {
        require_state(self.state, FitState::Initialized)?;
        if spectrum.len() <= self.energy_range.max {
            return Err(FitError::ChannelMismatch {
                expected: self.energy_range.max + 1,
                actual: spectrum.len(),
            });
        }

        if self.config.snip_background {
            let width = fit_params.value_of(STR_SNIP_WIDTH).unwrap_or(0.5);
            let xmin = calibration.energy(self.energy_range.min);
            let xmax = calibration.energy(self.energy_range.max);
            self.background = snip_background(
                spectrum,
                calibration.offset,
                calibration.slope,
                calibration.quadratic,
                calibration.binning,
                width,
                xmin,
                xmax,
            );
            if self.config.subtract_background {
                spectrum.counts -= &self.background;
                spectrum.counts.mapv_inplace(|c| c.max(0.0));
            }
        }

        self.calc_coherent_amplitude(fit_params, spectrum, calibration);
        self.state = FitState::PreProcessed;
        Ok(())
    }

    fn fit_spectrum(
        &mut self,
        fit_params: &mut FitParams,
        spectrum: &Spectrum,
        calibration: &EnergyCalibration,
        elements: &[FitElement],
    ) -> Result<OptimizerOutcome, FitError> {
        require_state(self.state, FitState::PreProcessed)?;
        if spectrum.len() <= self.energy_range.max {
            return Err(FitError::ChannelMismatch {
                expected: self.energy_range.max + 1,
                actual: spectrum.len(),
            });
        }

        // Poisson counting weights over the fit range.
        let weights = Array1::from_iter(
            (self.energy_range.min..=self.energy_range.max)
                .map(|c| 1.0 / spectrum.counts[c].max(1.0).sqrt()),
        );

        let outcome = {
            let ctx = FitContext {
                model: &*self,
                spectrum,
                weights: &weights,
                calibration,
                elements,
                energy_range: self.energy_range,
            };
            self.optimizer.minimize(fit_params, &ctx)
        };
        if outcome != OptimizerOutcome::Converged {
            debug!(model = self.name(), ?outcome, "fit did not converge");
        }

        self.state = FitState::Fitted;
        Ok(outcome)
    }

    fn post_process(
        &mut self,
        fit_params: &FitParams,
        elements: &[FitElement],
        out: &mut PixelFit,
    ) -> Result<(), FitError> {
        require_state(self.state, FitState::Fitted)?;
        for element in elements {
            let value = fit_params
                .value_of(element.amplitude_name())
                .unwrap_or(f64::NEG_INFINITY);
            out.set(element.symbol(), 10.0_f64.powf(value));
        }
        self.state = FitState::PostProcessed;
        Ok(())
    }

    fn model_spectrum(
        &self,
        fit_params: &FitParams,
        calibration: &EnergyCalibration,
        elements: &[FitElement],
        energy_range: EnergyRange,
    ) -> Result<Spectrum, FitError> {
        let ev = calibration.energy_vector_range(energy_range);
        if ev.is_empty() {
            return Err(FitError::EmptySpectrum);
        }
        let gain = calibration.slope;

        let mut counts = Array1::zeros(ev.len());
        for element in elements {
            // Scatter composites are part of the base model below.
            if matches!(element.family(), LineFamily::Elastic | LineFamily::Compton) {
                continue;
            }
            counts += &self.model_spectrum_element(fit_params, element, calibration, &ev);
        }
        counts += &elastic_peak(fit_params, &ev, gain);
        counts += &compton_peak(fit_params, &ev, gain);

        // Retained continuum, when estimated but not subtracted.
        if !self.config.subtract_background
            && self.background.len() > energy_range.max
        {
            for (i, c) in (energy_range.min..=energy_range.max).enumerate() {
                counts[i] += self.background[c];
            }
        }

        Ok(Spectrum::from_counts(counts))
    }

    fn model_spectrum_element(
        &self,
        fit_params: &FitParams,
        element: &FitElement,
        calibration: &EnergyCalibration,
        ev: &Array1<f64>,
    ) -> Array1<f64> {
        element_peaks(fit_params, element, calibration.slope, ev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::FitParam;
    use crate::fitting::model::fit_pixel;

    fn test_calibration() -> EnergyCalibration {
        EnergyCalibration::new(0.0, 0.01, 0.0)
    }

    fn fe_only() -> Vec<FitElement> {
        vec![FitElement::from_symbol("Fe").unwrap()]
    }

    #[test]
    fn test_lifecycle_order_enforced() {
        let mut model = GaussTailsModel::new();
        let elements = fe_only();
        let mut params = model.fit_parameters(&elements);
        let mut spectrum = Spectrum::new(1024);

        // pre_process before initialize is rejected.
        let err = model
            .pre_process(&mut params, &mut spectrum, &test_calibration(), &elements)
            .unwrap_err();
        assert!(matches!(err, FitError::InvalidState { .. }));
    }

    #[test]
    fn test_fit_pixel_rejects_empty_spectrum() {
        let mut model = GaussTailsModel::new();
        let elements = fe_only();
        let mut params = model.fit_parameters(&elements);
        let spectrum = Spectrum::new(0);
        let err = fit_pixel(
            &mut model,
            &mut params,
            &spectrum,
            &test_calibration(),
            &elements,
            EnergyRange::new(0, 1023),
        )
        .unwrap_err();
        assert_eq!(err, FitError::EmptySpectrum);
    }

    #[test]
    fn test_pre_process_subtracts_background() {
        let mut model = GaussTailsModel::new();
        let elements = fe_only();
        let mut params = model.fit_parameters(&elements);
        let calibration = test_calibration();
        let range = EnergyRange::new(0, 1023);

        // Constant continuum with a narrow peak.
        let mut counts = Array1::from_elem(1024, 200.0);
        for c in 630..650 {
            counts[c] += 3000.0 * (-0.5 * ((c as f64 - 640.0) / 3.0).powi(2)).exp();
        }
        let mut working = Spectrum::from_counts(counts);

        model
            .initialize(&mut params, &calibration, &elements, range)
            .unwrap();
        model
            .pre_process(&mut params, &mut working, &calibration, &elements)
            .unwrap();

        assert_eq!(model.background().len(), 1024);
        // Continuum regions drop to roughly zero, the peak survives.
        assert!(working.counts[100] < 5.0);
        assert!(working.counts[640] > 2000.0);
    }

    #[test]
    fn test_full_pipeline_recovers_amplitude() {
        let calibration = test_calibration();
        let mut elements = fe_only();
        elements[0].set_custom_ratio(1, 0.0);
        elements[0].set_custom_ratio(2, 0.0);
        let range = EnergyRange::new(0, 1023);

        // Synthesize a measured spectrum with a known amplitude.
        let synth_model = GaussTailsModel::new().with_config(GaussTailsConfig {
            snip_background: false,
            subtract_background: false,
        });
        let mut truth = synth_model.fit_parameters(&elements);
        truth.set_value(STR_F_TAIL_OFFSET, 0.0);
        truth.set_value(STR_F_TAIL_LINEAR, 0.0);
        truth.replace(FitParam::new(STR_COHERENT_SCT_AMPLITUDE, -40.0));
        truth.replace(FitParam::new(STR_COMPTON_AMPLITUDE, -40.0));
        truth.set_value("Fe", 2.5);
        let measured = synth_model
            .model_spectrum(&truth, &calibration, &elements, range)
            .unwrap();

        let mut fit_model = GaussTailsModel::new().with_config(GaussTailsConfig {
            snip_background: false,
            subtract_background: false,
        });
        let mut params = truth.clone();
        params.set_value("Fe", 0.5);

        let out = fit_pixel(
            &mut fit_model,
            &mut params,
            &measured,
            &calibration,
            &elements,
            range,
        )
        .unwrap();

        let fitted = out.get("Fe").unwrap();
        let injected = 10.0_f64.powf(2.5);
        assert!(
            (fitted / injected - 1.0).abs() < 0.01,
            "fitted {fitted}, injected {injected}"
        );
        assert_eq!(out.outcome(), Some(OptimizerOutcome::Converged));
    }
}
