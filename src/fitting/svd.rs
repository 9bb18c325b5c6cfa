//! Linear least-squares fitting model (SVD variant).

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};
use ndarray::Array1;
use tracing::debug;

use super::background::snip_background;
use super::functions::element_peaks;
use super::model::{default_fit_parameters, require_state, FitError, FitModel, FitState};
use crate::data::params::STR_SNIP_WIDTH;
use crate::data::{
    EnergyCalibration, EnergyRange, FitElement, FitParams, PixelFit, Spectrum,
};
use crate::optimizer::OptimizerOutcome;

/// Configuration for the SVD model.
#[derive(Debug, Clone)]
pub struct SvdConfig {
    /// Estimate and subtract a SNIP continuum during pre-processing.
    pub snip_background: bool,
    /// Relative singular-value cutoff for the pseudo-inverse.
    pub singular_eps: f64,
}

impl Default for SvdConfig {
    fn default() -> Self {
        Self {
            snip_background: false,
            singular_eps: 1e-12,
        }
    }
}

/// Linear fitting model: one pure-element model spectrum per element,
/// stacked as columns of a fit matrix solved by thin SVD.
///
/// The solve is unconstrained; a rank-deficient matrix yields the
/// minimum-norm solution instead of failing. Fitted coefficients are
/// linear amplitudes, exposed verbatim by post-processing.
pub struct SvdModel {
    config: SvdConfig,
    state: FitState,
    energy_range: EnergyRange,
    fit_matrix: DMatrix<f64>,
    /// Amplitude-parameter name -> fit matrix column, rebuilt every
    /// initialize call.
    columns: BTreeMap<String, usize>,
}

impl SvdModel {
    pub fn new() -> Self {
        Self::with_config(SvdConfig::default())
    }

    pub fn with_config(config: SvdConfig) -> Self {
        Self {
            config,
            state: FitState::Uninitialized,
            energy_range: EnergyRange::new(0, 0),
            fit_matrix: DMatrix::zeros(0, 0),
            columns: BTreeMap::new(),
        }
    }

    /// Column index assigned to an element's amplitude, if initialized.
    pub fn column_of(&self, amplitude_name: &str) -> Option<usize> {
        self.columns.get(amplitude_name).copied()
    }
}

impl Default for SvdModel {
    fn default() -> Self {
        Self::new()
    }
}

impl FitModel for SvdModel {
    fn name(&self) -> &'static str {
        "svd"
    }

    fn state(&self) -> FitState {
        self.state
    }

    fn fit_parameters(&self, elements: &[FitElement]) -> FitParams {
        // Same canonical set as the nonlinear variant; the per-element
        // amplitudes become linear coefficients written by the solve.
        default_fit_parameters(elements)
    }

    fn initialize(
        &mut self,
        fit_params: &mut FitParams,
        calibration: &EnergyCalibration,
        elements: &[FitElement],
        energy_range: EnergyRange,
    ) -> Result<(), FitError> {
        self.energy_range = energy_range;
        let ev = calibration.energy_vector_range(energy_range);
        let rows = ev.len();

        self.fit_matrix = DMatrix::zeros(rows, elements.len());
        self.columns.clear();

        // One pure-element model per column, every other parameter held
        // at its seeded value and the element's own amplitude at unity.
        for (col, element) in elements.iter().enumerate() {
            let mut unit = fit_params.clone();
            unit.set_value(element.amplitude_name(), 0.0);
            let model = element_peaks(&unit, element, calibration.slope, &ev);
            for (row, v) in model.iter().enumerate() {
                self.fit_matrix[(row, col)] = *v;
            }
            self.columns
                .insert(element.amplitude_name().to_string(), col);
        }

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
            let background = snip_background(
                spectrum,
                calibration.offset,
                calibration.slope,
                calibration.quadratic,
                calibration.binning,
                width,
                calibration.energy(self.energy_range.min),
                calibration.energy(self.energy_range.max),
            );
            spectrum.counts -= &background;
            spectrum.counts.mapv_inplace(|c| c.max(0.0));
        }

        self.state = FitState::PreProcessed;
        Ok(())
    }

    fn fit_spectrum(
        &mut self,
        fit_params: &mut FitParams,
        spectrum: &Spectrum,
        _calibration: &EnergyCalibration,
        _elements: &[FitElement],
    ) -> Result<OptimizerOutcome, FitError> {
        require_state(self.state, FitState::PreProcessed)?;
        let rows = self.fit_matrix.nrows();
        if spectrum.len() <= self.energy_range.max || self.energy_range.count() != rows {
            return Err(FitError::ChannelMismatch {
                expected: self.energy_range.max + 1,
                actual: spectrum.len(),
            });
        }

        let rhs = DVector::from_iterator(
            rows,
            (self.energy_range.min..=self.energy_range.max).map(|c| spectrum.counts[c]),
        );

        let svd = self.fit_matrix.clone().svd(true, true);
        let outcome = match svd.solve(&rhs, self.config.singular_eps) {
            Ok(solution) => {
                for (name, &col) in &self.columns {
                    fit_params.set_value(name, solution[col]);
                }
                OptimizerOutcome::Converged
            }
            Err(reason) => {
                debug!(model = self.name(), reason, "svd solve unusable");
                OptimizerOutcome::ImproperInput
            }
        };

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
            let value = fit_params.value_of(element.amplitude_name()).unwrap_or(0.0);
            out.set(element.symbol(), value);
        }
        self.state = FitState::PostProcessed;
        Ok(())
    }

    fn model_spectrum(
        &self,
        fit_params: &FitParams,
        _calibration: &EnergyCalibration,
        _elements: &[FitElement],
        energy_range: EnergyRange,
    ) -> Result<Spectrum, FitError> {
        if self.fit_matrix.nrows() == 0 || energy_range.count() != self.fit_matrix.nrows() {
            return Err(FitError::ChannelMismatch {
                expected: self.fit_matrix.nrows(),
                actual: energy_range.count(),
            });
        }

        let coeffs = DVector::from_iterator(
            self.columns.len(),
            self.columns.iter().map(|(name, _)| {
                fit_params.value_of(name).unwrap_or(0.0)
            }),
        );
        // Column order in `columns` is name order; remap to matrix order.
        let mut ordered = DVector::zeros(self.fit_matrix.ncols());
        for (i, (_, &col)) in self.columns.iter().enumerate() {
            ordered[col] = coeffs[i];
        }

        let combined = &self.fit_matrix * ordered;
        Ok(Spectrum::from_counts(Array1::from_iter(
            combined.iter().copied(),
        )))
    }

    fn model_spectrum_element(
        &self,
        fit_params: &FitParams,
        element: &FitElement,
        calibration: &EnergyCalibration,
        ev: &Array1<f64>,
    ) -> Array1<f64> {
        // The unit model this variant stacks into its fit matrix.
        let mut unit = fit_params.clone();
        unit.set_value(element.amplitude_name(), 0.0);
        element_peaks(&unit, element, calibration.slope, ev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitting::model::fit_pixel;

    fn test_calibration() -> EnergyCalibration {
        EnergyCalibration::new(0.0, 0.01, 0.0)
    }

    fn test_elements() -> Vec<FitElement> {
        vec![
            FitElement::from_symbol("Ca").unwrap(),
            FitElement::from_symbol("Fe").unwrap(),
            FitElement::from_symbol("Zn").unwrap(),
        ]
    }

    #[test]
    fn test_columns_assigned_per_element() {
        let calibration = test_calibration();
        let elements = test_elements();
        let mut model = SvdModel::new();
        let mut params = model.fit_parameters(&elements);
        model
            .initialize(&mut params, &calibration, &elements, EnergyRange::new(0, 2047))
            .unwrap();

        assert_eq!(model.column_of("Ca"), Some(0));
        assert_eq!(model.column_of("Fe"), Some(1));
        assert_eq!(model.column_of("Zn"), Some(2));
        assert_eq!(model.column_of("Cu"), None);
    }

    #[test]
    fn test_round_trip_recovers_coefficients() {
        let calibration = test_calibration();
        let elements = test_elements();
        let range = EnergyRange::new(0, 2047);
        let truth = [250.0, 1300.0, 42.5];

        // Build the synthetic measurement as an exact linear combination
        // of the pure element models.
        let mut model = SvdModel::new();
        let mut params = model.fit_parameters(&elements);
        model
            .initialize(&mut params, &calibration, &elements, range)
            .unwrap();
        let ev = calibration.energy_vector_range(range);
        let mut counts = Array1::zeros(ev.len());
        for (element, &coeff) in elements.iter().zip(truth.iter()) {
            counts += &(model.model_spectrum_element(&params, element, &calibration, &ev)
                * coeff);
        }
        let measured = Spectrum::from_counts(counts);

        let out = fit_pixel(
            &mut model,
            &mut params,
            &measured,
            &calibration,
            &elements,
            range,
        )
        .unwrap();

        assert_eq!(out.outcome(), Some(OptimizerOutcome::Converged));
        for (element, &coeff) in elements.iter().zip(truth.iter()) {
            let fitted = out.get(element.symbol()).unwrap();
            assert!(
                (fitted - coeff).abs() < 1e-6 * coeff.max(1.0),
                "{}: fitted {fitted}, expected {coeff}",
                element.symbol()
            );
        }
    }

    #[test]
    fn test_rank_deficient_solve_is_minimum_norm() {
        let calibration = test_calibration();
        // Two identical columns make the system rank deficient.
        let elements = vec![
            FitElement::from_symbol("Fe").unwrap(),
            FitElement::from_symbol("Fe").unwrap(),
        ];
        let range = EnergyRange::new(0, 1023);

        let mut model = SvdModel::new();
        let mut params = model.fit_parameters(&elements);
        model
            .initialize(&mut params, &calibration, &elements, range)
            .unwrap();
        let ev = calibration.energy_vector_range(range);
        let unit = model.model_spectrum_element(&params, &elements[0], &calibration, &ev);
        let measured = Spectrum::from_counts(unit * 100.0);

        let mut working = measured.clone();
        model
            .pre_process(&mut params, &mut working, &calibration, &elements)
            .unwrap();
        let outcome = model
            .fit_spectrum(&mut params, &working, &calibration, &elements)
            .unwrap();

        // Minimum-norm split: each duplicate column takes half the weight.
        assert_eq!(outcome, OptimizerOutcome::Converged);
        let fitted = params.value_of("Fe").unwrap();
        assert!((fitted - 50.0).abs() < 1e-6, "fitted {fitted}");
    }

    #[test]
    fn test_model_spectrum_matches_combination() {
        let calibration = test_calibration();
        let elements = test_elements();
        let range = EnergyRange::new(0, 2047);

        let mut model = SvdModel::new();
        let mut params = model.fit_parameters(&elements);
        model
            .initialize(&mut params, &calibration, &elements, range)
            .unwrap();
        params.set_value("Ca", 2.0);
        params.set_value("Fe", 3.0);
        params.set_value("Zn", 4.0);

        let combined = model
            .model_spectrum(&params, &calibration, &elements, range)
            .unwrap();
        let ev = calibration.energy_vector_range(range);
        let mut expected = Array1::zeros(ev.len());
        for (element, coeff) in elements.iter().zip([2.0, 3.0, 4.0]) {
            expected +=
                &(model.model_spectrum_element(&params, element, &calibration, &ev) * coeff);
        }
        for i in 0..expected.len() {
            assert!((combined.counts[i] - expected[i]).abs() < 1e-9);
        }
    }
}
