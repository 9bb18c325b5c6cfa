//! Closed-form peak-shape functions.
//!
//! All functions take a vector of per-channel energy offsets and return a
//! same-length vector of contributions, so one element's full-spectrum
//! contribution is a single call. Formulas follow van Espen, Spectrum
//! Evaluation, in van Grieken, Handbook of X-ray Spectrometry, 2nd ed.

use ndarray::Array1;
use std::f64::consts::{PI, SQRT_2};

use crate::data::params::*;
use crate::data::{FitElement, FitParams, LineFamily};

/// Conversion between FWHM and Gaussian sigma.
const FWHM_TO_SIGMA: f64 = 2.3548;

/// Electron rest energy in keV, for the Compton energy shift.
const ELECTRON_REST_KEV: f64 = 511.0;

/// Complementary error function, Abramowitz & Stegun 7.1.26.
pub fn erfc(x: f64) -> f64 {
    let t = 1.0 / (1.0 + 0.3275911 * x.abs());
    let poly = t
        * (0.254829592
            + t * (-0.284496736 + t * (1.421413741 + t * (-1.453152027 + t * 1.061405429))));
    let result = poly * (-x * x).exp();
    if x >= 0.0 {
        result
    } else {
        2.0 - result
    }
}

/// Peak width (sigma) at a given line energy from the detector resolution
/// parameters: FWHM offset plus Fano-prime broadening scaled by energy.
pub fn line_sigma(fwhm_offset: f64, fano_prime: f64, energy: f64) -> f64 {
    ((fwhm_offset / FWHM_TO_SIGMA).powi(2) + energy * 2.96 * fano_prime)
        .max(0.0)
        .sqrt()
}

/// Gaussian core of a fluorescence line.
pub fn gauss_peak(gain: f64, sigma: f64, delta_energy: &Array1<f64>) -> Array1<f64> {
    let norm = gain / (sigma * (2.0 * PI).sqrt());
    delta_energy.mapv(|de| norm * (-0.5 * (de / sigma).powi(2)).exp())
}

/// Step in the continuum caused by incomplete charge collection.
pub fn gauss_step(gain: f64, sigma: f64, delta_energy: &Array1<f64>, peak_e: f64) -> Array1<f64> {
    let norm = gain / (2.0 * peak_e);
    delta_energy.mapv(|de| norm * erfc(de / (SQRT_2 * sigma)))
}

/// Low-energy exponential tail of a line.
///
/// The exponential argument is clamped so the erfc cutoff on the
/// high-energy side cannot turn into inf * 0.
pub fn gauss_tail(gain: f64, sigma: f64, delta_energy: &Array1<f64>, gamma: f64) -> Array1<f64> {
    let norm = gain / (2.0 * gamma * sigma * (-0.5 / (gamma * gamma)).exp());
    delta_energy.mapv(|de| {
        let arg = (de / (gamma * sigma)).min(50.0);
        norm * arg.exp() * erfc(de / (SQRT_2 * sigma) + 1.0 / (gamma * SQRT_2))
    })
}

#[inline]
fn param(fitp: &FitParams, name: &str) -> f64 {
    fitp.value_of(name).unwrap_or(0.0)
}

/// Coherent (elastic) scatter peak at the incident energy.
pub fn elastic_peak(fitp: &FitParams, ev: &Array1<f64>, gain: f64) -> Array1<f64> {
    let coherent_e = param(fitp, STR_COHERENT_SCT_ENERGY);
    let sigma = line_sigma(
        param(fitp, STR_FWHM_OFFSET),
        param(fitp, STR_FWHM_FANOPRIME),
        coherent_e,
    );
    if !sigma.is_finite() || sigma <= 0.0 {
        return Array1::zeros(ev.len());
    }

    let delta_energy = ev.mapv(|e| e - coherent_e);
    let mut counts = gauss_peak(gain, sigma, &delta_energy);
    counts *= 10.0_f64.powf(param(fitp, STR_COHERENT_SCT_AMPLITUDE));
    counts
}

/// Energy of the Compton-scattered incident line for a scattering angle
/// in degrees.
pub fn compton_shifted_energy(coherent_e: f64, angle_deg: f64) -> f64 {
    coherent_e
        / (1.0 + (coherent_e / ELECTRON_REST_KEV) * (1.0 - (angle_deg * PI / 180.0).cos()))
}

/// Incoherent (Compton) scatter composite: shifted Gaussian core, step,
/// low-energy tail and high-energy tail, in that order.
pub fn compton_peak(fitp: &FitParams, ev: &Array1<f64>, gain: f64) -> Array1<f64> {
    let compton_e = compton_shifted_energy(
        param(fitp, STR_COHERENT_SCT_ENERGY),
        param(fitp, STR_COMPTON_ANGLE),
    );
    let sigma = line_sigma(
        param(fitp, STR_FWHM_OFFSET),
        param(fitp, STR_FWHM_FANOPRIME),
        compton_e,
    );
    if !sigma.is_finite() || sigma <= 0.0 {
        return Array1::zeros(ev.len());
    }

    let delta_energy = ev.mapv(|e| e - compton_e);

    let f_step = param(fitp, STR_COMPTON_F_STEP).max(0.0);
    let f_tail = param(fitp, STR_COMPTON_F_TAIL).max(0.0);
    let hi_f_tail = param(fitp, STR_COMPTON_HI_F_TAIL).max(0.0);
    let amplitude = 10.0_f64.powf(param(fitp, STR_COMPTON_AMPLITUDE));
    let faktor = amplitude / (1.0 + f_step + f_tail + hi_f_tail);

    let fwhm_corr = param(fitp, STR_COMPTON_FWHM_CORR);
    let mut counts = gauss_peak(gain, sigma * fwhm_corr, &delta_energy) * faktor;

    if f_step > 0.0 {
        counts += &(gauss_step(gain, sigma, &delta_energy, compton_e) * (faktor * f_step));
    }
    if f_tail > 0.0 {
        let gamma = param(fitp, STR_COMPTON_GAMMA).max(0.1);
        counts += &(gauss_tail(gain, sigma, &delta_energy, gamma) * (faktor * f_tail));
    }
    if hi_f_tail > 0.0 {
        let hi_gamma = param(fitp, STR_COMPTON_HI_GAMMA).max(0.1);
        let neg_delta = delta_energy.mapv(|de| -de);
        counts += &(gauss_tail(gain, sigma, &neg_delta, hi_gamma) * (faktor * hi_f_tail));
    }

    counts
}

/// One element's full contribution on an energy grid.
///
/// Fluorescence families get, per line: a Gaussian core plus step and
/// tail corrections with energy-dependent fractions, normalized by
/// `ratio / (1 + f_step + f_tail)` and scaled by `10^amplitude`. Scatter
/// pseudo-elements map to the elastic/Compton composites.
pub fn element_peaks(
    fitp: &FitParams,
    element: &FitElement,
    gain: f64,
    ev: &Array1<f64>,
) -> Array1<f64> {
    match element.family() {
        LineFamily::Elastic => return elastic_peak(fitp, ev, gain),
        LineFamily::Compton => return compton_peak(fitp, ev, gain),
        LineFamily::K | LineFamily::L => {}
    }

    let fwhm_offset = param(fitp, STR_FWHM_OFFSET);
    let fano = param(fitp, STR_FWHM_FANOPRIME);
    let amplitude = 10.0_f64.powf(fitp.value_of(element.amplitude_name()).unwrap_or(0.0));

    let mut counts = Array1::zeros(ev.len());
    for (index, line) in element.lines().enumerate() {
        let energy = line.energy_kev;
        if energy <= 0.0 || line.ratio <= 0.0 {
            continue;
        }
        let sigma = line_sigma(fwhm_offset, fano, energy);
        if sigma <= 0.0 || !sigma.is_finite() {
            continue;
        }
        let delta_energy = ev.mapv(|e| e - energy);

        let f_step = (param(fitp, STR_F_STEP_OFFSET)
            + param(fitp, STR_F_STEP_LINEAR) * energy
            + param(fitp, STR_F_STEP_QUADRATIC) * energy * energy)
            .abs();
        // Beta lines carry their own tail fraction.
        let is_beta = element.family() == LineFamily::K && index >= 2;
        let f_tail = if is_beta {
            (param(fitp, STR_KB_F_TAIL_OFFSET)
                + param(fitp, STR_KB_F_TAIL_LINEAR) * energy
                + param(fitp, STR_KB_F_TAIL_QUADRATIC) * energy * energy)
                .abs()
        } else {
            (param(fitp, STR_F_TAIL_OFFSET)
                + param(fitp, STR_F_TAIL_LINEAR) * energy
                + param(fitp, STR_F_TAIL_QUADRATIC) * energy * energy)
                .abs()
        };
        let gamma = (param(fitp, STR_GAMMA_OFFSET)
            + param(fitp, STR_GAMMA_LINEAR) * energy
            + param(fitp, STR_GAMMA_QUADRATIC) * energy * energy)
            .abs()
            .max(0.1);

        let faktor = amplitude * line.ratio / (1.0 + f_step + f_tail);
        counts += &(gauss_peak(gain, sigma, &delta_energy) * faktor);
        if f_step > 0.0 {
            counts += &(gauss_step(gain, sigma, &delta_energy, energy) * (faktor * f_step));
        }
        if f_tail > 0.0 {
            counts += &(gauss_tail(gain, sigma, &delta_energy, gamma) * (faktor * f_tail));
        }
    }
    counts
}
