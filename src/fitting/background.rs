//! Continuum estimation by iterative peak clipping (SNIP).

use ndarray::Array1;

use crate::data::Spectrum;

/// Boxcar moving-average smoothing. Output length equals input length;
/// edge samples clamp to the first/last value instead of wrapping.
pub fn convolve1d(arr: &Array1<f64>, boxcar_size: usize) -> Array1<f64> {
    let size = boxcar_size.max(1);
    let kernel = Array1::from_elem(size, 1.0);
    convolve1d_kernel(arr, &kernel)
}

/// Smoothing with an explicit kernel, normalized by the kernel sum.
pub fn convolve1d_kernel(arr: &Array1<f64>, kernel: &Array1<f64>) -> Array1<f64> {
    let n = arr.len();
    let k = kernel.len();
    if n == 0 || k == 0 {
        return arr.clone();
    }
    let norm: f64 = kernel.sum();
    if norm == 0.0 {
        return arr.clone();
    }

    let half = (k / 2) as isize;
    let mut out = Array1::zeros(n);
    for i in 0..n {
        let mut acc = 0.0;
        for (j, &w) in kernel.iter().enumerate() {
            let idx = (i as isize + j as isize - half).clamp(0, n as isize - 1) as usize;
            acc += w * arr[idx];
        }
        out[i] = acc / norm;
    }
    out
}

/// Estimate the smooth continuum under the peaks of a spectrum.
///
/// The counts over the channel window implied by `[xmin, xmax]` (energy
/// units, mapped through the calibration terms) are boxcar-smoothed,
/// compressed with a double log, then clipped against the average of the
/// two samples one half-window away. The half-window starts at the channel
/// equivalent of `width` and halves every pass until it reaches one.
///
/// The input spectrum is not mutated. The returned array is aligned to the
/// original channel indexing, zero outside the processed window, and lies
/// at or below the original counts everywhere inside it.
#[allow(clippy::too_many_arguments)]
pub fn snip_background(
    spectrum: &Spectrum,
    energy_offset: f64,
    energy_linear: f64,
    energy_quadratic: f64,
    spectral_binning: f64,
    width: f64,
    xmin: f64,
    xmax: f64,
) -> Array1<f64> {
    let n = spectrum.len();
    if n == 0 {
        return Array1::zeros(0);
    }

    // Energy window -> channel window, clamped to the spectrum domain.
    let energy_at = |i: usize| {
        let c = if spectral_binning > 0.0 {
            i as f64 * spectral_binning
        } else {
            i as f64
        };
        energy_offset + c * energy_linear + c * c * energy_quadratic
    };
    let first = (0..n).find(|&i| energy_at(i) >= xmin).unwrap_or(n - 1);
    let mut last = first;
    for i in first..n {
        if energy_at(i) <= xmax {
            last = i;
        } else {
            break;
        }
    }

    let boxcar = if spectral_binning > 0.0 { 3 } else { 5 };
    let mut work = convolve1d(&spectrum.counts, boxcar);

    // Double-log compression tames the dynamic range so one clipping
    // schedule serves both weak and intense spectra.
    work.mapv_inplace(|v| ((v.max(0.0) + 1.0).ln() + 1.0).ln());

    // Initial half-window: `width` is in energy units.
    let mut half_window = if energy_linear > 0.0 {
        let per_channel = if spectral_binning > 0.0 {
            energy_linear * spectral_binning
        } else {
            energy_linear
        };
        (width / per_channel).round().max(1.0) as usize
    } else {
        width.round().max(1.0) as usize
    };
    half_window = half_window.min((last - first) / 2).max(1);

    loop {
        for i in (first + half_window)..=(last.saturating_sub(half_window)) {
            let avg = 0.5 * (work[i - half_window] + work[i + half_window]);
            if avg < work[i] {
                work[i] = avg;
            }
        }
        if half_window <= 1 {
            break;
        }
        half_window /= 2;
    }

    // Undo the compression and pin the estimate under the measured counts.
    let mut background = Array1::zeros(n);
    for i in first..=last {
        let v = (work[i].exp() - 1.0).exp() - 1.0;
        background[i] = v.max(0.0).min(spectrum.counts[i]);
    }
    background
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum_with_peak() -> Spectrum {
        // Linear continuum with one strong Gaussian peak on top.
        let counts = Array1::from_iter((0..512).map(|i| {
            let continuum = 100.0 - 0.1 * i as f64;
            let peak = 5000.0 * (-0.5 * ((i as f64 - 256.0) / 4.0).powi(2)).exp();
            continuum + peak
        }));
        Spectrum::from_counts(counts)
    }

    #[test]
    fn test_convolve1d_preserves_length() {
        let arr = Array1::from(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let out = convolve1d(&arr, 3);
        assert_eq!(out.len(), arr.len());
    }

    #[test]
    fn test_convolve1d_flat_is_identity() {
        let arr = Array1::from_elem(16, 7.0);
        let out = convolve1d(&arr, 5);
        for v in out.iter() {
            assert!((v - 7.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_convolve1d_kernel_weighted() {
        let arr = Array1::from(vec![0.0, 0.0, 4.0, 0.0, 0.0]);
        let kernel = Array1::from(vec![1.0, 2.0, 1.0]);
        let out = convolve1d_kernel(&arr, &kernel);
        assert_eq!(out.len(), arr.len());
        assert!((out[2] - 2.0).abs() < 1e-12);
        assert!((out[1] - 1.0).abs() < 1e-12);
        assert!((out[3] - 1.0).abs() < 1e-12);
        assert_eq!(out[0], 0.0);
    }

    #[test]
    fn test_convolve1d_edges_clamp() {
        // A clamped edge keeps the average within the data range.
        let arr = Array1::from(vec![10.0, 0.0, 0.0, 0.0, 10.0]);
        let out = convolve1d(&arr, 3);
        assert!(out[0] <= 10.0 && out[0] >= 0.0);
        assert!((out[0] - (10.0 + 10.0 + 0.0) / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_background_at_or_below_spectrum() {
        let spec = spectrum_with_peak();
        let bg = snip_background(&spec, 0.0, 0.01, 0.0, 0.0, 0.5, 0.0, 5.12);
        assert_eq!(bg.len(), spec.len());
        for i in 0..spec.len() {
            assert!(
                bg[i] <= spec.counts[i] + 1e-9,
                "background exceeds counts at channel {i}"
            );
        }
    }

    #[test]
    fn test_background_suppresses_peak() {
        let spec = spectrum_with_peak();
        let bg = snip_background(&spec, 0.0, 0.01, 0.0, 0.0, 0.5, 0.0, 5.12);
        // At the peak channel the estimate stays near the continuum level.
        assert!(bg[256] < 500.0);
        assert!(spec.counts[256] > 4000.0);
    }

    #[test]
    fn test_flat_spectrum_is_fixed_point() {
        let spec = Spectrum::from_counts(Array1::from_elem(256, 50.0));
        let bg = snip_background(&spec, 0.0, 0.01, 0.0, 0.0, 0.5, 0.0, 2.56);
        let bg_spec = Spectrum::from_counts(bg.clone());
        let bg2 = snip_background(&bg_spec, 0.0, 0.01, 0.0, 0.0, 0.5, 0.0, 2.56);
        for i in 0..spec.len() {
            assert!((bg[i] - 50.0).abs() < 0.5);
            assert!((bg2[i] - bg[i]).abs() < 0.5);
        }
    }

    #[test]
    fn test_input_not_mutated() {
        let spec = spectrum_with_peak();
        let before = spec.counts.clone();
        let _ = snip_background(&spec, 0.0, 0.01, 0.0, 0.0, 0.5, 0.0, 5.12);
        assert_eq!(spec.counts, before);
    }

    #[test]
    fn test_outside_window_is_zero() {
        let spec = spectrum_with_peak();
        // Window covers channels 100..=200 only.
        let bg = snip_background(&spec, 0.0, 0.01, 0.0, 0.0, 0.5, 1.0, 2.0);
        assert_eq!(bg[0], 0.0);
        assert_eq!(bg[511], 0.0);
        assert!(bg[150] > 0.0);
    }
}
