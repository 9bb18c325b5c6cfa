//! XRF spectrum data structure.

use ndarray::Array1;
use thiserror::Error;

/// One measured or modeled energy histogram plus acquisition metadata.
///
/// Counts are indexed by detector channel. The four scalar metadata fields
/// track acquisition timing and throughput and participate in dead-time
/// correction and accumulation.
#[derive(Clone, Debug)]
pub struct Spectrum {
    /// Per-channel counts.
    pub counts: Array1<f64>,

    /// Elapsed live time in seconds.
    pub elapsed_livetime: f64,

    /// Elapsed real (wall clock) time in seconds.
    pub elapsed_realtime: f64,

    /// Detector input count rate.
    pub input_counts: f64,

    /// Detector output count rate.
    pub output_counts: f64,
}

impl Spectrum {
    /// Create a zeroed spectrum with `sample_size` channels.
    pub fn new(sample_size: usize) -> Self {
        Self {
            counts: Array1::zeros(sample_size),
            elapsed_livetime: 1.0,
            elapsed_realtime: 1.0,
            input_counts: 1.0,
            output_counts: 1.0,
        }
    }

    /// Create a spectrum from an existing counts array.
    pub fn from_counts(counts: Array1<f64>) -> Self {
        Self {
            counts,
            elapsed_livetime: 1.0,
            elapsed_realtime: 1.0,
            input_counts: 1.0,
            output_counts: 1.0,
        }
    }

    /// Create a zeroed spectrum with explicit acquisition metadata.
    pub fn with_times(
        sample_size: usize,
        elapsed_livetime: f64,
        elapsed_realtime: f64,
        input_counts: f64,
        output_counts: f64,
    ) -> Self {
        Self {
            counts: Array1::zeros(sample_size),
            elapsed_livetime,
            elapsed_realtime,
            input_counts,
            output_counts,
        }
    }

    /// Get the number of channels.
    #[inline]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Check if the spectrum has no channels.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Recompute the elapsed live time from the dead-time correction rule.
    ///
    /// Live time equals real time when either count rate is unset or zero;
    /// otherwise live time = real time * output / input.
    pub fn recalc_elapsed_livetime(&mut self) {
        if self.input_counts == 0.0 || self.output_counts == 0.0 {
            self.elapsed_livetime = self.elapsed_realtime;
        } else {
            self.elapsed_livetime =
                self.elapsed_realtime * self.output_counts / self.input_counts;
        }
    }

    /// Accumulate another spectrum into this one.
    ///
    /// Counts are added element-wise and all four metadata scalars are
    /// summed. The channel counts must match.
    pub fn add(&mut self, other: &Spectrum) -> Result<(), SpectrumError> {
        if other.len() != self.len() {
            return Err(SpectrumError::LengthMismatch {
                expected: self.len(),
                actual: other.len(),
            });
        }
        self.counts += &other.counts;
        self.elapsed_livetime += other.elapsed_livetime;
        self.elapsed_realtime += other.elapsed_realtime;
        self.input_counts += other.input_counts;
        self.output_counts += other.output_counts;
        Ok(())
    }

    /// Extract a contiguous sub-range of `count` channels starting at `start`.
    ///
    /// The returned spectrum carries default acquisition metadata.
    pub fn sub_spectrum(&self, start: usize, count: usize) -> Result<Spectrum, SpectrumError> {
        let end = start
            .checked_add(count)
            .filter(|&e| e <= self.len())
            .ok_or(SpectrumError::RangeOutOfBounds {
                start,
                count,
                len: self.len(),
            })?;
        Ok(Spectrum::from_counts(
            self.counts.slice(ndarray::s![start..end]).to_owned(),
        ))
    }
}

/// Errors that can occur when creating/manipulating spectra.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpectrumError {
    /// Channel counts don't match.
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Requested sub-range falls outside the spectrum.
    #[error("sub-range {start}+{count} out of bounds for {len} channels")]
    RangeOutOfBounds {
        start: usize,
        count: usize,
        len: usize,
    },
}
