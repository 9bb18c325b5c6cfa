//! Input spectra volume and pre-allocated output grid.

use thiserror::Error;

use crate::data::{PixelFit, Spectrum};

/// Errors raised when assembling or indexing a scan volume.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VolumeError {
    /// Spectra count does not match rows * cols.
    #[error("expected {expected} spectra for the grid, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A spectrum's channel count differs from the volume's.
    #[error("channel count mismatch: volume has {expected}, spectrum has {actual}")]
    ChannelMismatch { expected: usize, actual: usize },

    /// Pixel coordinates outside the grid.
    #[error("pixel ({row}, {col}) out of bounds for {rows}x{cols} grid")]
    OutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },
}

/// Row-major volume of per-pixel measured spectra with a uniform channel
/// count.
#[derive(Clone, Debug)]
pub struct SpectraVolume {
    rows: usize,
    cols: usize,
    channels: usize,
    spectra: Vec<Spectrum>,
}

impl SpectraVolume {
    /// Create a volume of zeroed spectra.
    pub fn new(rows: usize, cols: usize, channels: usize) -> Self {
        Self {
            rows,
            cols,
            channels,
            spectra: vec![Spectrum::new(channels); rows * cols],
        }
    }

    /// Assemble a volume from row-major spectra, enforcing the dimension
    /// and channel-count invariants.
    pub fn from_spectra(
        rows: usize,
        cols: usize,
        spectra: Vec<Spectrum>,
    ) -> Result<Self, VolumeError> {
        if spectra.len() != rows * cols {
            return Err(VolumeError::DimensionMismatch {
                expected: rows * cols,
                actual: spectra.len(),
            });
        }
        let channels = spectra.first().map_or(0, |s| s.len());
        for s in &spectra {
            if s.len() != channels {
                return Err(VolumeError::ChannelMismatch {
                    expected: channels,
                    actual: s.len(),
                });
            }
        }
        Ok(Self {
            rows,
            cols,
            channels,
            spectra,
        })
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.spectra.len()
    }

    fn index(&self, row: usize, col: usize) -> Result<usize, VolumeError> {
        if row >= self.rows || col >= self.cols {
            return Err(VolumeError::OutOfBounds {
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(row * self.cols + col)
    }

    /// Spectrum at one pixel.
    pub fn get(&self, row: usize, col: usize) -> Result<&Spectrum, VolumeError> {
        Ok(&self.spectra[self.index(row, col)?])
    }

    /// Replace the spectrum at one pixel, enforcing the channel count.
    pub fn set(&mut self, row: usize, col: usize, spectrum: Spectrum) -> Result<(), VolumeError> {
        if spectrum.len() != self.channels {
            return Err(VolumeError::ChannelMismatch {
                expected: self.channels,
                actual: spectrum.len(),
            });
        }
        let idx = self.index(row, col)?;
        self.spectra[idx] = spectrum;
        Ok(())
    }

    /// Accumulate all pixel spectra into one averaged-scan spectrum.
    pub fn integrated(&self) -> Spectrum {
        let mut total = Spectrum::with_times(self.channels, 0.0, 0.0, 0.0, 0.0);
        for s in &self.spectra {
            // Lengths are uniform by construction.
            let _ = total.add(s);
        }
        total
    }

    /// Iterate pixels in row-major order.
    pub fn iter_pixels(&self) -> impl Iterator<Item = (usize, usize, &Spectrum)> {
        let cols = self.cols;
        self.spectra
            .iter()
            .enumerate()
            .map(move |(i, s)| (i / cols, i % cols, s))
    }
}

/// Pre-allocated row-major grid of per-pixel fit results.
///
/// Cells are disjoint, so parallel workers each own exactly one cell and
/// no output locking is needed. `(row, col)` indexing is preserved no
/// matter what order fits complete in.
#[derive(Clone, Debug)]
pub struct FitGrid {
    rows: usize,
    cols: usize,
    cells: Vec<PixelFit>,
}

impl FitGrid {
    /// Pre-allocate an empty grid.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            cells: vec![PixelFit::new(); rows * cols],
        }
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Fit result at one pixel.
    pub fn get(&self, row: usize, col: usize) -> Option<&PixelFit> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.cells.get(row * self.cols + col)
    }

    /// Store one pixel's fit result.
    pub fn set(&mut self, row: usize, col: usize, fit: PixelFit) -> Result<(), VolumeError> {
        if row >= self.rows || col >= self.cols {
            return Err(VolumeError::OutOfBounds {
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        self.cells[row * self.cols + col] = fit;
        Ok(())
    }

    /// Disjoint mutable access to every cell, row-major.
    pub fn cells_mut(&mut self) -> &mut [PixelFit] {
        &mut self.cells
    }

    /// Iterate cells with their coordinates, row-major.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &PixelFit)> {
        let cols = self.cols;
        self.cells
            .iter()
            .enumerate()
            .map(move |(i, fit)| (i / cols, i % cols, fit))
    }
}
