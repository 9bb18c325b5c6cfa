//! Data structures for XRF spectra fitting.

pub mod calibration;
pub mod element;
pub mod output;
pub mod params;
pub mod spectrum;

pub use calibration::{EnergyCalibration, EnergyRange};
pub use element::{EmissionLine, FitElement, LineFamily};
pub use output::PixelFit;
pub use params::{Bound, FitParam, FitParams};
pub use spectrum::{Spectrum, SpectrumError};
