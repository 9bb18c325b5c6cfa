//! XRF Rust Runtime - High-performance per-pixel spectra fitting.
//!
//! This crate deconvolves measured X-ray fluorescence (XRF) energy spectra
//! into per-element intensities by fitting a physically motivated
//! multi-peak model, or a linear-algebra shortcut, against every pixel of
//! a scanned sample:
//!
//! - Closed-form peak shapes (Gaussian peak / step / tail, elastic and
//!   Compton scatter composites)
//! - SNIP iterative peak-clipping background estimation
//! - A polymorphic fitting-model pipeline (initialize, pre-process, fit,
//!   post-process) with nonlinear (Gauss-Tails) and linear (SVD) variants
//! - A bounded Levenberg-Marquardt optimizer behind an abstract contract
//! - Parallel batch processing of scan volumes using rayon, plus an async
//!   callback-driven path on tokio
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │        Runtime (per scan)           │
//! │  ┌───────────┐  ┌───────────────┐  │
//! │  │ PixelQueue │  │   FitGrid    │  │
//! │  │ (row, col) │  │ (preallocated)│  │
//! │  └───────────┘  └───────────────┘  │
//! └──────────────────┬──────────────────┘
//!                    ▼ one model + params per pixel
//! ┌─────────────────────────────────────┐
//! │       Fitting (per spectrum)        │
//! │  ┌───────────┐  ┌───────────────┐  │
//! │  │ FitModel  │  │  Optimizer /  │  │
//! │  │ pipeline  │  │   SVD solve   │  │
//! │  └───────────┘  └───────────────┘  │
//! └─────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use xrfit::{
//!     default_fit_parameters, EnergyCalibration, EnergyRange, FitElement,
//!     FitRoutine, FitRoutineConfig, ModelKind, SpectraVolume,
//! };
//!
//! let calibration = EnergyCalibration::new(0.0, 0.01, 0.0);
//! let elements: Vec<FitElement> = ["Ca", "Fe", "Zn"]
//!     .iter()
//!     .filter_map(|s| FitElement::from_symbol(s))
//!     .collect();
//! let params = default_fit_parameters(&elements);
//!
//! let volume = SpectraVolume::new(64, 64, 2048);
//! let range = EnergyRange::new(0, 2047);
//!
//! let routine = FitRoutine::new(FitRoutineConfig::default());
//! let grid = routine
//!     .fit_volume(&volume, ModelKind::GaussTails, &params, &calibration, &elements, range)
//!     .unwrap();
//! for (row, col, fit) in grid.iter() {
//!     for (symbol, intensity) in fit.iter() {
//!         println!("({row},{col}) {symbol}: {intensity}");
//!     }
//! }
//! ```

pub mod data;
pub mod fitting;
pub mod optimizer;
pub mod runtime;

// Re-export commonly used items
pub use data::{
    Bound, EmissionLine, EnergyCalibration, EnergyRange, FitElement, FitParam, FitParams,
    LineFamily, PixelFit, Spectrum, SpectrumError,
};
pub use fitting::{
    convolve1d, convolve1d_kernel, default_fit_parameters, fit_pixel, snip_background, FitError,
    FitModel, FitState, GaussTailsConfig, GaussTailsModel, ModelKind, ModelRegistry, SvdConfig,
    SvdModel,
};
pub use optimizer::{FitContext, LevMarOptimizer, Optimizer, OptimizerOutcome};
pub use runtime::{FitGrid, FitRoutine, FitRoutineConfig, PixelQueue, SpectraVolume, VolumeError, WorkItem};
