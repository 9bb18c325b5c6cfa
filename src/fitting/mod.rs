//! Spectral model and fitting pipeline.

pub mod background;
pub mod functions;
pub mod gauss_tails;
pub mod model;
pub mod registry;
pub mod svd;

pub use background::{convolve1d, convolve1d_kernel, snip_background};
pub use gauss_tails::{GaussTailsConfig, GaussTailsModel};
pub use model::{default_fit_parameters, fit_pixel, FitError, FitModel, FitState};
pub use registry::{ModelKind, ModelRegistry};
pub use svd::{SvdConfig, SvdModel};
