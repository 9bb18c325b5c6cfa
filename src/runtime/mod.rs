//! Batch runtime for per-pixel spectra fitting.

pub mod engine;
pub mod grid;
pub mod queue;

pub use engine::{FitRoutine, FitRoutineConfig};
pub use grid::{FitGrid, SpectraVolume, VolumeError};
pub use queue::{PixelQueue, WorkItem};
