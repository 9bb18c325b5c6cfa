//! Batch fitting engine over a scan volume.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rayon::prelude::*;
use tokio::runtime::Runtime as TokioRuntime;
use tracing::warn;

use super::grid::{FitGrid, SpectraVolume};
use super::queue::PixelQueue;
use crate::data::{EnergyCalibration, EnergyRange, FitElement, FitParams, PixelFit};
use crate::fitting::{fit_pixel, FitError, ModelKind, ModelRegistry};

/// Configuration for the fit routine.
#[derive(Clone, Debug)]
pub struct FitRoutineConfig {
    /// Number of worker threads for the callback-driven path.
    pub worker_count: usize,
}

impl Default for FitRoutineConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
        }
    }
}

/// Per-pixel batch fitting engine.
///
/// Pixels are independent: every worker takes a private model instance
/// from the registry and a private clone of the seed parameters, while the
/// calibration and element list are shared read-only. Results land in
/// disjoint cells of a pre-allocated grid.
pub struct FitRoutine {
    config: FitRoutineConfig,
    registry: Arc<ModelRegistry>,
    tokio_runtime: TokioRuntime,
}

impl FitRoutine {
    /// Create an engine with both built-in model variants available.
    pub fn new(config: FitRoutineConfig) -> Self {
        Self::with_registry(config, ModelRegistry::new_with_defaults())
    }

    /// Create an engine with a custom model registry.
    pub fn with_registry(config: FitRoutineConfig, registry: ModelRegistry) -> Self {
        let tokio_runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_count.max(1))
            .enable_all()
            .build()
            .expect("Failed to create Tokio runtime");

        Self {
            config,
            registry: Arc::new(registry),
            tokio_runtime,
        }
    }

    /// Fit every pixel of a volume, blocking until done.
    ///
    /// Per-pixel data errors are logged and leave that cell empty; they
    /// never abort the batch.
    pub fn fit_volume(
        &self,
        volume: &SpectraVolume,
        kind: ModelKind,
        seed_params: &FitParams,
        calibration: &EnergyCalibration,
        elements: &[FitElement],
        energy_range: EnergyRange,
    ) -> Result<FitGrid, FitError> {
        if !self.registry.contains(kind) {
            return Err(FitError::UnknownModel(kind.name()));
        }

        let cols = volume.cols();
        let mut grid = FitGrid::new(volume.rows(), cols);
        grid.cells_mut()
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, cell)| {
                let (row, col) = (i / cols, i % cols);
                let spectrum = match volume.get(row, col) {
                    Ok(s) => s,
                    Err(_) => return,
                };
                let Some(mut model) = self.registry.create(kind) else {
                    return;
                };
                let mut params = seed_params.clone();
                match fit_pixel(
                    model.as_mut(),
                    &mut params,
                    spectrum,
                    calibration,
                    elements,
                    energy_range,
                ) {
                    Ok(fit) => *cell = fit,
                    Err(err) => warn!(row, col, %err, "pixel fit skipped"),
                }
            });
        Ok(grid)
    }

    /// Fit every pixel of a volume asynchronously with callbacks.
    ///
    /// A fixed pool of `worker_count` tasks consumes the row-major pixel
    /// queue. `on_pixel` fires per completed fit, `on_progress` with the
    /// running completion count, and `on_complete` once with the filled
    /// grid. Completion order is unspecified; grid indexing is not.
    #[allow(clippy::too_many_arguments)]
    pub fn fit_volume_async<F, P, S>(
        &self,
        volume: Arc<SpectraVolume>,
        kind: ModelKind,
        seed_params: FitParams,
        calibration: EnergyCalibration,
        elements: Arc<Vec<FitElement>>,
        energy_range: EnergyRange,
        on_complete: F,
        on_progress: P,
        on_pixel: S,
    ) where
        F: FnOnce(FitGrid) + Send + 'static,
        P: Fn(usize, usize) + Send + Sync + 'static,
        S: Fn(usize, usize, &PixelFit) + Send + Sync + 'static,
    {
        let queue = Arc::new(PixelQueue::for_grid(volume.rows(), volume.cols()));
        let grid = Arc::new(Mutex::new(FitGrid::new(volume.rows(), volume.cols())));
        let done = Arc::new(AtomicUsize::new(0));
        let total = queue.total();
        let workers = self.config.worker_count.max(1);
        let registry = self.registry.clone();
        let on_progress = Arc::new(on_progress);
        let on_pixel = Arc::new(on_pixel);

        self.tokio_runtime.spawn(async move {
            let mut handles = Vec::with_capacity(workers);
            for _ in 0..workers {
                let queue = queue.clone();
                let grid = grid.clone();
                let done = done.clone();
                let registry = registry.clone();
                let volume = volume.clone();
                let elements = elements.clone();
                let seed_params = seed_params.clone();
                let on_progress = on_progress.clone();
                let on_pixel = on_pixel.clone();

                handles.push(tokio::spawn(async move {
                    while let Some(item) = queue.pop() {
                        let spectrum = match volume.get(item.row, item.col) {
                            Ok(s) => s,
                            Err(_) => continue,
                        };
                        let Some(mut model) = registry.create(kind) else {
                            continue;
                        };
                        let mut params = seed_params.clone();
                        match fit_pixel(
                            model.as_mut(),
                            &mut params,
                            spectrum,
                            &calibration,
                            elements.as_slice(),
                            energy_range,
                        ) {
                            Ok(fit) => {
                                on_pixel(item.row, item.col, &fit);
                                let _ = grid.lock().unwrap().set(item.row, item.col, fit);
                            }
                            Err(err) => {
                                warn!(row = item.row, col = item.col, %err, "pixel fit skipped")
                            }
                        }
                        let completed = done.fetch_add(1, Ordering::SeqCst) + 1;
                        on_progress(completed, total);
                    }
                }));
            }
            for handle in handles {
                let _ = handle.await;
            }

            let grid = match Arc::try_unwrap(grid) {
                Ok(mutex) => mutex.into_inner().unwrap(),
                Err(arc) => arc.lock().unwrap().clone(),
            };
            on_complete(grid);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{FitElement, Spectrum};
    use crate::fitting::{FitModel, SvdModel};
    use ndarray::Array1;

    fn small_scene() -> (
        SpectraVolume,
        FitParams,
        EnergyCalibration,
        Vec<FitElement>,
        EnergyRange,
        Vec<f64>,
    ) {
        let calibration = EnergyCalibration::new(0.0, 0.01, 0.0);
        let elements = vec![
            FitElement::from_symbol("Ca").unwrap(),
            FitElement::from_symbol("Fe").unwrap(),
        ];
        let range = EnergyRange::new(0, 1023);

        let mut model = SvdModel::new();
        let mut params = model.fit_parameters(&elements);
        model
            .initialize(&mut params, &calibration, &elements, range)
            .unwrap();
        let ev = calibration.energy_vector_range(range);
        let ca = model.model_spectrum_element(&params, &elements[0], &calibration, &ev);
        let fe = model.model_spectrum_element(&params, &elements[1], &calibration, &ev);

        // Four pixels with distinct Ca amplitudes.
        let amps = vec![10.0, 20.0, 30.0, 40.0];
        let spectra: Vec<Spectrum> = amps
            .iter()
            .map(|&a| Spectrum::from_counts(&(&ca * a) + &(&fe * 5.0)))
            .collect();
        let volume = SpectraVolume::from_spectra(2, 2, spectra).unwrap();
        (volume, params, calibration, elements, range, amps)
    }

    #[test]
    fn test_fit_volume_fills_every_cell() {
        let (volume, params, calibration, elements, range, amps) = small_scene();
        let routine = FitRoutine::new(FitRoutineConfig { worker_count: 2 });

        let grid = routine
            .fit_volume(&volume, ModelKind::Svd, &params, &calibration, &elements, range)
            .unwrap();

        assert_eq!(grid.rows(), 2);
        assert_eq!(grid.cols(), 2);
        for (i, (row, col)) in [(0, 0), (0, 1), (1, 0), (1, 1)].iter().enumerate() {
            let fit = grid.get(*row, *col).unwrap();
            let ca = fit.get("Ca").unwrap();
            assert!(
                (ca - amps[i]).abs() < 1e-6,
                "pixel ({row},{col}): Ca {ca}, expected {}",
                amps[i]
            );
            let fe = fit.get("Fe").unwrap();
            assert!((fe - 5.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_unknown_model_kind_is_an_error() {
        let (volume, params, calibration, elements, range, _) = small_scene();
        let routine =
            FitRoutine::with_registry(FitRoutineConfig { worker_count: 1 }, ModelRegistry::new());
        let err = routine
            .fit_volume(&volume, ModelKind::Svd, &params, &calibration, &elements, range)
            .unwrap_err();
        assert!(matches!(err, FitError::UnknownModel(_)));
    }

    #[test]
    fn test_fit_volume_async_reports_and_completes() {
        let (volume, params, calibration, elements, range, amps) = small_scene();
        let routine = FitRoutine::new(FitRoutineConfig { worker_count: 2 });

        let (tx, rx) = std::sync::mpsc::channel();
        let progress = Arc::new(AtomicUsize::new(0));
        let progress_cb = progress.clone();

        routine.fit_volume_async(
            Arc::new(volume),
            ModelKind::Svd,
            params,
            calibration,
            Arc::new(elements),
            range,
            move |grid| {
                tx.send(grid).unwrap();
            },
            move |done, _total| {
                progress_cb.store(done, Ordering::SeqCst);
            },
            |_row, _col, _fit| {},
        );

        let grid = rx
            .recv_timeout(std::time::Duration::from_secs(30))
            .expect("async fit did not complete");
        assert_eq!(progress.load(Ordering::SeqCst), 4);
        let ca = grid.get(1, 1).unwrap().get("Ca").unwrap();
        assert!((ca - amps[3]).abs() < 1e-6);
    }

    #[test]
    fn test_zero_channel_volume_leaves_cells_empty() {
        let calibration = EnergyCalibration::new(0.0, 0.01, 0.0);
        let elements = vec![FitElement::from_symbol("Fe").unwrap()];
        let range = EnergyRange::new(0, 1023);
        let volume = SpectraVolume::new(1, 1, 0);
        let routine = FitRoutine::new(FitRoutineConfig { worker_count: 1 });
        let params = crate::fitting::default_fit_parameters(&elements);

        let grid = routine
            .fit_volume(&volume, ModelKind::Svd, &params, &calibration, &elements, range)
            .unwrap();
        assert!(grid.get(0, 0).unwrap().is_empty());
    }
}
