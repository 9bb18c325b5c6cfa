use criterion::{black_box, criterion_group, criterion_main, Criterion};

use xrfit::{
    fit_pixel, EnergyCalibration, EnergyRange, FitElement, FitModel, GaussTailsModel, ModelKind,
    ModelRegistry, SvdModel,
};

fn scene() -> (EnergyCalibration, Vec<FitElement>, EnergyRange) {
    let calibration = EnergyCalibration::new(0.0, 0.01, 0.0);
    let elements: Vec<FitElement> = ["Ca", "Ti", "Fe", "Cu", "Zn"]
        .iter()
        .filter_map(|s| FitElement::from_symbol(s))
        .collect();
    (calibration, elements, EnergyRange::new(0, 2047))
}

fn bench_model_spectrum(c: &mut Criterion) {
    let (calibration, elements, range) = scene();
    let model = GaussTailsModel::new();
    let params = model.fit_parameters(&elements);

    c.bench_function("gauss_tails_model_spectrum_2048ch", |b| {
        b.iter(|| {
            model
                .model_spectrum(black_box(&params), &calibration, &elements, range)
                .unwrap()
        })
    });
}

fn bench_svd_pixel(c: &mut Criterion) {
    let (calibration, elements, range) = scene();
    let synth = GaussTailsModel::new();
    let mut params = synth.fit_parameters(&elements);
    for element in &elements {
        params.set_value(element.amplitude_name(), 2.0);
    }
    let measured = synth
        .model_spectrum(&params, &calibration, &elements, range)
        .unwrap();
    let registry = ModelRegistry::new_with_defaults();

    c.bench_function("svd_fit_pixel_2048ch_5el", |b| {
        b.iter(|| {
            let mut model = registry.create(ModelKind::Svd).unwrap();
            let mut seed = SvdModel::new().fit_parameters(&elements);
            fit_pixel(
                model.as_mut(),
                &mut seed,
                black_box(&measured),
                &calibration,
                &elements,
                range,
            )
            .unwrap()
        })
    });
}

criterion_group!(benches, bench_model_spectrum, bench_svd_pixel);
criterion_main!(benches);
