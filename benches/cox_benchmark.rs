use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use survival_hazards::{
    AalenAdditiveModel, CovariateTable, CoxModel, KaplanMeierFitter, NelsonAalenFitter,
    RegressionColumns, SurvivalData,
};

fn generate_synthetic_table(n_samples: usize, n_features: usize) -> CovariateTable {
    let mut rng = StdRng::seed_from_u64(42);
    let true_coefficients = [0.5, -0.3, 0.2];

    let mut covariates: Vec<Vec<f64>> = vec![Vec::with_capacity(n_samples); n_features];
    let mut times = Vec::with_capacity(n_samples);
    let mut events = Vec::with_capacity(n_samples);

    for _ in 0..n_samples {
        let row: Vec<f64> = (0..n_features).map(|_| rng.gen_range(-2.0..2.0)).collect();
        let linear_pred: f64 = row.iter().zip(true_coefficients.iter()).map(|(x, b)| x * b).sum();
        for (j, x) in row.into_iter().enumerate() {
            covariates[j].push(x);
        }

        let hazard = linear_pred.exp();
        let time = (-rng.r#gen::<f64>().ln() / (0.1 * hazard)).max(0.1);
        let censoring_time = rng.gen_range(1.0..8.0);
        if time < censoring_time {
            times.push(time);
            events.push(1.0);
        } else {
            times.push(censoring_time);
            events.push(0.0);
        }
    }

    let mut columns = vec![("T".to_string(), times), ("E".to_string(), events)];
    for (j, column) in covariates.into_iter().enumerate() {
        columns.push((format!("x{j}"), column));
    }
    CovariateTable::from_columns(columns).unwrap()
}

fn benchmark_cox_fitting(c: &mut Criterion) {
    let mut group = c.benchmark_group("cox_fitting");
    let roles = RegressionColumns::new("T").with_event("E");

    for &n_samples in [50, 100, 200, 500].iter() {
        for &n_features in [5, 10, 20].iter() {
            group.bench_with_input(
                BenchmarkId::from_parameter(format!("{}x{}", n_samples, n_features)),
                &(n_samples, n_features),
                |b, &(n_samples, n_features)| {
                    let table = generate_synthetic_table(n_samples, n_features);
                    b.iter(|| {
                        let mut model = CoxModel::new().with_max_iterations(100).with_tolerance(1e-4);
                        model.fit(black_box(&table), &roles).unwrap();
                    });
                },
            );
        }
    }
    group.finish();
}

fn benchmark_ridge_fitting(c: &mut Criterion) {
    let mut group = c.benchmark_group("cox_ridge_fitting");
    let table = generate_synthetic_table(200, 15);
    let roles = RegressionColumns::new("T").with_event("E");

    for &l2_penalty in [0.0, 0.1, 1.0].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("l2_{}", l2_penalty)),
            &l2_penalty,
            |b, &l2_penalty| {
                b.iter(|| {
                    let mut model = CoxModel::new().with_l2_penalty(l2_penalty);
                    model.fit(black_box(&table), &roles).unwrap();
                });
            },
        );
    }
    group.finish();
}

fn benchmark_aalen_fitting(c: &mut Criterion) {
    let mut group = c.benchmark_group("aalen_fitting");
    let roles = RegressionColumns::new("T").with_event("E");

    for &n_samples in [50, 100, 200].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(n_samples),
            &n_samples,
            |b, &n_samples| {
                let table = generate_synthetic_table(n_samples, 5);
                b.iter(|| {
                    let mut model = AalenAdditiveModel::new();
                    model.fit(black_box(&table), &roles).unwrap();
                });
            },
        );
    }
    group.finish();
}

fn benchmark_estimators(c: &mut Criterion) {
    let mut group = c.benchmark_group("univariate_estimators");

    for &n_samples in [100, 1000, 10000].iter() {
        let table = generate_synthetic_table(n_samples, 1);
        let events: Vec<bool> = table.column("E").unwrap().iter().map(|&e| e == 1.0).collect();
        let data = SurvivalData::new(table.column("T").unwrap(), events).unwrap();

        group.bench_with_input(BenchmarkId::new("kaplan_meier", n_samples), &data, |b, data| {
            b.iter(|| {
                let mut kmf = KaplanMeierFitter::new();
                kmf.fit(black_box(data)).unwrap();
            });
        });
        group.bench_with_input(BenchmarkId::new("nelson_aalen", n_samples), &data, |b, data| {
            b.iter(|| {
                let mut naf = NelsonAalenFitter::new();
                naf.fit(black_box(data)).unwrap();
            });
        });
    }
    group.finish();
}

fn benchmark_prediction(c: &mut Criterion) {
    use survival_hazards::SurvivalRegression;

    let table = generate_synthetic_table(500, 10);
    let roles = RegressionColumns::new("T").with_event("E");
    let mut model = CoxModel::new();
    model.fit(&table, &roles).unwrap();

    c.bench_function("cox_predict_survival_function", |b| {
        b.iter(|| model.predict_survival_function(black_box(&table)).unwrap())
    });
    c.bench_function("cox_predict_partial_hazard", |b| {
        b.iter(|| model.predict_partial_hazard(black_box(&table)).unwrap())
    });
}

criterion_group!(
    benches,
    benchmark_cox_fitting,
    benchmark_ridge_fitting,
    benchmark_aalen_fitting,
    benchmark_estimators,
    benchmark_prediction
);
criterion_main!(benches);
