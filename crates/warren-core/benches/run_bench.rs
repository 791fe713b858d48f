use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use warren_core::{BatchConfig, SimulationRun, SurvivalModel};

fn bench_single_runs(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulation_run");
    let months: u32 = std::env::var("WARREN_BENCH_MONTHS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(120);
    let populations: Vec<u32> = std::env::var("WARREN_BENCH_POPULATIONS")
        .ok()
        .map(|s| s.split(',').filter_map(|t| t.trim().parse().ok()).collect::<Vec<_>>())
        .filter(|v: &Vec<u32>| !v.is_empty())
        .unwrap_or_else(|| vec![2, 1_000, 10_000]);

    for &population in &populations {
        let config = BatchConfig {
            months,
            initial_population: population,
            runs: 1,
            base_seed: 0xBEE5,
            survival_model: SurvivalModel::Static,
            initial_capacity: (population as usize * 4).max(1_024),
            snapshot_runs: 0,
        };
        group.bench_function(format!("pop_{population}_months_{months}"), |b| {
            b.iter_batched(
                || SimulationRun::new(&config, 0),
                |run| run.execute().expect("run"),
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_single_runs);
criterion_main!(benches);
