use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::{ArrayD, IxDyn};
use secagg_fl::{FixedPointConfig, NamedParameters, SecAggServer, SecAggServerConfig};

fn model(n_params: usize, offset: usize) -> NamedParameters {
    let data: Vec<f64> = (0..n_params)
        .map(|j| ((offset * n_params + j) as f64).sin())
        .collect();
    let mut params = NamedParameters::new();
    params.insert("layer.weight", ArrayD::from_shape_vec(IxDyn(&[n_params]), data).unwrap());
    params
}

fn bench_secure_round(c: &mut Criterion) {
    let mut group = c.benchmark_group("secure_round");

    for &n_clients in &[10, 50] {
        for &n_params in &[1_000usize, 100_000] {
            let updates: Vec<NamedParameters> =
                (0..n_clients).map(|i| model(n_params, i)).collect();
            let id = format!("{}c_{}p", n_clients, n_params);

            for num_bytes in [1u32, 4] {
                let fixedpoint = FixedPointConfig::new(num_bytes, 100.0).unwrap();
                let config = SecAggServerConfig::new(fixedpoint);
                group.bench_with_input(
                    BenchmarkId::new(format!("{}byte", num_bytes), &id),
                    &updates,
                    |b, updates| {
                        let mut server =
                            SecAggServer::new(config.clone(), model(n_params, 0)).unwrap();
                        b.iter(|| {
                            server.init_round();
                            for update in updates {
                                server.receive_update_from_client(update, 1.0).unwrap();
                            }
                            server.step().unwrap();
                        })
                    },
                );
            }
        }
    }
    group.finish();
}

criterion_group!(benches, bench_secure_round);
criterion_main!(benches);
