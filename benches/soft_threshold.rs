use coexnet::progress::NoopThresholdProgress;
use coexnet::threshold::connectivity;
use coexnet::{ExpressionMatrix, NetworkType, ThresholdInput};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ndarray::Array2;
use rand::distributions::Standard;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_expression(genes: usize, samples: usize) -> ExpressionMatrix {
    let mut rng = StdRng::seed_from_u64(0x5EED_C0E + genes as u64);
    let values = Array2::from_shape_fn((genes, samples), |_| rng.sample(Standard));
    ExpressionMatrix::from_values(values).expect("random expression is finite")
}

fn benchmark_connectivity(c: &mut Criterion) {
    let powers: Vec<f64> = (1..=9).chain([12, 14, 16, 18]).map(|p| p as f64).collect();
    let matrices: Vec<_> = [200_usize, 500, 1000]
        .iter()
        .map(|&genes| (genes, random_expression(genes, 40)))
        .collect();

    let mut group = c.benchmark_group("connectivity");
    for (genes, expr) in matrices.iter() {
        group.throughput(Throughput::Elements((*genes * *genes) as u64));
        for block in [64_usize, *genes] {
            group.bench_with_input(
                BenchmarkId::new(format!("block_{block}"), genes),
                expr,
                |b, input| {
                    b.iter(|| {
                        let mut progress = NoopThresholdProgress;
                        let k = connectivity(
                            ThresholdInput::Expression {
                                expr: black_box(input),
                                weights: None,
                            },
                            &powers,
                            NetworkType::Unsigned,
                            block,
                            &mut progress,
                        )
                        .expect("connectivity");
                        black_box(k);
                    });
                },
            );
        }
    }
    group.finish();
}

criterion_group!(soft_threshold, benchmark_connectivity);
criterion_main!(soft_threshold);
