//! Benchmarks for instance decoding and deme optimization.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;

use knob_search::{
    compute::{
        BasicReducer, Deme, EvalBudget, ReferenceScorer, Scorer, Strategy,
        deme::sample_at_distance,
        representation::{build_knobs, decode, to_field_layout},
    },
    schema::{CandidateTree, SearchConfig, Signature},
};

fn parity(arity: usize) -> CandidateTree {
    (1..arity).fold(CandidateTree::arg(0), |acc, i| {
        CandidateTree::or(vec![
            CandidateTree::and(vec![acc.clone(), CandidateTree::not_arg(i)]),
            CandidateTree::and(vec![
                CandidateTree::not(acc),
                CandidateTree::arg(i),
            ]),
        ])
    })
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");

    for arity in [2, 4, 8] {
        let exemplar = parity(arity);
        let mapper = build_knobs(&exemplar, 0, Signature::boolean(arity), &BasicReducer).unwrap();
        let layout = to_field_layout(&mapper);
        let center = layout.identity();
        let mut rng = StdRng::seed_from_u64(0);
        let instances: Vec<_> = (0..64)
            .map(|i| sample_at_distance(&layout, &center, 1 + i % layout.len(), &mut rng))
            .collect();

        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_knobs", mapper.len())),
            &arity,
            |b, _| {
                b.iter(|| {
                    for instance in &instances {
                        black_box(decode(black_box(instance), &mapper).unwrap());
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_optimize(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimize");
    group.sample_size(10);

    for algorithm in ["hc", "sa", "un"] {
        let arity = 4;
        let scorer = ReferenceScorer::boolean(&parity(arity), arity).unwrap();
        let mapper = build_knobs(
            &CandidateTree::and(Vec::new()),
            2,
            Signature::boolean(arity),
            &BasicReducer,
        )
        .unwrap();
        let config = SearchConfig {
            algorithm: algorithm.to_string(),
            ..Default::default()
        };
        let strategy = Strategy::from_config(&config).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(algorithm), &algorithm, |b, _| {
            b.iter(|| {
                let budget = EvalBudget::new(500);
                let mut deme = Deme::new(&mapper, &scorer as &dyn Scorer, &BasicReducer, &budget).with_effort(2);
                strategy
                    .optimize(&mut deme, &mut StdRng::seed_from_u64(3))
                    .unwrap();
                black_box(deme.finish(None));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decode, bench_optimize);
criterion_main!(benches);
