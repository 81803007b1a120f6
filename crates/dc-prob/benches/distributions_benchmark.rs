use criterion::{Criterion, criterion_group, criterion_main};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::hint::black_box;

fn bench_scalar_distributions(c: &mut Criterion) {
    let xs: Vec<f64> = (0..10_000).map(|i| (i as f64) * 0.001 - 5.0).collect();

    c.bench_function("normal_logpdf_10k", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for &x in &xs {
                acc += dc_prob::normal::logpdf(x, 0.0, 1.3).unwrap();
            }
            black_box(acc)
        })
    });

    let ks: Vec<u64> = (0..10_000).map(|i| 120 + (i % 60) as u64).collect();
    c.bench_function("neg_binomial_logpmf_grad_10k", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for &k in &ks {
                let (lp, d_mu, d_alpha) =
                    dc_prob::neg_binomial::logpmf_mean_disp_and_grad(k, 150.0, 0.01).unwrap();
                acc += lp + d_mu + d_alpha;
            }
            black_box(acc)
        })
    });

    c.bench_function("neg_binomial_sample_10k", |b| {
        let mut rng = StdRng::seed_from_u64(42);
        b.iter(|| {
            let mut acc = 0u64;
            for _ in 0..10_000 {
                acc += dc_prob::neg_binomial::sample_mean_disp(&mut rng, 150.0, 0.01).unwrap();
            }
            black_box(acc)
        })
    });

    c.bench_function("softplus_and_sigmoid_10k", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for &x in &xs {
                let (sp, s) = dc_prob::math::softplus_and_sigmoid(x * 30.0);
                acc += sp + s;
            }
            black_box(acc)
        })
    });
}

criterion_group!(benches, bench_scalar_distributions);
criterion_main!(benches);
