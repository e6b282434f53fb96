use core_numeric::{ExtExp, NORMALIZE_INTERVAL};
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

fn bench_product(c: &mut Criterion) {
    let factors: Vec<f64> = (0..1024).map(|i| 1e-4 + (i as f64) * 1e-7).collect();

    c.bench_function("extexp_product_1k", |b| {
        b.iter(|| {
            let mut product = ExtExp::one();
            for (i, &f) in factors.iter().enumerate() {
                product.mul(black_box(f));
                if i % NORMALIZE_INTERVAL == NORMALIZE_INTERVAL - 1 {
                    product.normalize();
                }
            }
            product.normalize();
            product
        })
    });
}

criterion_group!(benches, bench_product);
criterion_main!(benches);
