use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use plugwire::modules::{DependencyResolver, ResolverChain};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug)]
struct TableResolver {
    unit: usize,
}

impl DependencyResolver for TableResolver {
    fn resolve_path(&self, identity: &str) -> Option<PathBuf> {
        identity
            .strip_prefix(&format!("Unit{}.Dep", self.unit))
            .map(|rest| PathBuf::from(format!("/srv/modules/Unit{}/dep{rest}.so", self.unit)))
    }
}

fn chain_with(units: usize) -> ResolverChain {
    let chain = ResolverChain::new();
    for unit in 0..units {
        chain.register(&format!("Unit{unit}"), Arc::new(TableResolver { unit }));
    }
    chain
}

/// Benchmark repeated lookups answered from the resolution cache
fn bench_cache_hits(c: &mut Criterion) {
    let chain = chain_with(16);
    chain.resolve_path("Unit15.Dep/1.0.0", Some("Unit0"));

    c.bench_function("cache_hit", |b| {
        b.iter(|| chain.resolve_path(black_box("Unit15.Dep/1.0.0"), Some("Unit0")));
    });
}

/// Benchmark first-time resolution through the global fallback scan
fn bench_fallback_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("fallback_scan");

    for units in &[4, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(units), units, |b, &units| {
            let last = units - 1;
            b.iter_with_setup(
                || chain_with(units),
                |chain| chain.resolve_path(black_box(&format!("Unit{last}.Dep/1.0.0")), Some("Unit0")),
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cache_hits, bench_fallback_scan);
criterion_main!(benches);
