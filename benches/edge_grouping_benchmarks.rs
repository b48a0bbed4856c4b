use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use eventgraph_core::edges::group_requests;
use eventgraph_core::models::EdgeWriteRequest;

fn mixed_batch(size: usize) -> Vec<EdgeWriteRequest> {
    let types = ["INFLUENCES", "PRIMARY_FILER", "HAS_TRANSCRIPT", "HAS_SECTION"];
    (0..size)
        .map(|i| EdgeWriteRequest::new(types[i % types.len()], format!("src-{i}"), format!("dst-{}", i % 50)))
        .collect()
}

fn benchmark_group_requests(c: &mut Criterion) {
    let mut group = c.benchmark_group("group_requests");
    for size in [100, 500, 2_000] {
        let batch = mixed_batch(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &batch, |b, batch| {
            b.iter(|| group_requests(black_box(batch.clone())))
        });
    }
    group.finish();
}

fn benchmark_single_tuple(c: &mut Criterion) {
    let batch: Vec<EdgeWriteRequest> = (0..250)
        .map(|i| EdgeWriteRequest::new("INFLUENCES", format!("news-{i}"), "AAPL"))
        .collect();
    c.bench_function("group_requests_single_tuple", |b| {
        b.iter(|| group_requests(black_box(batch.clone())))
    });
}

criterion_group!(benches, benchmark_group_requests, benchmark_single_tuple);
criterion_main!(benches);
