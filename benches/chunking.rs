use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use pagesync::chunking::{ChunkingConfig, chunk_text};

pub fn criterion_benchmark(c: &mut Criterion) {
    let paragraph = "Durable sync jobs move page content through chunking, embedding, and \
                     vector persistence. Each phase reports progress and tolerates partial \
                     failure without aborting the run. ";
    let text = paragraph.repeat(500);
    let config = ChunkingConfig::default();

    c.bench_function("chunking", |b| {
        b.iter(|| chunk_text(black_box(&text), black_box(Some("bench-doc")), black_box(&config)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
