use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use engine_gateway::messaging::{
    Enricher, ImageFramePayload, MessagePayload, MetricPayload, MultiQueue,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

fn metric(value: f64) -> MessagePayload {
    let mut metrics = BTreeMap::new();
    metrics.insert("cpu".to_string(), value);
    MessagePayload::Metric(MetricPayload {
        worker_id: None,
        metrics,
    })
}

fn benchmark_enrichment(c: &mut Criterion) {
    let enricher = Enricher::new(Uuid::new_v4());
    c.bench_function("enrich_metric", |b| {
        b.iter(|| black_box(enricher.enrich(metric(1.0))))
    });
}

fn benchmark_enqueue_dequeue(c: &mut Criterion) {
    let enricher = Enricher::new(Uuid::new_v4());
    let mut group = c.benchmark_group("multi_queue_enqueue_dequeue");

    for capacity in [20usize, 200, 2000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                let queue = MultiQueue::new("bench", capacity);
                let message = Arc::new(enricher.enrich(metric(1.0)));
                b.iter(|| {
                    queue.enqueue_envelope(message.clone());
                    black_box(queue.try_dequeue())
                })
            },
        );
    }
    group.finish();
}

fn benchmark_overflow(c: &mut Criterion) {
    let enricher = Enricher::new(Uuid::new_v4());
    let queue = MultiQueue::new("bench", 20);
    let message = Arc::new(enricher.enrich(metric(1.0)));
    for _ in 0..20 {
        queue.enqueue_envelope(message.clone());
    }

    c.bench_function("enqueue_full_lane", |b| {
        b.iter(|| queue.enqueue_envelope(black_box(message.clone())))
    });
}

fn benchmark_image_replacement(c: &mut Criterion) {
    let enricher = Enricher::new(Uuid::new_v4());
    let queue = MultiQueue::new("bench", 20);
    let workers: Vec<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();
    let frames: Vec<_> = workers
        .iter()
        .map(|worker_id| {
            Arc::new(enricher.enrich(MessagePayload::ImageFrame(ImageFramePayload {
                worker_id: *worker_id,
                data: vec![0u8; 4096],
            })))
        })
        .collect();

    c.bench_function("enqueue_keyed_image_frames", |b| {
        b.iter(|| {
            for frame in &frames {
                queue.enqueue_envelope(frame.clone());
            }
        })
    });
}

criterion_group!(
    benches,
    benchmark_enrichment,
    benchmark_enqueue_dequeue,
    benchmark_overflow,
    benchmark_image_replacement
);
criterion_main!(benches);
