//! Per-snapshot cost of the full pipeline and of the metrics stage alone

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use depthscope::alerts::{Alert, AlertCondition};
use depthscope::engine::{EngineSettings, SignalEngine};
use depthscope::features::{MetricsEngine, MetricsSettings, PulseSettings};
use depthscope::types::{AggregatedBar, Book, BookLevel, Candle, Snapshot, Timeframe};

/// Book with `depth` levels per side, sizes skewed towards the touch
fn snapshot(time: i64, close: f64, depth: usize) -> Snapshot {
    let bids = (1..=depth)
        .map(|i| BookLevel::new(close - i as f64 * 0.05, 10.0 / i as f64 + (i % 7) as f64))
        .collect();
    let asks = (1..=depth)
        .map(|i| BookLevel::new(close + i as f64 * 0.05, 8.0 / i as f64 + (i % 5) as f64))
        .collect();
    Snapshot {
        time,
        candle: Candle::new(close, close + 0.3, close - 0.3, close, 5.0),
        book: Some(Book::new(bids, asks)),
    }
}

fn bench_metrics(c: &mut Criterion) {
    let mut group = c.benchmark_group("metrics");
    for depth in [50usize, 500] {
        let snap = snapshot(0, 100.0, depth);
        let bar = AggregatedBar::from_snapshot(0, Timeframe::Min1, &snap);
        let engine = MetricsEngine::default();
        group.bench_function(format!("preview_{}_levels", depth), |b| {
            b.iter(|| black_box(engine.preview(black_box(&bar))));
        });
    }
    group.finish();
}

fn bench_replay(c: &mut Criterion) {
    let feed: Vec<Snapshot> = (0..1_000)
        .map(|i| snapshot(i * 60, 100.0 + (i as f64 * 0.1).sin(), 100))
        .collect();

    c.bench_function("replay_1000_snapshots", |b| {
        b.iter_batched(
            || {
                let mut engine = SignalEngine::new(
                    EngineSettings::default(),
                    MetricsSettings::default(),
                    PulseSettings::default(),
                );
                engine
                    .alerts_mut()
                    .upsert(Alert::threshold("orderbook", "ld_pct", AlertCondition::CrossesAbove, 10.0))
                    .ok();
                (engine, feed.clone())
            },
            |(mut engine, feed)| {
                for snap in feed {
                    let now_ms = snap.time * 1000;
                    black_box(engine.on_snapshot(snap, now_ms));
                }
                black_box(engine.flush(0))
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_metrics, bench_replay);
criterion_main!(benches);
