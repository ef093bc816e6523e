//! Whole-trace replay benchmarks, one per reclamation mode.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use heapreplay_alloc::SystemBackend;
use heapreplay_core::{Event, ReplayConfig, ReplayMode, Trace, parse_trace, replay};

/// Sliding window of live objects: each step allocates one and frees the
/// object allocated `window` steps earlier.
fn sliding_window(objects: u64, window: u64) -> Vec<Event> {
    let mut events = Vec::with_capacity(objects as usize * 2);
    let mut time = 0;
    for id in 1..=objects {
        events.push(Event::alloc(time, id, 32 + (id % 7) * 48, id % 16));
        time += 1;
        if id > window {
            events.push(Event::free(time, id - window));
            time += 1;
        }
    }
    events
}

fn bench_replay_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay_mode");
    for objects in [1_000_u64, 10_000] {
        let events = sliding_window(objects, 64);
        let trace = Trace {
            end_time: events.last().map_or(0, |e| e.time),
            events,
            ..Trace::default()
        };
        group.throughput(Throughput::Elements(trace.events.len() as u64));
        for mode in ReplayMode::ALL {
            group.bench_with_input(BenchmarkId::new(mode.as_str(), objects), &trace, |b, t| {
                let backend = SystemBackend::new();
                b.iter(|| {
                    let outcome = replay(t, ReplayConfig::new(mode), &backend);
                    criterion::black_box(outcome.statistics.peak_live_bytes);
                });
            });
        }
    }
    group.finish();
}

fn bench_gc_thresholds(c: &mut Criterion) {
    let events = sliding_window(10_000, 256);
    let trace = Trace {
        end_time: events.last().map_or(0, |e| e.time),
        events,
        ..Trace::default()
    };
    let mut group = c.benchmark_group("gc_alloc_count_threshold");
    for threshold in [10_u64, 100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(threshold), &threshold, |b, &n| {
            let backend = SystemBackend::new();
            let config = ReplayConfig::new(ReplayMode::Gc).with_gc_alloc_count_threshold(n);
            b.iter(|| criterion::black_box(replay(&trace, config, &backend).statistics.gc.collections));
        });
    }
    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let mut text = String::from("timestamp,event_type,object_id,size,site_id,thread_id,type_id\n");
    for id in 1..=10_000_u64 {
        text.push_str(&format!("{id},alloc,{id},64,{},0,0\n", id % 32));
        if id > 16 {
            text.push_str(&format!("{id},free,{},,,,\n", id - 16));
        }
    }
    c.bench_function("parse_csv_20k", |b| {
        b.iter(|| criterion::black_box(parse_trace(&text).events.len()));
    });
}

criterion_group!(benches, bench_replay_modes, bench_gc_thresholds, bench_parse);
criterion_main!(benches);
