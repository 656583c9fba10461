//! Benchmarks for transcript merging.
//!
//! Merging runs once per finalized recognition result while the user is
//! speaking, so it has to stay cheap as the transcript grows. Each case
//! replays a dictation session whose fragments overlap the previous one the
//! way continuous recognizers re-deliver text.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use cortex_dictation::merge;

const PHRASES: [&str; 6] = [
    "the quarterly review is scheduled for thursday",
    "thursday afternoon in the main conference room",
    "room bookings should go through the front desk",
    "desk staff will confirm by email before noon",
    "noon is also the deadline for agenda items",
    "items not on the agenda will be deferred",
];

/// Fragments for a session of `count` finals, each starting with the last
/// word of the previous one.
fn session_fragments(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| PHRASES[i % PHRASES.len()].to_string())
        .collect()
}

fn bench_session_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_session");
    for count in [10usize, 100, 500] {
        let fragments = session_fragments(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &fragments, |b, frags| {
            b.iter(|| {
                let mut transcript = String::new();
                for fragment in frags {
                    transcript = merge(black_box(&transcript), black_box(fragment));
                }
                transcript
            });
        });
    }
    group.finish();
}

fn bench_single_merge_long_transcript(c: &mut Criterion) {
    let transcript = session_fragments(1_000).join(" ");
    c.bench_function("merge_into_long_transcript", |b| {
        b.iter(|| merge(black_box(&transcript), black_box("deferred until next week")));
    });
}

criterion_group!(
    benches,
    bench_session_merge,
    bench_single_merge_long_transcript
);
criterion_main!(benches);
