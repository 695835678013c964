use criterion::{black_box, criterion_group, criterion_main, Criterion};
use roslink_client::cache::fingerprint;
use roslink_client::{CacheConfig, LimiterConfig, ResponseCache, TokenBucketLimiter};
use roslink_common::Priority;
use roslink_metrics::NullSink;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn bench_cache(c: &mut Criterion) {
    let cache = ResponseCache::new(CacheConfig::default());
    let value = json!([{"name": "u1", "profile": "default"}]);
    cache.put(
        fingerprint("/user/print", &json!({})),
        value,
        Duration::from_secs(60),
    );
    let key = fingerprint("/user/print", &json!({}));

    c.bench_function("cache_hit", |b| {
        b.iter(|| black_box(cache.get(black_box(&key))))
    });

    c.bench_function("fingerprint", |b| {
        b.iter(|| {
            black_box(fingerprint(
                black_box("/user/print"),
                black_box(&json!({"filter": "active"})),
            ))
        })
    });
}

fn bench_limiter(c: &mut Criterion) {
    let limiter = TokenBucketLimiter::new(
        LimiterConfig {
            capacity: 1_000_000,
            refill_per_second: 1_000_000.0,
            ..LimiterConfig::default()
        },
        Arc::new(NullSink),
    );

    c.bench_function("limiter_check", |b| {
        b.iter(|| black_box(limiter.check(black_box(Priority::Normal))))
    });
}

criterion_group!(benches, bench_cache, bench_limiter);
criterion_main!(benches);
