//! Benchmarks for the per-send hot path.
//!
//! Every send canonicalizes, renders, hashes and usually signs before the
//! network is touched; these keep that overhead visible next to a full
//! dispatch against a local mock webhook.

use std::{
    hint::black_box,
    time::{Duration, Instant},
};

use chrono::Utc;
use courier_core::{Action, Settings};
use courier_delivery::{
    canonical::canonicalize,
    dedupe::dedupe_key,
    request::{build_request, RequestInput},
    signing::sign_body,
    SendRequest,
};
use courier_testing::{SettingsBuilder, TestEnv, TEST_SECRET};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::runtime::Runtime;
use uuid::Uuid;

fn bench_canonicalize(c: &mut Criterion) {
    let patterns = Settings::default().strip_params;
    let mut group = c.benchmark_group("canonicalize");

    for params in [0usize, 4, 16] {
        let query: Vec<String> = (0..params)
            .map(|n| if n % 2 == 0 { format!("utm_{n}=x") } else { format!("k{n}=v{n}") })
            .collect();
        let url = format!("https://example.com/article?{}", query.join("&"));

        group.bench_with_input(BenchmarkId::new("params", params), &url, |b, url| {
            b.iter(|| canonicalize(black_box(url), &patterns, None));
        });
    }

    group.finish();
}

fn bench_build_request(c: &mut Criterion) {
    let plain = Settings::default();
    let signed_json = SettingsBuilder::new("https://hook.example/in")
        .json(courier_core::DEFAULT_JSON_TEMPLATE)
        .secret(TEST_SECRET)
        .build();
    let input = RequestInput {
        base_url: "https://example.com/article?id=42",
        title: "An \"escaped\" title",
        selection: Some("line one\nline two"),
        page_metadata: None,
    };
    let now = Utc::now();

    let mut group = c.benchmark_group("build_request");
    group.bench_function("plain", |b| {
        b.iter(|| build_request(black_box(&input), &plain, now, Uuid::nil()));
    });
    group.bench_function("signed_json", |b| {
        b.iter(|| build_request(black_box(&input), &signed_json, now, Uuid::nil()));
    });
    group.finish();
}

fn bench_fingerprints(c: &mut Criterion) {
    let body = "x".repeat(4096);
    let mut group = c.benchmark_group("fingerprint");
    group.bench_function("dedupe_key_4k", |b| {
        b.iter(|| dedupe_key(black_box("https://hook.example/in"), black_box(&body)));
    });
    group.bench_function("hmac_4k", |b| {
        b.iter(|| sign_body(black_box(body.as_bytes()), TEST_SECRET));
    });
    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("dispatch");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("forced_send_200", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let env = TestEnv::new().await.unwrap();
                env.respond_with(200).await;

                let start = Instant::now();
                for n in 0..iters {
                    let request =
                        SendRequest::new(Action::Click, format!("https://example.com/{n}"))
                            .forced(true);
                    env.dispatch(request).await.unwrap();
                }
                start.elapsed()
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_canonicalize, bench_build_request, bench_fingerprints, bench_dispatch);
criterion_main!(benches);
