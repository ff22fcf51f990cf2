use colligo::config::Thresholds;
use colligo::enrichment::{AggregatedEvidence, EnrichmentResult, EnrichmentStatus};
use colligo::gateway::Verdict;
use colligo::scoring::Scorer;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn evidence(providers: usize) -> AggregatedEvidence {
    let results = (0..providers)
        .map(|i| EnrichmentResult {
            provider: format!("provider{}", i),
            verdict: Some(if i % 3 == 0 {
                Verdict::Malicious
            } else {
                Verdict::Suspicious
            }),
            confidence_contribution: (i as i64 * 7) % 50,
            status: if i % 5 == 0 {
                EnrichmentStatus::Failed
            } else {
                EnrichmentStatus::Ok
            },
        })
        .collect();
    AggregatedEvidence {
        group_id: "grp-bench".to_string(),
        results,
        completeness: 0.8,
    }
}

fn bench_scoring(c: &mut Criterion) {
    let scorer = Scorer::new(Thresholds {
        medium: 60,
        high: 90,
    });

    let small = evidence(4);
    c.bench_function("score_4_providers", |b| {
        b.iter(|| scorer.score(black_box(&small)))
    });

    let large = evidence(64);
    c.bench_function("score_64_providers", |b| {
        b.iter(|| scorer.score(black_box(&large)))
    });
}

criterion_group!(benches, bench_scoring);
criterion_main!(benches);
