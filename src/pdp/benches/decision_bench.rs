//! Decision engine benchmarks
//!
//! Tracks end-to-end decision latency as the candidate policy set grows,
//! plus the isolated cost of the hot inner pieces: condition evaluation,
//! URI template matching, and decision key fingerprinting.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;
use trellis_pdp::cache::{DecisionCacheKey, InMemoryDecisionCache};
use trellis_pdp::condition::{ConditionContext, ConditionEvaluator};
use trellis_pdp::hierarchy::{Entity, InMemoryEntityStore};
use trellis_pdp::policy::{
    Condition, Effect, InMemoryPolicyStore, Policy, PolicySet, PolicySetSelection, Target,
};
use trellis_pdp::template::{UriTemplate, UriVariables};
use trellis_pdp::types::{Attribute, AttributeSet, EntityRole, PolicyMatchCandidate};
use trellis_pdp::PdpEngine;

fn bench_policy_set(count: usize) -> PolicySet {
    let mut set = PolicySet::new("bench");
    for i in 0..count {
        set = set.with_policy(Policy::new(
            format!("policy-{}", i),
            Target::new(format!("site/{{site_id}}/unit/{}", i), "GET"),
            if i % 2 == 0 { Effect::Permit } else { Effect::Deny },
        ));
    }
    set.with_policy(
        Policy::new(
            "site-operators",
            Target::new("site/{site_id}", "GET"),
            Effect::Permit,
        )
        .with_condition(Condition::new(
            r#"resource.uriVariable("site_id") in subject.attributes("acs", "site")"#,
        )),
    )
}

async fn bench_engine(policy_count: usize, cache_decisions: bool) -> PdpEngine {
    let policies = Arc::new(InMemoryPolicyStore::new());
    policies
        .put_policy_set("acme", bench_policy_set(policy_count))
        .await;

    let entities = Arc::new(InMemoryEntityStore::new());
    entities
        .put(
            "acme",
            EntityRole::Subject,
            Entity::new("agent_mulder").with_attribute(Attribute::new("acs", "site", "boston")),
        )
        .await;

    let mut builder = PdpEngine::builder()
        .policy_store(policies)
        .entity_store(entities);
    if cache_decisions {
        builder = builder.decision_cache(Arc::new(InMemoryDecisionCache::default()));
    }
    builder.build().unwrap()
}

fn bench_decision_evaluation(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("decision_evaluation");

    for policy_count in [10, 100, 1000].iter() {
        group.bench_with_input(
            BenchmarkId::new("policies", policy_count),
            policy_count,
            |b, &count| {
                let engine = rt.block_on(bench_engine(count, false));
                let candidate = PolicyMatchCandidate::new("agent_mulder", "site/boston", "GET");

                b.to_async(&rt).iter(|| async {
                    let decision = engine
                        .evaluate("acme", black_box(&candidate), PolicySetSelection::All)
                        .await
                        .unwrap();
                    black_box(decision);
                });
            },
        );
    }

    group.finish();
}

fn bench_cached_decision(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("cached_decision");

    for policy_count in [10, 100, 1000].iter() {
        group.bench_with_input(
            BenchmarkId::new("policies", policy_count),
            policy_count,
            |b, &count| {
                let engine = rt.block_on(bench_engine(count, true));
                let candidate = PolicyMatchCandidate::new("agent_mulder", "site/boston", "GET");

                // Prime the cache
                rt.block_on(async {
                    engine
                        .evaluate("acme", &candidate, PolicySetSelection::All)
                        .await
                        .unwrap();
                });

                b.to_async(&rt).iter(|| async {
                    let decision = engine
                        .evaluate("acme", black_box(&candidate), PolicySetSelection::All)
                        .await
                        .unwrap();
                    black_box(decision);
                });
            },
        );
    }

    group.finish();
}

fn bench_condition_evaluation(c: &mut Criterion) {
    c.bench_function("condition_evaluation", |b| {
        let evaluator = ConditionEvaluator::new();
        let mut sites = AttributeSet::new();
        sites.insert(Attribute::new("acs", "site", "boston"));
        let ctx = ConditionContext::new()
            .with_subject_attributes(sites)
            .with_uri_variables(UriVariables::from([(
                "site_id".to_string(),
                "boston".to_string(),
            )]))
            .with_action("GET");
        let script = r#"resource.uriVariable("site_id") in subject.attributes("acs", "site")"#;

        // Warm the program cache so the loop measures evaluation alone
        evaluator.evaluate(script, &ctx).unwrap();

        b.iter(|| {
            let allowed = evaluator.evaluate(black_box(script), &ctx).unwrap();
            black_box(allowed);
        });
    });
}

fn bench_template_matching(c: &mut Criterion) {
    c.bench_function("template_matching", |b| {
        let template = UriTemplate::parse("site/{site_id}/asset/{asset_id}").unwrap();

        b.iter(|| {
            let variables = template.matches(black_box("site/boston/asset/hvac-7"));
            black_box(variables);
        });
    });
}

fn bench_decision_fingerprint(c: &mut Criterion) {
    c.bench_function("decision_fingerprint", |b| {
        let key = DecisionCacheKey::new(
            "acme",
            "agent_mulder",
            "site/boston",
            "GET",
            PolicySetSelection::All,
        );

        b.iter(|| {
            let digest = key.fingerprint();
            black_box(digest);
        });
    });
}

criterion_group!(
    benches,
    bench_decision_evaluation,
    bench_cached_decision,
    bench_condition_evaluation,
    bench_template_matching,
    bench_decision_fingerprint
);
criterion_main!(benches);
