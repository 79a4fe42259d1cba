//! Benchmarks for csenv planning operations.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use csenv::core::addressing::{plan_subnets, SubnetRequest};
use csenv::core::params::DeploymentParams;
use csenv::core::types::{Classification, NetworkBlock, Zone};
use csenv::core::{planner, resolver, topology};

const OWNER: &str = "arn:aws:iam::123456789012:user/bench";

fn zones(n: u8) -> Vec<Zone> {
    (0..n)
        .map(|i| Zone {
            index: i,
            name: format!("us-east-1{}", (b'a' + i) as char),
        })
        .collect()
}

fn bench_plan_subnets(c: &mut Criterion) {
    let block = NetworkBlock {
        name: "vpc".to_string(),
        cidr: "10.1.0.0/16".parse().unwrap(),
        max_azs: 6,
        depends_on: vec![],
    };
    let requests = [
        SubnetRequest::new("public", Classification::Public, 22),
        SubnetRequest::new("private", Classification::Private, 22),
    ];

    let mut group = c.benchmark_group("plan_subnets");
    for n in [1u8, 3, 6] {
        let zs = zones(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &zs, |b, zs| {
            b.iter(|| {
                let subnets = plan_subnets(black_box(&block), zs, &requests).unwrap();
                black_box(subnets);
            });
        });
    }
    group.finish();
}

fn bench_creation_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_creation_order");
    for owners in [1usize, 10, 50] {
        let mut params = DeploymentParams::with_owner(OWNER);
        params.additional_owners = (1..owners)
            .map(|i| format!("arn:aws:iam::123456789012:user/dev-{i:03}"))
            .collect();
        let decls = topology::declare(&params).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(decls.len()), &decls, |b, decls| {
            b.iter(|| {
                let order = resolver::build_creation_order(black_box(decls)).unwrap();
                black_box(order);
            });
        });
    }
    group.finish();
}

fn bench_plan_topology(c: &mut Criterion) {
    let params = DeploymentParams::with_owner(OWNER);
    c.bench_function("plan_topology_default", |b| {
        b.iter(|| {
            let plan = planner::plan_topology(black_box(&params), None).unwrap();
            black_box(plan);
        });
    });
}

fn bench_hash_definition(c: &mut Criterion) {
    let params = DeploymentParams::with_owner(OWNER);
    let decls = topology::declare(&params).unwrap();
    c.bench_function("hash_definition_all", |b| {
        b.iter(|| {
            for entity in decls.iter() {
                black_box(planner::hash_definition(black_box(entity)));
            }
        });
    });
}

criterion_group!(
    benches,
    bench_plan_subnets,
    bench_creation_order,
    bench_plan_topology,
    bench_hash_definition
);
criterion_main!(benches);
