//! 정책 변환 및 와일드카드 슬롯 탐색 벤치마크
//!
//! 정책 분류/변환 비용과 슬롯 점유율에 따른 삽입 비용을 측정합니다.

use std::sync::{Arc, Mutex};

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use microseg_core::types::Policy;
use microseg_dataplane::tables::{MemoryExactTable, MemoryWildcardTable};
use microseg_policy::PolicyTables;
use microseg_policy::translate;

fn create_policy(rule_id: u32, src_ip: &str, src_port: u16) -> Policy {
    Policy {
        rule_id,
        src_ip: src_ip.to_owned(),
        dst_ip: "10.0.0.0/24".to_owned(),
        src_port,
        dst_port: 443,
        protocol: "tcp".to_owned(),
        action: "deny".to_owned(),
        priority: 100,
    }
}

fn new_tables() -> PolicyTables {
    PolicyTables::new(
        Arc::new(Mutex::new(MemoryExactTable::new())),
        Arc::new(Mutex::new(MemoryWildcardTable::new())),
    )
}

fn bench_translate(c: &mut Criterion) {
    let mut group = c.benchmark_group("translate");
    group.throughput(Throughput::Elements(1));

    let exact = create_policy(1, "192.168.1.100", 50000);
    let wildcard = create_policy(2, "0.0.0.0/0", 0);

    group.bench_function("classify", |b| {
        b.iter(|| translate::classify(black_box(&wildcard)))
    });

    group.bench_function("to_exact", |b| {
        b.iter(|| translate::to_exact(black_box(&exact)))
    });

    group.bench_function("to_wildcard", |b| {
        b.iter(|| translate::to_wildcard(black_box(&wildcard)))
    });

    let entry = translate::to_wildcard(&wildcard).unwrap();
    group.bench_function("from_wildcard", |b| {
        b.iter(|| translate::from_wildcard(black_box(&entry)))
    });

    group.finish();
}

fn bench_wildcard_insert_occupancy(c: &mut Criterion) {
    let mut group = c.benchmark_group("wildcard_insert");

    // 앞쪽 슬롯이 차 있을수록 빈 슬롯 탐색이 길어짐
    for occupied in [0u32, 100, 500, 999].iter() {
        let tables = new_tables();
        for rule_id in 1..=*occupied {
            tables
                .insert(&create_policy(rule_id, "0.0.0.0/0", 0))
                .unwrap();
        }
        let policy = create_policy(5000, "10.1.0.0/16", 0);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(occupied), occupied, |b, _| {
            b.iter(|| tables.insert(black_box(&policy)))
        });
    }

    group.finish();
}

fn bench_list_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("list_all");

    for count in [10u32, 100, 1000].iter() {
        let tables = new_tables();
        for rule_id in 1..=*count {
            let policy = if rule_id % 2 == 0 {
                create_policy(rule_id, "0.0.0.0/0", 0)
            } else {
                create_policy(rule_id, "192.168.1.100", rule_id as u16)
            };
            tables.insert(&policy).unwrap();
        }

        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| tables.list_all())
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_translate,
    bench_wildcard_insert_occupancy,
    bench_list_all
);
criterion_main!(benches);
