//! 디코더 벤치마크
//!
//! NetFlow v5, NetFlow v9 (템플릿 캐시 적중), sFlow v5 디코딩 처리량을 측정합니다.

use std::net::{IpAddr, Ipv4Addr};

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use ironflow_flow_pipeline::{FlowDecoder, NetflowDecoder, SflowDecoder, TemplateStore};

const EXPORTER: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));

fn v5_datagram(records: u16) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&5u16.to_be_bytes());
    b.extend_from_slice(&records.to_be_bytes());
    b.extend_from_slice(&[0u8; 20]);
    for i in 0..records {
        let mut rec = [0u8; 48];
        rec[0..4].copy_from_slice(&[10, 0, (i >> 8) as u8, i as u8]);
        rec[4..8].copy_from_slice(&[10, 1, 0, 1]);
        rec[16..20].copy_from_slice(&10u32.to_be_bytes());
        rec[20..24].copy_from_slice(&15_000u32.to_be_bytes());
        rec[32..34].copy_from_slice(&i.to_be_bytes());
        rec[34..36].copy_from_slice(&443u16.to_be_bytes());
        rec[38] = 6;
        b.extend_from_slice(&rec);
    }
    b
}

/// IPV4_SRC_ADDR, IPV4_DST_ADDR, L4_SRC_PORT, L4_DST_PORT, PROTOCOL, IN_BYTES, IN_PKTS
const LAYOUT: [(u16, u16); 7] = [(8, 4), (12, 4), (7, 2), (11, 2), (4, 1), (1, 4), (2, 4)];

fn v9_set(id: u16, body: &[u8]) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&id.to_be_bytes());
    b.extend_from_slice(&((body.len() + 4) as u16).to_be_bytes());
    b.extend_from_slice(body);
    b
}

fn v9_header() -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&9u16.to_be_bytes());
    b.extend_from_slice(&1u16.to_be_bytes());
    b.extend_from_slice(&[0u8; 16]);
    b
}

fn v9_template() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&256u16.to_be_bytes());
    body.extend_from_slice(&(LAYOUT.len() as u16).to_be_bytes());
    for (t, l) in LAYOUT {
        body.extend_from_slice(&t.to_be_bytes());
        body.extend_from_slice(&l.to_be_bytes());
    }
    let mut pkt = v9_header();
    pkt.extend(v9_set(0, &body));
    pkt
}

fn v9_data(records: u16) -> Vec<u8> {
    let mut body = Vec::new();
    for i in 0..records {
        body.extend_from_slice(&[10, 0, 0, 1, 10, 0, 0, 2]);
        body.extend_from_slice(&i.to_be_bytes());
        body.extend_from_slice(&53u16.to_be_bytes());
        body.push(17);
        body.extend_from_slice(&100u32.to_be_bytes());
        body.extend_from_slice(&1u32.to_be_bytes());
    }
    let mut pkt = v9_header();
    pkt.extend(v9_set(256, &body));
    pkt
}

fn sflow_datagram(samples: u32) -> Vec<u8> {
    let push = |b: &mut Vec<u8>, v: u32| b.extend_from_slice(&v.to_be_bytes());

    let mut record = Vec::new();
    for v in [1400, 6] {
        push(&mut record, v);
    }
    record.extend_from_slice(&[172, 16, 0, 1, 172, 16, 0, 2]);
    for v in [51000, 443, 0x18, 0] {
        push(&mut record, v);
    }

    let mut b = Vec::new();
    for v in [5, 1] {
        push(&mut b, v);
    }
    b.extend_from_slice(&[192, 0, 2, 1]);
    for v in [0, 1, 100, samples] {
        push(&mut b, v);
    }
    for i in 0..samples {
        let mut body = Vec::new();
        for v in [i, 3, 512, 1000, 0, 1, 2, 1, 3, record.len() as u32] {
            push(&mut body, v);
        }
        body.extend_from_slice(&record);
        push(&mut b, 1);
        push(&mut b, body.len() as u32);
        b.extend_from_slice(&body);
    }
    b
}

fn bench_netflow_v5(c: &mut Criterion) {
    let store = TemplateStore::new();
    let mut group = c.benchmark_group("netflow_v5");

    for records in [1u16, 30] {
        let pkt = v5_datagram(records);
        group.throughput(Throughput::Elements(u64::from(records)));
        group.bench_with_input(BenchmarkId::from_parameter(records), &pkt, |b, pkt| {
            b.iter(|| NetflowDecoder.decode(black_box(pkt), EXPORTER, 0, &store))
        });
    }

    group.finish();
}

fn bench_netflow_v9(c: &mut Criterion) {
    let store = TemplateStore::new();
    NetflowDecoder.decode(&v9_template(), EXPORTER, 0, &store);

    let mut group = c.benchmark_group("netflow_v9");

    for records in [1u16, 50] {
        let pkt = v9_data(records);
        group.throughput(Throughput::Elements(u64::from(records)));
        group.bench_with_input(BenchmarkId::new("cached_template", records), &pkt, |b, pkt| {
            b.iter(|| NetflowDecoder.decode(black_box(pkt), EXPORTER, 0, &store))
        });
    }

    // 템플릿 갱신 경로
    let template = v9_template();
    group.throughput(Throughput::Elements(1));
    group.bench_function("template_upsert", |b| {
        b.iter(|| NetflowDecoder.decode(black_box(&template), EXPORTER, 0, &store))
    });

    group.finish();
}

fn bench_sflow(c: &mut Criterion) {
    let store = TemplateStore::new();
    let mut group = c.benchmark_group("sflow_v5");

    for samples in [1u32, 10] {
        let pkt = sflow_datagram(samples);
        group.throughput(Throughput::Elements(u64::from(samples)));
        group.bench_with_input(BenchmarkId::from_parameter(samples), &pkt, |b, pkt| {
            b.iter(|| SflowDecoder.decode(black_box(pkt), EXPORTER, 0, &store))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_netflow_v5, bench_netflow_v9, bench_sflow);
criterion_main!(benches);
