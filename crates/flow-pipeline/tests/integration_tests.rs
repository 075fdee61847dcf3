//! 플로우 파이프라인 통합 테스트
//!
//! 루프백 UDP로 실제 데이터그램을 보내 수신부터 outgoing 큐까지의
//! 전체 경로를 검증합니다.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use ironflow_core::error::{IronflowError, PipelineError};
use ironflow_core::pipeline::Pipeline;
use ironflow_core::types::FlowMessage;
use ironflow_flow_pipeline::{
    DecodeErrorReason, DecoderKind, FlowPipeline, FlowPipelineBuilder, InputConfig,
    PipelineConfig, PipelineConfigBuilder,
};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

// --- 데이터그램 빌더 ---

fn v9_header(count: u16, source_id: u32) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&9u16.to_be_bytes());
    b.extend_from_slice(&count.to_be_bytes());
    b.extend_from_slice(&1_000u32.to_be_bytes());
    b.extend_from_slice(&1_700_000_000u32.to_be_bytes());
    b.extend_from_slice(&1u32.to_be_bytes());
    b.extend_from_slice(&source_id.to_be_bytes());
    b
}

fn flowset(id: u16, body: &[u8]) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&id.to_be_bytes());
    b.extend_from_slice(&((body.len() + 4) as u16).to_be_bytes());
    b.extend_from_slice(body);
    b
}

fn template_flowset(template_id: u16, fields: &[(u16, u16)]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&template_id.to_be_bytes());
    body.extend_from_slice(&(fields.len() as u16).to_be_bytes());
    for (field_type, length) in fields {
        body.extend_from_slice(&field_type.to_be_bytes());
        body.extend_from_slice(&length.to_be_bytes());
    }
    flowset(0, &body)
}

/// IPV4_SRC_ADDR, IPV4_DST_ADDR, L4_SRC_PORT, L4_DST_PORT, PROTOCOL, IN_BYTES, IN_PKTS
const PORTS_LAYOUT: [(u16, u16); 7] = [(8, 4), (12, 4), (7, 2), (11, 2), (4, 1), (1, 4), (2, 4)];

fn ports_record(src_port: u16, dst_port: u16) -> Vec<u8> {
    let mut r = Vec::new();
    r.extend_from_slice(&[10, 0, 0, 1]);
    r.extend_from_slice(&[10, 0, 0, 2]);
    r.extend_from_slice(&src_port.to_be_bytes());
    r.extend_from_slice(&dst_port.to_be_bytes());
    r.push(6);
    r.extend_from_slice(&1500u32.to_be_bytes());
    r.extend_from_slice(&3u32.to_be_bytes());
    r
}

fn v5_datagram(index: u16) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(&5u16.to_be_bytes());
    b.extend_from_slice(&2u16.to_be_bytes());
    b.extend_from_slice(&[0u8; 20]);
    for j in 0..2u16 {
        let mut rec = [0u8; 48];
        rec[0..4].copy_from_slice(&[10, 0, 0, 1]);
        rec[4..8].copy_from_slice(&[10, 0, 0, 2]);
        rec[32..34].copy_from_slice(&(index * 2 + j).to_be_bytes());
        rec[38] = 17;
        b.extend_from_slice(&rec);
    }
    b
}

fn push_u32(b: &mut Vec<u8>, v: u32) {
    b.extend_from_slice(&v.to_be_bytes());
}

fn sflow_sampled_ipv4_sample(rate: u32) -> Vec<u8> {
    let mut record = Vec::new();
    push_u32(&mut record, 100);
    push_u32(&mut record, 17);
    record.extend_from_slice(&[172, 16, 0, 1]);
    record.extend_from_slice(&[172, 16, 0, 2]);
    push_u32(&mut record, 5353);
    push_u32(&mut record, 53);
    push_u32(&mut record, 0);
    push_u32(&mut record, 0);

    let mut body = Vec::new();
    for v in [1, 3, rate, 1000, 0, 1, 2, 1] {
        push_u32(&mut body, v);
    }
    push_u32(&mut body, 3);
    push_u32(&mut body, record.len() as u32);
    body.extend_from_slice(&record);

    let mut sample = Vec::new();
    push_u32(&mut sample, 1);
    push_u32(&mut sample, body.len() as u32);
    sample.extend_from_slice(&body);
    sample
}

fn sflow_malformed_sample() -> Vec<u8> {
    let mut body = Vec::new();
    for v in [1, 3, 10, 0, 0, 1, 2, 1] {
        push_u32(&mut body, v);
    }
    // 레코드 길이가 샘플 경계를 넘음
    push_u32(&mut body, 3);
    push_u32(&mut body, 400);
    body.extend_from_slice(&[0u8; 8]);

    let mut sample = Vec::new();
    push_u32(&mut sample, 1);
    push_u32(&mut sample, body.len() as u32);
    sample.extend_from_slice(&body);
    sample
}

fn sflow_datagram(samples: &[Vec<u8>]) -> Vec<u8> {
    let mut b = Vec::new();
    for v in [5, 1] {
        push_u32(&mut b, v);
    }
    b.extend_from_slice(&[192, 0, 2, 1]);
    for v in [0, 7, 3600, samples.len() as u32] {
        push_u32(&mut b, v);
    }
    for s in samples {
        b.extend_from_slice(s);
    }
    b
}

// --- 헬퍼 ---

fn loopback() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
}

fn single_input(decoder: DecoderKind) -> PipelineConfig {
    PipelineConfigBuilder::new()
        .input(InputConfig::new(decoder, loopback()))
        .outgoing_queue_size(1_000)
        .drain_timeout_secs(2)
        .build()
        .unwrap()
}

async fn started(config: PipelineConfig) -> (FlowPipeline, mpsc::Receiver<FlowMessage>, UdpSocket) {
    let (mut pipeline, rx) = FlowPipelineBuilder::new().config(config).build().unwrap();
    pipeline.start().await.unwrap();
    let exporter = UdpSocket::bind(loopback()).await.unwrap();
    (pipeline, rx, exporter)
}

async fn recv(rx: &mut mpsc::Receiver<FlowMessage>) -> FlowMessage {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for record")
        .expect("outgoing queue closed")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// --- 테스트 ---

#[tokio::test]
async fn netflow_v9_template_then_data_end_to_end() {
    let (mut pipeline, mut rx, exporter) = started(single_input(DecoderKind::Netflow)).await;
    let target = pipeline.local_addrs()[0];

    let mut data = ports_record(40000, 443);
    data.extend(ports_record(40001, 53));
    let mut pkt = v9_header(3, 0);
    pkt.extend(template_flowset(256, &PORTS_LAYOUT));
    pkt.extend(flowset(256, &data));
    exporter.send_to(&pkt, target).await.unwrap();

    let first = recv(&mut rx).await;
    let second = recv(&mut rx).await;
    assert_eq!(first.src_port, 40000);
    assert_eq!(first.dst_port, 443);
    assert_eq!(first.bytes, 1500);
    assert_eq!(first.packets, 3);
    assert_eq!(first.proto, 6);
    assert_eq!(first.exporter_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
    assert_eq!(second.dst_port, 53);

    assert_eq!(pipeline.stats().received(0), 1);
    assert_eq!(pipeline.templates().len(), 1);
    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn unknown_template_is_counted_then_recovers_on_announce() {
    let (mut pipeline, mut rx, exporter) = started(single_input(DecoderKind::Netflow)).await;
    let target = pipeline.local_addrs()[0];
    let exporter_ip = IpAddr::V4(Ipv4Addr::LOCALHOST);

    let mut orphan = v9_header(1, 0);
    orphan.extend(flowset(256, &ports_record(1, 2)));
    exporter.send_to(&orphan, target).await.unwrap();
    wait_until(|| pipeline.stats().missing_templates(exporter_ip) == 1).await;
    assert_eq!(pipeline.stats().records_decoded(), 0);

    let mut announce = v9_header(2, 0);
    announce.extend(template_flowset(256, &PORTS_LAYOUT));
    announce.extend(flowset(256, &ports_record(3, 4)));
    exporter.send_to(&announce, target).await.unwrap();

    let record = recv(&mut rx).await;
    assert_eq!(record.src_port, 3);
    assert_eq!(
        pipeline.stats().decode_errors(DecodeErrorReason::UnknownTemplate),
        1
    );
    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn reannounced_template_changes_layout() {
    let (mut pipeline, mut rx, exporter) = started(single_input(DecoderKind::Netflow)).await;
    let target = pipeline.local_addrs()[0];

    let mut first = v9_header(2, 0);
    first.extend(template_flowset(256, &PORTS_LAYOUT));
    first.extend(flowset(256, &ports_record(10, 20)));
    exporter.send_to(&first, target).await.unwrap();
    assert_eq!(recv(&mut rx).await.dst_port, 20);

    // 같은 ID에 포트 순서를 바꾼 레이아웃
    let mut swapped = PORTS_LAYOUT;
    swapped.swap(2, 3);
    let mut second = v9_header(2, 0);
    second.extend(template_flowset(256, &swapped));
    second.extend(flowset(256, &ports_record(10, 20)));
    exporter.send_to(&second, target).await.unwrap();

    let record = recv(&mut rx).await;
    assert_eq!(record.src_port, 20);
    assert_eq!(record.dst_port, 10);
    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn bind_failure_leaves_nothing_running() {
    let occupied = UdpSocket::bind(loopback()).await.unwrap();
    let taken = occupied.local_addr().unwrap();

    let config = PipelineConfigBuilder::new()
        .input(InputConfig::new(DecoderKind::Netflow, loopback()))
        .input(InputConfig::new(DecoderKind::Sflow, taken))
        .build()
        .unwrap();
    let (mut pipeline, _rx) = FlowPipelineBuilder::new().config(config).build().unwrap();

    let err = pipeline.start().await.unwrap_err();
    assert!(matches!(
        err,
        IronflowError::Pipeline(PipelineError::BindFailed { .. })
    ));
    assert_eq!(pipeline.state_name(), "created");
    assert!(pipeline.local_addrs().is_empty());
    assert!(pipeline.health_check().await.is_unhealthy());
}

#[tokio::test]
async fn stop_drains_enqueued_datagrams_without_loss_or_duplicates() {
    const DATAGRAMS: u16 = 50;

    let (mut pipeline, mut rx, exporter) = started(single_input(DecoderKind::Netflow)).await;
    let target = pipeline.local_addrs()[0];

    for i in 0..DATAGRAMS {
        exporter.send_to(&v5_datagram(i), target).await.unwrap();
    }
    wait_until(|| pipeline.stats().received(0) == u64::from(DATAGRAMS)).await;

    pipeline.stop().await.unwrap();

    let mut ports = Vec::new();
    while let Some(record) = rx.recv().await {
        ports.push(record.src_port);
    }
    let unique: HashSet<u16> = ports.iter().copied().collect();
    assert_eq!(ports.len(), usize::from(DATAGRAMS) * 2);
    assert_eq!(unique.len(), ports.len());
    assert_eq!(pipeline.stats().dropped(0), 0);
}

#[tokio::test]
async fn stop_is_bounded_by_drain_timeout_when_consumer_stalls() {
    let config = PipelineConfigBuilder::new()
        .input(InputConfig::new(DecoderKind::Netflow, loopback()))
        .outgoing_queue_size(1)
        .drain_timeout_secs(1)
        .build()
        .unwrap();
    let (mut pipeline, mut rx, exporter) = started(config).await;
    let target = pipeline.local_addrs()[0];

    for i in 0..4 {
        exporter.send_to(&v5_datagram(i), target).await.unwrap();
    }
    wait_until(|| pipeline.stats().received(0) == 4).await;

    let stopped = tokio::time::timeout(Duration::from_secs(4), pipeline.stop()).await;
    assert!(stopped.is_ok(), "stop must return after the drain timeout");

    // 버려진 작업 이후에도 큐는 닫혀 있어야 함
    let mut delivered = 0;
    while rx.recv().await.is_some() {
        delivered += 1;
    }
    assert!(delivered < 8);
}

#[tokio::test]
async fn injected_record_is_next_on_outgoing_queue() {
    let (mut pipeline, mut rx, _exporter) = started(single_input(DecoderKind::Netflow)).await;

    let mut synthetic = FlowMessage::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)), 42);
    synthetic.exporter_name = "synthetic".to_owned();
    synthetic.bytes = 999;
    synthetic.packets = 1;
    pipeline.inject(synthetic.clone()).await.unwrap();

    assert_eq!(recv(&mut rx).await, synthetic);
    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn malformed_sflow_sample_only_skips_that_sample() {
    let (mut pipeline, mut rx, exporter) = started(single_input(DecoderKind::Sflow)).await;
    let target = pipeline.local_addrs()[0];

    let pkt = sflow_datagram(&[
        sflow_sampled_ipv4_sample(100),
        sflow_malformed_sample(),
        sflow_sampled_ipv4_sample(200),
    ]);
    exporter.send_to(&pkt, target).await.unwrap();

    assert_eq!(recv(&mut rx).await.sampling_rate, 100);
    assert_eq!(recv(&mut rx).await.sampling_rate, 200);
    assert_eq!(
        pipeline.stats().decode_errors(DecodeErrorReason::MalformedLength),
        1
    );
    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn sflow_sample_longer_than_datagram_only_skips_that_sample() {
    let (mut pipeline, mut rx, exporter) = started(single_input(DecoderKind::Sflow)).await;
    let target = pipeline.local_addrs()[0];

    let mut overlong = sflow_sampled_ipv4_sample(150);
    overlong[4..8].copy_from_slice(&0xffffu32.to_be_bytes());
    let pkt = sflow_datagram(&[
        sflow_sampled_ipv4_sample(100),
        overlong,
        sflow_sampled_ipv4_sample(200),
    ]);
    exporter.send_to(&pkt, target).await.unwrap();

    assert_eq!(recv(&mut rx).await.sampling_rate, 100);
    assert_eq!(recv(&mut rx).await.sampling_rate, 200);
    assert_eq!(
        pipeline.stats().decode_errors(DecodeErrorReason::MalformedLength),
        1
    );
    assert_eq!(pipeline.stats().decode_errors(DecodeErrorReason::Truncated), 0);
    pipeline.stop().await.unwrap();
}

#[tokio::test]
async fn multiple_inputs_share_one_outgoing_queue() {
    let config = PipelineConfigBuilder::new()
        .input(InputConfig::new(DecoderKind::Netflow, loopback()))
        .input(InputConfig::new(DecoderKind::Sflow, loopback()))
        .build()
        .unwrap();
    let (mut pipeline, mut rx, exporter) = started(config).await;
    let addrs = pipeline.local_addrs().to_vec();
    assert_eq!(addrs.len(), 2);

    exporter.send_to(&v5_datagram(0), addrs[0]).await.unwrap();
    exporter
        .send_to(&sflow_datagram(&[sflow_sampled_ipv4_sample(8)]), addrs[1])
        .await
        .unwrap();

    let mut records = Vec::new();
    for _ in 0..3 {
        records.push(recv(&mut rx).await);
    }
    assert_eq!(records.iter().filter(|r| r.sampling_rate == 8).count(), 1);
    assert_eq!(pipeline.stats().received(0), 1);
    assert_eq!(pipeline.stats().received(1), 1);
    pipeline.stop().await.unwrap();
}
