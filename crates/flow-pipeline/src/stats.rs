//! 파이프라인 카운터
//!
//! [`PipelineStats`]는 입력별 수신/드롭 수, 사유별 디코딩 에러 수,
//! 익스포터별 템플릿 누락 수를 원자적으로 집계합니다.
//! 모든 증가 연산은 같은 값을 `metrics` 파사드로도 보고하므로,
//! 레코더가 설치되지 않은 환경(테스트)에서도 값을 조회할 수 있습니다.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use ironflow_core::metrics as m;
use serde::Serialize;

use crate::config::DecoderKind;
use crate::error::{DecodeError, DecodeErrorReason};

/// 입력 하나의 수신/드롭 카운터
#[derive(Debug)]
struct InputCounters {
    label: String,
    received: AtomicU64,
    dropped: AtomicU64,
}

/// 파이프라인 전체 카운터
#[derive(Debug)]
pub struct PipelineStats {
    inputs: Vec<InputCounters>,
    decode_errors: [AtomicU64; DecodeErrorReason::COUNT],
    missing_templates: DashMap<IpAddr, AtomicU64>,
    records_decoded: AtomicU64,
    templates_upserted: AtomicU64,
}

impl PipelineStats {
    /// 입력 수만큼 카운터를 준비합니다.
    pub fn new(input_count: usize) -> Self {
        let inputs = (0..input_count)
            .map(|i| InputCounters {
                label: i.to_string(),
                received: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            })
            .collect();

        Self {
            inputs,
            decode_errors: Default::default(),
            missing_templates: DashMap::new(),
            records_decoded: AtomicU64::new(0),
            templates_upserted: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_received(&self, input: usize) {
        if let Some(c) = self.inputs.get(input) {
            c.received.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(m::FLOW_DATAGRAMS_RECEIVED_TOTAL, m::LABEL_INPUT => c.label.clone())
                .increment(1);
        }
    }

    pub(crate) fn record_dropped(&self, input: usize) {
        if let Some(c) = self.inputs.get(input) {
            c.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(m::FLOW_DATAGRAMS_DROPPED_TOTAL, m::LABEL_INPUT => c.label.clone())
                .increment(1);
        }
    }

    pub(crate) fn record_decode_error(&self, err: &DecodeError) {
        let reason = err.reason();
        self.decode_errors[reason.index()].fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::FLOW_DECODE_ERRORS_TOTAL, m::LABEL_REASON => reason.as_str())
            .increment(1);
    }

    pub(crate) fn record_missing_template(&self, exporter: IpAddr) {
        self.missing_templates
            .entry(exporter)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            m::FLOW_MISSING_TEMPLATES_TOTAL,
            m::LABEL_EXPORTER => exporter.to_string()
        )
        .increment(1);
    }

    pub(crate) fn record_decoded(&self, decoder: DecoderKind, count: usize) {
        if count == 0 {
            return;
        }
        self.records_decoded
            .fetch_add(count as u64, Ordering::Relaxed);
        metrics::counter!(m::FLOW_RECORDS_DECODED_TOTAL, m::LABEL_DECODER => decoder.as_str())
            .increment(count as u64);
    }

    pub(crate) fn record_templates_upserted(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.templates_upserted
            .fetch_add(count as u64, Ordering::Relaxed);
        metrics::counter!(m::FLOW_TEMPLATES_UPSERTED_TOTAL).increment(count as u64);
    }

    /// 입력이 수신한 데이터그램 수
    pub fn received(&self, input: usize) -> u64 {
        self.inputs
            .get(input)
            .map_or(0, |c| c.received.load(Ordering::Relaxed))
    }

    /// 인테이크 큐 포화로 드롭된 데이터그램 수
    pub fn dropped(&self, input: usize) -> u64 {
        self.inputs
            .get(input)
            .map_or(0, |c| c.dropped.load(Ordering::Relaxed))
    }

    /// 사유별 디코딩 에러 수
    pub fn decode_errors(&self, reason: DecodeErrorReason) -> u64 {
        self.decode_errors[reason.index()].load(Ordering::Relaxed)
    }

    /// 익스포터별 템플릿 누락 수
    pub fn missing_templates(&self, exporter: IpAddr) -> u64 {
        self.missing_templates
            .get(&exporter)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// 디코딩된 레코드 수
    pub fn records_decoded(&self) -> u64 {
        self.records_decoded.load(Ordering::Relaxed)
    }

    /// 등록/갱신된 템플릿 수
    pub fn templates_upserted(&self) -> u64 {
        self.templates_upserted.load(Ordering::Relaxed)
    }

    /// 현재 값을 직렬화 가능한 스냅샷으로 복사합니다.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self
                .inputs
                .iter()
                .map(|c| c.received.load(Ordering::Relaxed))
                .collect(),
            dropped: self
                .inputs
                .iter()
                .map(|c| c.dropped.load(Ordering::Relaxed))
                .collect(),
            decode_errors: DecodeErrorReason::ALL
                .iter()
                .map(|r| (r.as_str(), self.decode_errors(*r)))
                .collect(),
            missing_templates: self
                .missing_templates
                .iter()
                .map(|entry| (entry.key().to_string(), entry.value().load(Ordering::Relaxed)))
                .collect(),
            records_decoded: self.records_decoded(),
            templates_upserted: self.templates_upserted(),
        }
    }
}

/// 카운터 스냅샷
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    /// 입력 인덱스 순 수신 수
    pub received: Vec<u64>,
    /// 입력 인덱스 순 드롭 수
    pub dropped: Vec<u64>,
    /// 사유별 디코딩 에러 수
    pub decode_errors: BTreeMap<&'static str, u64>,
    /// 익스포터별 템플릿 누락 수
    pub missing_templates: BTreeMap<String, u64>,
    /// 디코딩된 레코드 수
    pub records_decoded: u64,
    /// 등록/갱신된 템플릿 수
    pub templates_upserted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn counters_start_at_zero() {
        let stats = PipelineStats::new(2);
        assert_eq!(stats.received(0), 0);
        assert_eq!(stats.dropped(1), 0);
        assert_eq!(stats.records_decoded(), 0);
        for reason in DecodeErrorReason::ALL {
            assert_eq!(stats.decode_errors(reason), 0);
        }
    }

    #[test]
    fn per_input_counters_are_independent() {
        let stats = PipelineStats::new(2);
        stats.record_received(0);
        stats.record_received(0);
        stats.record_dropped(1);
        assert_eq!(stats.received(0), 2);
        assert_eq!(stats.received(1), 0);
        assert_eq!(stats.dropped(1), 1);
    }

    #[test]
    fn out_of_range_input_is_ignored() {
        let stats = PipelineStats::new(1);
        stats.record_received(5);
        assert_eq!(stats.received(5), 0);
    }

    #[test]
    fn decode_errors_by_reason() {
        let stats = PipelineStats::new(1);
        stats.record_decode_error(&DecodeError::UnsupportedVersion(3));
        stats.record_decode_error(&DecodeError::truncated("header", 20, 4));
        stats.record_decode_error(&DecodeError::truncated("header", 20, 8));
        assert_eq!(stats.decode_errors(DecodeErrorReason::Truncated), 2);
        assert_eq!(stats.decode_errors(DecodeErrorReason::UnsupportedVersion), 1);
        assert_eq!(stats.decode_errors(DecodeErrorReason::MalformedLength), 0);
    }

    #[test]
    fn missing_templates_per_exporter() {
        let stats = PipelineStats::new(1);
        let a = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
        let b = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2));
        stats.record_missing_template(a);
        stats.record_missing_template(a);
        assert_eq!(stats.missing_templates(a), 2);
        assert_eq!(stats.missing_templates(b), 0);
    }

    #[test]
    fn snapshot_reflects_counters() {
        let stats = PipelineStats::new(2);
        stats.record_received(1);
        stats.record_decoded(DecoderKind::Sflow, 3);
        stats.record_templates_upserted(2);
        let snap = stats.snapshot();
        assert_eq!(snap.received, vec![0, 1]);
        assert_eq!(snap.records_decoded, 3);
        assert_eq!(snap.templates_upserted, 2);
        assert_eq!(snap.decode_errors.get("truncated"), Some(&0));
    }
}
