//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `ironflow_`
//! - 모듈명: `flow_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(ironflow_core::metrics::FLOW_DATAGRAMS_RECEIVED_TOTAL, "input" => "0").increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 입력 레이블 키 (설정상의 입력 인덱스)
pub const LABEL_INPUT: &str = "input";

/// 디코딩 에러 사유 레이블 키 (malformed_length, unknown_template 등)
pub const LABEL_REASON: &str = "reason";

/// 익스포터 주소 레이블 키
pub const LABEL_EXPORTER: &str = "exporter";

/// 디코더 레이블 키 (netflow, sflow)
pub const LABEL_DECODER: &str = "decoder";

// ─── Flow Pipeline 메트릭 ───────────────────────────────────────────

/// Flow: 수신한 데이터그램 수 (counter, label: input)
pub const FLOW_DATAGRAMS_RECEIVED_TOTAL: &str = "ironflow_flow_datagrams_received_total";

/// Flow: 인테이크 큐 포화로 드롭된 데이터그램 수 (counter, label: input)
pub const FLOW_DATAGRAMS_DROPPED_TOTAL: &str = "ironflow_flow_datagrams_dropped_total";

/// Flow: 사유별 디코딩 에러 수 (counter, label: reason)
pub const FLOW_DECODE_ERRORS_TOTAL: &str = "ironflow_flow_decode_errors_total";

/// Flow: 익스포터별 템플릿 누락 수 (counter, label: exporter)
pub const FLOW_MISSING_TEMPLATES_TOTAL: &str = "ironflow_flow_missing_templates_total";

/// Flow: 디코딩된 레코드 수 (counter, label: decoder)
pub const FLOW_RECORDS_DECODED_TOTAL: &str = "ironflow_flow_records_decoded_total";

/// Flow: 등록/갱신된 템플릿 수 (counter)
pub const FLOW_TEMPLATES_UPSERTED_TOTAL: &str = "ironflow_flow_templates_upserted_total";

/// Flow: 송신 큐에 대기 중인 레코드 수 (gauge)
pub const FLOW_OUTGOING_QUEUE_SIZE: &str = "ironflow_flow_outgoing_queue_size";

/// Flow: 데이터그램 하나의 디코딩 소요 시간 (histogram, 초)
pub const FLOW_DECODE_DURATION_SECONDS: &str = "ironflow_flow_decode_duration_seconds";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "ironflow_daemon_uptime_seconds";

/// Daemon: 설정된 입력 수 (gauge)
pub const DAEMON_INPUTS_CONFIGURED: &str = "ironflow_daemon_inputs_configured";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 디코딩 지연 시간 히스토그램 버킷 (초)
///
/// 1us ~ 10ms 범위, 데이터그램 단위 분포
pub const DECODE_DURATION_BUCKETS: [f64; 9] = [
    0.000_001, 0.000_005, 0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01,
];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `ironflow-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!(
        FLOW_DATAGRAMS_RECEIVED_TOTAL,
        "Total number of UDP datagrams received per input"
    );
    describe_counter!(
        FLOW_DATAGRAMS_DROPPED_TOTAL,
        "Total number of datagrams dropped because the intake queue was full"
    );
    describe_counter!(
        FLOW_DECODE_ERRORS_TOTAL,
        "Total number of non-fatal decode errors by reason"
    );
    describe_counter!(
        FLOW_MISSING_TEMPLATES_TOTAL,
        "Total number of data sets dropped for lack of a template, per exporter"
    );
    describe_counter!(
        FLOW_RECORDS_DECODED_TOTAL,
        "Total number of normalized flow records produced"
    );
    describe_counter!(
        FLOW_TEMPLATES_UPSERTED_TOTAL,
        "Total number of template definitions stored or replaced"
    );
    describe_gauge!(
        FLOW_OUTGOING_QUEUE_SIZE,
        "Current number of records waiting in the outgoing queue"
    );
    describe_histogram!(
        FLOW_DECODE_DURATION_SECONDS,
        "Time to decode a single datagram in seconds"
    );

    describe_gauge!(DAEMON_UPTIME_SECONDS, "Ironflow daemon uptime in seconds");
    describe_gauge!(
        DAEMON_INPUTS_CONFIGURED,
        "Number of flow inputs configured in the daemon"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        FLOW_DATAGRAMS_RECEIVED_TOTAL,
        FLOW_DATAGRAMS_DROPPED_TOTAL,
        FLOW_DECODE_ERRORS_TOTAL,
        FLOW_MISSING_TEMPLATES_TOTAL,
        FLOW_RECORDS_DECODED_TOTAL,
        FLOW_TEMPLATES_UPSERTED_TOTAL,
        FLOW_OUTGOING_QUEUE_SIZE,
        FLOW_DECODE_DURATION_SECONDS,
        DAEMON_UPTIME_SECONDS,
        DAEMON_INPUTS_CONFIGURED,
    ];

    #[test]
    fn all_metrics_start_with_ironflow_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.starts_with("ironflow_"),
                "Metric '{}' does not start with 'ironflow_' prefix",
                name
            );
        }
    }

    #[test]
    fn counters_end_with_total() {
        for name in &ALL_METRIC_NAMES[..6] {
            assert!(name.ends_with("_total"), "counter '{}' lacks _total", name);
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        // 레코더가 설치되지 않아도 패닉하지 않아야 함
        describe_all();
    }

    #[test]
    fn label_keys_are_lowercase() {
        for label in [LABEL_INPUT, LABEL_REASON, LABEL_EXPORTER, LABEL_DECODER] {
            assert_eq!(label.to_lowercase(), label);
        }
    }

    #[test]
    fn decode_duration_buckets_are_sorted() {
        let buckets = DECODE_DURATION_BUCKETS;
        for i in 1..buckets.len() {
            assert!(
                buckets[i] > buckets[i - 1],
                "Bucket values must be in ascending order"
            );
        }
    }
}
