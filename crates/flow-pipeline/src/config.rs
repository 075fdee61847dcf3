//! 플로우 파이프라인 설정
//!
//! [`PipelineConfig`]는 core의 [`FlowConfig`](ironflow_core::config::FlowConfig)를
//! 파이프라인 내부에서 쓰는 타입(디코더 enum, 파싱된 `SocketAddr`)으로 변환한 설정입니다.
//! 시작 이후에는 변경되지 않습니다.
//!
//! # 사용 예시
//! ```ignore
//! use ironflow_core::config::IronflowConfig;
//! use ironflow_flow_pipeline::config::PipelineConfig;
//!
//! let core_config = IronflowConfig::default();
//! let config = PipelineConfig::from_core(&core_config.flow)?;
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FlowPipelineError;

/// 큐 용량 상한
const MAX_QUEUE_SIZE: usize = 10_000_000;
/// 입력당 워커 수 상한
const MAX_WORKERS: usize = 1024;
/// 드레인 타임아웃 상한 (초)
const MAX_DRAIN_TIMEOUT_SECS: u64 = 3600;

/// 디코더 종류
///
/// 설정 시점에 결정되는 닫힌 집합입니다. `netflow`는 헤더의 버전 필드로
/// NetFlow v5, v9, IPFIX를 구분합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoderKind {
    /// NetFlow v5 / v9 / IPFIX
    Netflow,
    /// sFlow v5
    Sflow,
}

impl DecoderKind {
    /// 설정/메트릭에서 쓰는 이름을 반환합니다.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Netflow => "netflow",
            Self::Sflow => "sflow",
        }
    }
}

impl fmt::Display for DecoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecoderKind {
    type Err = FlowPipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "netflow" => Ok(Self::Netflow),
            "sflow" => Ok(Self::Sflow),
            other => Err(FlowPipelineError::Config {
                field: "decoder".to_owned(),
                reason: format!("unknown decoder '{other}'"),
            }),
        }
    }
}

/// 단일 입력 설정
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputConfig {
    /// 디코더 종류
    pub decoder: DecoderKind,
    /// UDP 바인드 주소 (포트 0이면 임의 포트)
    pub listen: SocketAddr,
    /// 같은 소켓을 읽는 수신 워커 수
    pub workers: usize,
    /// 인테이크 큐 용량
    pub queue_size: usize,
    /// 디코드 워커 수
    pub decode_workers: usize,
}

impl InputConfig {
    /// 기본 워커/큐 설정으로 입력을 생성합니다.
    pub fn new(decoder: DecoderKind, listen: SocketAddr) -> Self {
        Self {
            decoder,
            listen,
            workers: 1,
            queue_size: 100_000,
            decode_workers: 1,
        }
    }

    fn validate(&self, index: usize) -> Result<(), FlowPipelineError> {
        let field = |name: &str| format!("inputs[{index}].{name}");

        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(FlowPipelineError::Config {
                field: field("workers"),
                reason: format!("must be 1-{MAX_WORKERS}"),
            });
        }
        if self.decode_workers == 0 || self.decode_workers > MAX_WORKERS {
            return Err(FlowPipelineError::Config {
                field: field("decode_workers"),
                reason: format!("must be 1-{MAX_WORKERS}"),
            });
        }
        if self.queue_size == 0 || self.queue_size > MAX_QUEUE_SIZE {
            return Err(FlowPipelineError::Config {
                field: field("queue_size"),
                reason: format!("must be 1-{MAX_QUEUE_SIZE}"),
            });
        }
        Ok(())
    }
}

/// 플로우 파이프라인 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// 입력 목록 (순서가 입력 인덱스)
    pub inputs: Vec<InputConfig>,
    /// 송신 큐 용량
    pub outgoing_queue_size: usize,
    /// 정지 시 드레인 최대 대기 시간 (초)
    pub drain_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inputs: vec![
                InputConfig::new(DecoderKind::Netflow, SocketAddr::from(([0, 0, 0, 0], 2055))),
                InputConfig::new(DecoderKind::Sflow, SocketAddr::from(([0, 0, 0, 0], 6343))),
            ],
            outgoing_queue_size: 10_000,
            drain_timeout_secs: 5,
        }
    }
}

impl PipelineConfig {
    /// core의 `FlowConfig`에서 파이프라인 설정을 생성합니다.
    ///
    /// 디코더 이름과 리슨 주소를 파싱하며, 실패하면 해당 입력의
    /// 필드명을 담은 `Config` 에러를 반환합니다.
    pub fn from_core(core: &ironflow_core::config::FlowConfig) -> Result<Self, FlowPipelineError> {
        let mut inputs = Vec::with_capacity(core.inputs.len());
        for (index, input) in core.inputs.iter().enumerate() {
            let decoder = input
                .decoder
                .parse::<DecoderKind>()
                .map_err(|_| FlowPipelineError::Config {
                    field: format!("inputs[{index}].decoder"),
                    reason: format!("unknown decoder '{}'", input.decoder),
                })?;
            let listen = input
                .listen
                .parse::<SocketAddr>()
                .map_err(|e| FlowPipelineError::Config {
                    field: format!("inputs[{index}].listen"),
                    reason: format!("invalid socket address '{}': {e}", input.listen),
                })?;
            inputs.push(InputConfig {
                decoder,
                listen,
                workers: input.workers,
                queue_size: input.queue_size,
                decode_workers: input.decode_workers,
            });
        }

        Ok(Self {
            inputs,
            outgoing_queue_size: core.outgoing_queue_size,
            drain_timeout_secs: core.drain_timeout_secs,
        })
    }

    /// 드레인 타임아웃을 `Duration`으로 반환합니다.
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), FlowPipelineError> {
        if self.inputs.is_empty() {
            return Err(FlowPipelineError::Config {
                field: "inputs".to_owned(),
                reason: "at least one input must be configured".to_owned(),
            });
        }

        if self.outgoing_queue_size == 0 || self.outgoing_queue_size > MAX_QUEUE_SIZE {
            return Err(FlowPipelineError::Config {
                field: "outgoing_queue_size".to_owned(),
                reason: format!("must be 1-{MAX_QUEUE_SIZE}"),
            });
        }

        if self.drain_timeout_secs == 0 || self.drain_timeout_secs > MAX_DRAIN_TIMEOUT_SECS {
            return Err(FlowPipelineError::Config {
                field: "drain_timeout_secs".to_owned(),
                reason: format!("must be 1-{MAX_DRAIN_TIMEOUT_SECS}"),
            });
        }

        for (index, input) in self.inputs.iter().enumerate() {
            input.validate(index)?;
        }

        // 포트 0은 매번 다른 포트를 받으므로 중복 검사에서 제외
        for (i, a) in self.inputs.iter().enumerate() {
            if a.listen.port() == 0 {
                continue;
            }
            if self.inputs[..i].iter().any(|b| b.listen == a.listen) {
                return Err(FlowPipelineError::Config {
                    field: format!("inputs[{i}].listen"),
                    reason: format!("duplicate listen address {}", a.listen),
                });
            }
        }

        Ok(())
    }
}

/// 파이프라인 설정 빌더
///
/// 입력 목록이 빈 상태에서 시작하며, `input()`으로 하나씩 추가합니다.
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: PipelineConfig {
                inputs: Vec::new(),
                ..PipelineConfig::default()
            },
        }
    }

    /// 입력을 추가합니다.
    pub fn input(mut self, input: InputConfig) -> Self {
        self.config.inputs.push(input);
        self
    }

    /// 입력 목록 전체를 교체합니다.
    pub fn inputs(mut self, inputs: Vec<InputConfig>) -> Self {
        self.config.inputs = inputs;
        self
    }

    /// 송신 큐 용량을 설정합니다.
    pub fn outgoing_queue_size(mut self, size: usize) -> Self {
        self.config.outgoing_queue_size = size;
        self
    }

    /// 드레인 타임아웃(초)을 설정합니다.
    pub fn drain_timeout_secs(mut self, secs: u64) -> Self {
        self.config.drain_timeout_secs = secs;
        self
    }

    /// 설정을 검증하고 `PipelineConfig`를 생성합니다.
    pub fn build(self) -> Result<PipelineConfig, FlowPipelineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for PipelineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn default_config_is_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn from_core_parses_inputs() {
        let core = ironflow_core::config::FlowConfig::default();
        let config = PipelineConfig::from_core(&core).unwrap();
        assert_eq!(config.inputs.len(), 2);
        assert_eq!(config.inputs[0].decoder, DecoderKind::Netflow);
        assert_eq!(config.inputs[1].decoder, DecoderKind::Sflow);
        assert_eq!(config.inputs[1].listen.port(), 6343);
        assert_eq!(config.outgoing_queue_size, 10_000);
        assert_eq!(config.drain_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn from_core_rejects_bad_listen_address() {
        let mut core = ironflow_core::config::FlowConfig::default();
        core.inputs[1].listen = "not-an-address".to_owned();
        let err = PipelineConfig::from_core(&core).unwrap_err();
        assert!(err.to_string().contains("inputs[1].listen"));
    }

    #[test]
    fn decoder_kind_from_str() {
        assert_eq!("sflow".parse::<DecoderKind>().unwrap(), DecoderKind::Sflow);
        assert!("ipfix".parse::<DecoderKind>().is_err());
        assert_eq!(DecoderKind::Netflow.to_string(), "netflow");
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut config = PipelineConfig::default();
        config.inputs[0].workers = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("inputs[0].workers"));
    }

    #[test]
    fn validate_rejects_duplicate_listen() {
        let config = PipelineConfig {
            inputs: vec![
                InputConfig::new(DecoderKind::Netflow, loopback(2055)),
                InputConfig::new(DecoderKind::Sflow, loopback(2055)),
            ],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_allows_multiple_ephemeral_ports() {
        let config = PipelineConfigBuilder::new()
            .input(InputConfig::new(DecoderKind::Netflow, loopback(0)))
            .input(InputConfig::new(DecoderKind::Sflow, loopback(0)))
            .build();
        assert!(config.is_ok());
    }

    #[test]
    fn builder_requires_an_input() {
        assert!(PipelineConfigBuilder::new().build().is_err());
    }

    #[test]
    fn builder_creates_valid_config() {
        let config = PipelineConfigBuilder::new()
            .input(InputConfig::new(DecoderKind::Netflow, loopback(0)))
            .outgoing_queue_size(16)
            .drain_timeout_secs(2)
            .build()
            .unwrap();
        assert_eq!(config.outgoing_queue_size, 16);
        assert_eq!(config.drain_timeout_secs, 2);
    }

    #[test]
    fn builder_rejects_zero_drain_timeout() {
        let result = PipelineConfigBuilder::new()
            .input(InputConfig::new(DecoderKind::Netflow, loopback(0)))
            .drain_timeout_secs(0)
            .build();
        assert!(result.is_err());
    }
}
