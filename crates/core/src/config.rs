//! 설정 관리: ironflow.toml 파싱 및 런타임 설정
//!
//! [`IronflowConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`IRONFLOW_FLOW_OUTGOING_QUEUE_SIZE=50000` 형식)
//! 3. 설정 파일 (`ironflow.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), ironflow_core::error::IronflowError> {
//! use ironflow_core::config::IronflowConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = IronflowConfig::load("ironflow.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = IronflowConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, IronflowError};

/// 지원하는 디코더 이름
pub const DECODER_NAMES: [&str; 2] = ["netflow", "sflow"];

/// Ironflow 통합 설정
///
/// `ironflow.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 모듈은 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IronflowConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 플로우 수집 설정
    #[serde(default)]
    pub flow: FlowConfig,
    /// 메트릭 엔드포인트 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl IronflowConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, IronflowError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, IronflowError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                IronflowError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                IronflowError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, IronflowError> {
        toml::from_str(toml_str).map_err(|e| {
            IronflowError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `IRONFLOW_{SECTION}_{FIELD}`
    /// 입력 목록(`flow.inputs`)은 구조가 복잡하므로 파일에서만 설정합니다.
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "IRONFLOW_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "IRONFLOW_GENERAL_LOG_FORMAT");

        // Flow
        override_usize(
            &mut self.flow.outgoing_queue_size,
            "IRONFLOW_FLOW_OUTGOING_QUEUE_SIZE",
        );
        override_u64(
            &mut self.flow.drain_timeout_secs,
            "IRONFLOW_FLOW_DRAIN_TIMEOUT_SECS",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "IRONFLOW_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "IRONFLOW_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "IRONFLOW_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), IronflowError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_level".to_owned(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            }
            .into());
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "general.log_format".to_owned(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            }
            .into());
        }

        if self.flow.outgoing_queue_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "flow.outgoing_queue_size".to_owned(),
                reason: "must be greater than 0".to_owned(),
            }
            .into());
        }

        if self.flow.inputs.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "flow.inputs".to_owned(),
                reason: "at least one input must be configured".to_owned(),
            }
            .into());
        }

        for (index, input) in self.flow.inputs.iter().enumerate() {
            input.validate(index)?;
        }

        if self.metrics.enabled && self.metrics.endpoint != "/metrics" {
            return Err(ConfigError::InvalidValue {
                field: "metrics.endpoint".to_owned(),
                reason: "only '/metrics' is supported".to_owned(),
            }
            .into());
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// 플로우 수집 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// 입력 목록 (순서가 입력 인덱스가 됨)
    pub inputs: Vec<FlowInputConfig>,
    /// 모든 입력이 공유하는 송신 큐 용량
    pub outgoing_queue_size: usize,
    /// 정지 시 디코드 워커 드레인 최대 대기 시간 (초)
    pub drain_timeout_secs: u64,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            inputs: vec![
                FlowInputConfig {
                    decoder: "netflow".to_owned(),
                    listen: "0.0.0.0:2055".to_owned(),
                    ..Default::default()
                },
                FlowInputConfig {
                    decoder: "sflow".to_owned(),
                    listen: "0.0.0.0:6343".to_owned(),
                    ..Default::default()
                },
            ],
            outgoing_queue_size: 10_000,
            drain_timeout_secs: 5,
        }
    }
}

/// 단일 입력 설정 (디코더 종류 + UDP 전송 설정)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowInputConfig {
    /// 디코더 종류 (netflow, sflow)
    pub decoder: String,
    /// 바인드 주소 (예: "0.0.0.0:2055")
    pub listen: String,
    /// 같은 소켓을 읽는 수신 워커 수
    pub workers: usize,
    /// 인테이크 큐 용량 (데이터그램 단위)
    pub queue_size: usize,
    /// 인테이크 큐를 소비하는 디코드 워커 수
    pub decode_workers: usize,
}

impl Default for FlowInputConfig {
    fn default() -> Self {
        Self {
            decoder: "netflow".to_owned(),
            listen: "0.0.0.0:2055".to_owned(),
            workers: 1,
            queue_size: 100_000,
            decode_workers: 1,
        }
    }
}

impl FlowInputConfig {
    fn validate(&self, index: usize) -> Result<(), ConfigError> {
        let field = |name: &str| format!("flow.inputs[{index}].{name}");

        if !DECODER_NAMES.contains(&self.decoder.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: field("decoder"),
                reason: format!("must be one of: {}", DECODER_NAMES.join(", ")),
            });
        }
        if self.listen.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: field("listen"),
                reason: "listen address must not be empty".to_owned(),
            });
        }
        if self.workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: field("workers"),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.queue_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: field("queue_size"),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.decode_workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: field("decode_workers"),
                reason: "must be greater than 0".to_owned(),
            });
        }
        Ok(())
    }
}

/// 메트릭 엔드포인트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 리슨 주소
    pub listen_addr: String,
    /// 리슨 포트
    pub port: u16,
    /// 스크레이프 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_has_sane_values() {
        let config = IronflowConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.general.log_format, "json");
        assert_eq!(config.flow.inputs.len(), 2);
        assert_eq!(config.flow.inputs[0].decoder, "netflow");
        assert_eq!(config.flow.inputs[1].listen, "0.0.0.0:6343");
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn default_config_passes_validation() {
        IronflowConfig::default().validate().unwrap();
    }

    #[test]
    fn from_str_empty_toml_uses_defaults() {
        let config = IronflowConfig::parse("").unwrap();
        assert_eq!(config.flow.outgoing_queue_size, 10_000);
        assert_eq!(config.flow.drain_timeout_secs, 5);
    }

    #[test]
    fn parse_inputs_array() {
        let toml = r#"
[flow]
outgoing_queue_size = 500

[[flow.inputs]]
decoder = "sflow"
listen = "127.0.0.1:6343"
workers = 4
queue_size = 1000
"#;
        let config = IronflowConfig::parse(toml).unwrap();
        assert_eq!(config.flow.inputs.len(), 1);
        let input = &config.flow.inputs[0];
        assert_eq!(input.decoder, "sflow");
        assert_eq!(input.workers, 4);
        // 지정하지 않은 필드는 기본값
        assert_eq!(input.decode_workers, 1);
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_unknown_decoder() {
        let mut config = IronflowConfig::default();
        config.flow.inputs[0].decoder = "netflow5".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("flow.inputs[0].decoder"));
    }

    #[test]
    fn validate_rejects_zero_queue_size() {
        let mut config = IronflowConfig::default();
        config.flow.inputs[1].queue_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_inputs() {
        let mut config = IronflowConfig::default();
        config.flow.inputs.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_bad_log_format() {
        let mut config = IronflowConfig::default();
        config.general.log_format = "xml".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn parse_rejects_invalid_toml() {
        let result = IronflowConfig::parse("[flow\noutgoing_queue_size = ");
        assert!(matches!(
            result,
            Err(IronflowError::Config(ConfigError::ParseFailed { .. }))
        ));
    }

    #[test]
    #[serial]
    fn env_overrides_flow_section() {
        // SAFETY: serial_test로 환경변수 접근을 직렬화
        unsafe {
            std::env::set_var("IRONFLOW_FLOW_OUTGOING_QUEUE_SIZE", "1234");
            std::env::set_var("IRONFLOW_METRICS_PORT", "not-a-port");
        }
        let mut config = IronflowConfig::default();
        config.apply_env_overrides();
        unsafe {
            std::env::remove_var("IRONFLOW_FLOW_OUTGOING_QUEUE_SIZE");
            std::env::remove_var("IRONFLOW_METRICS_PORT");
        }
        assert_eq!(config.flow.outgoing_queue_size, 1234);
        // 파싱 실패한 값은 무시
        assert_eq!(config.metrics.port, 9100);
    }
}
