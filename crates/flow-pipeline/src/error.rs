//! 플로우 파이프라인 에러 타입
//!
//! - [`FlowPipelineError`]: 설정, 바인드, 채널 등 파이프라인 운영 에러.
//!   `From<FlowPipelineError> for IronflowError` 변환이 구현되어 있어
//!   상위 레이어에서 `?` 연산자로 전파할 수 있습니다.
//! - [`DecodeError`]: 디코딩 중 발생하는 비치명적 에러.
//!   항상 레코드/셋/데이터그램 단위로 범위가 한정되며 사유별로 카운트됩니다.

use std::fmt;

use ironflow_core::error::{ConfigError, IronflowError, PipelineError};

/// 플로우 파이프라인 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum FlowPipelineError {
    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 소켓 바인드 실패
    #[error("bind error: {addr}: {reason}")]
    Bind {
        /// 바인드 주소
        addr: String,
        /// 실패 사유
        reason: String,
    },

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FlowPipelineError> for IronflowError {
    fn from(err: FlowPipelineError) -> Self {
        match err {
            FlowPipelineError::Config { field, reason } => {
                IronflowError::Config(ConfigError::InvalidValue { field, reason })
            }
            FlowPipelineError::Bind { addr, reason } => {
                IronflowError::Pipeline(PipelineError::BindFailed { addr, reason })
            }
            FlowPipelineError::Channel(reason) => {
                IronflowError::Pipeline(PipelineError::ChannelSend(reason))
            }
            FlowPipelineError::Io(e) => IronflowError::Io(e),
        }
    }
}

/// 디코딩 에러 사유 (메트릭 레이블)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeErrorReason {
    /// 길이 필드가 실제 데이터와 맞지 않음
    MalformedLength,
    /// 템플릿을 찾을 수 없음
    UnknownTemplate,
    /// 페이로드가 헤더가 선언한 것보다 짧음
    Truncated,
    /// 해석할 수 없는 필드 길이
    UnsupportedField,
    /// 지원하지 않는 프로토콜 버전
    UnsupportedVersion,
}

impl DecodeErrorReason {
    /// 사유 개수
    pub const COUNT: usize = 5;

    /// 모든 사유 (인덱스 순서)
    pub const ALL: [DecodeErrorReason; Self::COUNT] = [
        Self::MalformedLength,
        Self::UnknownTemplate,
        Self::Truncated,
        Self::UnsupportedField,
        Self::UnsupportedVersion,
    ];

    /// 메트릭 레이블 문자열을 반환합니다.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedLength => "malformed_length",
            Self::UnknownTemplate => "unknown_template",
            Self::Truncated => "truncated",
            Self::UnsupportedField => "unsupported_field",
            Self::UnsupportedVersion => "unsupported_version",
        }
    }

    /// 카운터 배열 인덱스
    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for DecodeErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 비치명적 디코딩 에러
///
/// 디코더는 에러를 만나도 중단하지 않고, 가능한 가장 작은 단위
/// (플로우 레코드 > 셋 > 데이터그램)만 버린 뒤 계속 진행합니다.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// 길이 필드 불일치
    #[error("malformed length in {context}: declared {declared}, available {available}")]
    MalformedLength {
        /// 에러 위치 (flowset, sample, record 등)
        context: &'static str,
        /// 선언된 길이
        declared: usize,
        /// 실제 남은 길이
        available: usize,
    },

    /// 템플릿 미등록
    #[error("unknown template {template_id} in domain {domain}")]
    UnknownTemplate {
        /// 관측 도메인 (v9 source id / IPFIX observation domain)
        domain: u32,
        /// 템플릿 ID
        template_id: u16,
    },

    /// 페이로드 잘림
    #[error("truncated {context}: need {needed} bytes, have {available}")]
    Truncated {
        /// 에러 위치
        context: &'static str,
        /// 필요한 바이트 수
        needed: usize,
        /// 실제 바이트 수
        available: usize,
    },

    /// 해석할 수 없는 필드
    #[error("unsupported field {field_type} with length {length}")]
    UnsupportedField {
        /// 필드 타입 ID
        field_type: u16,
        /// 선언된 길이
        length: usize,
    },

    /// 지원하지 않는 버전
    #[error("unsupported version {0}")]
    UnsupportedVersion(u32),
}

impl DecodeError {
    /// 에러 사유를 반환합니다.
    pub fn reason(&self) -> DecodeErrorReason {
        match self {
            Self::MalformedLength { .. } => DecodeErrorReason::MalformedLength,
            Self::UnknownTemplate { .. } => DecodeErrorReason::UnknownTemplate,
            Self::Truncated { .. } => DecodeErrorReason::Truncated,
            Self::UnsupportedField { .. } => DecodeErrorReason::UnsupportedField,
            Self::UnsupportedVersion(_) => DecodeErrorReason::UnsupportedVersion,
        }
    }

    pub(crate) fn truncated(context: &'static str, needed: usize, available: usize) -> Self {
        Self::Truncated {
            context,
            needed,
            available,
        }
    }

    pub(crate) fn malformed(context: &'static str, declared: usize, available: usize) -> Self {
        Self::MalformedLength {
            context,
            declared,
            available,
        }
    }
}
