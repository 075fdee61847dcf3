#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`template`]: NetFlow v9 / IPFIX 템플릿 저장소 (익스포터/도메인별)
//! - [`decoder`]: 프로토콜별 디코더 (NetFlow v5/v9, IPFIX, sFlow v5)
//! - [`listener`]: UDP 소켓 수신 워커와 인테이크 큐
//! - [`dispatch`]: 디코드 워커 풀
//! - [`pipeline`]: 전체 파이프라인 생명주기 (Pipeline trait 구현)
//! - [`stats`]: 입력/디코딩 카운터
//! - [`config`]: 파이프라인 설정 (core 설정 확장)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! UdpSocket -> receive workers -> intake queue -> decode workers -> outgoing queue -> consumer
//!                   |                  |               |                 |
//!              RawDatagram       drop when full   Decoder + Templates   block when full
//! ```

pub mod config;
pub mod decoder;
pub mod dispatch;
pub mod error;
pub mod listener;
pub mod pipeline;
pub mod stats;
pub mod template;

// --- 주요 타입 re-export ---

// 파이프라인
pub use pipeline::{FlowPipeline, FlowPipelineBuilder};

// 설정
pub use config::{DecoderKind, InputConfig, PipelineConfig, PipelineConfigBuilder};

// 에러
pub use error::{DecodeError, DecodeErrorReason, FlowPipelineError};

// 디코더
pub use decoder::{DecodeOutput, Decoder, FlowDecoder, NetflowDecoder, SflowDecoder};

// 템플릿
pub use template::{FieldSpec, Template, TemplateKey, TemplateKind, TemplateStore};

// 수신
pub use listener::{IntakeQueue, RawDatagram};

// 통계
pub use stats::{PipelineStats, StatsSnapshot};
