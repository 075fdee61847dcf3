//! 디코더 모듈 -- 프로토콜별 와이어 포맷을 정규화된 [`FlowMessage`]로 변환합니다.
//!
//! [`Decoder`]는 설정 시점에 선택되는 닫힌 집합이며, 각 변형은
//! [`FlowDecoder`] trait을 구현합니다.
//!
//! # 지원 형식
//! - NetFlow v5 / v9, IPFIX ([`NetflowDecoder`], 헤더 버전으로 구분)
//! - sFlow v5 ([`SflowDecoder`])
//!
//! # 에러 정책
//! 디코더는 실패하지 않습니다. 문제가 생긴 가장 작은 단위
//! (플로우 레코드 > 셋/샘플 > 데이터그램)만 버리고, 그 사유를
//! [`DecodeOutput::errors`]에 남긴 뒤 계속 진행합니다.

pub mod fields;
pub mod netflow;
pub mod sflow;

pub use netflow::NetflowDecoder;
pub use sflow::SflowDecoder;

use std::net::IpAddr;

use ironflow_core::types::FlowMessage;

use crate::config::DecoderKind;
use crate::error::DecodeError;
use crate::template::TemplateStore;

/// 데이터그램 하나의 디코딩 결과
#[derive(Debug, Default)]
pub struct DecodeOutput {
    /// 디코딩된 레코드 (데이터그램 내 순서)
    pub records: Vec<FlowMessage>,
    /// 비치명적 에러 (발생 순서)
    pub errors: Vec<DecodeError>,
    /// 등록/갱신된 템플릿 수
    pub templates_upserted: usize,
}

impl DecodeOutput {
    /// 템플릿 누락으로 버려진 데이터 셋 수
    pub fn missing_templates(&self) -> usize {
        self.errors
            .iter()
            .filter(|e| matches!(e, DecodeError::UnknownTemplate { .. }))
            .count()
    }
}

/// 프로토콜 디코더 trait
///
/// 구현체는 상태를 갖지 않으며, NetFlow v9 / IPFIX의 템플릿 상태는
/// 호출자가 넘기는 [`TemplateStore`]에만 보관됩니다.
pub trait FlowDecoder: Send + Sync {
    /// 디코더 이름 (메트릭 레이블)
    fn name(&self) -> &'static str;

    /// 페이로드를 디코딩합니다.
    ///
    /// `exporter`는 UDP 송신자 주소이며, 템플릿 키와 레코드의
    /// 익스포터 식별자로 쓰입니다.
    fn decode(
        &self,
        payload: &[u8],
        exporter: IpAddr,
        time_received: u64,
        templates: &TemplateStore,
    ) -> DecodeOutput;
}

/// 설정으로 선택된 디코더
#[derive(Debug, Clone)]
pub enum Decoder {
    /// NetFlow v5 / v9 / IPFIX
    Netflow(NetflowDecoder),
    /// sFlow v5
    Sflow(SflowDecoder),
}

impl Decoder {
    /// 디코더 종류에 맞는 디코더를 생성합니다.
    pub fn from_kind(kind: DecoderKind) -> Self {
        match kind {
            DecoderKind::Netflow => Self::Netflow(NetflowDecoder),
            DecoderKind::Sflow => Self::Sflow(SflowDecoder),
        }
    }

    /// 디코더 종류를 반환합니다.
    pub fn kind(&self) -> DecoderKind {
        match self {
            Self::Netflow(_) => DecoderKind::Netflow,
            Self::Sflow(_) => DecoderKind::Sflow,
        }
    }
}

impl FlowDecoder for Decoder {
    fn name(&self) -> &'static str {
        match self {
            Self::Netflow(d) => d.name(),
            Self::Sflow(d) => d.name(),
        }
    }

    fn decode(
        &self,
        payload: &[u8],
        exporter: IpAddr,
        time_received: u64,
        templates: &TemplateStore,
    ) -> DecodeOutput {
        match self {
            Self::Netflow(d) => d.decode(payload, exporter, time_received, templates),
            Self::Sflow(d) => d.decode(payload, exporter, time_received, templates),
        }
    }
}

/// 경계 검사를 하는 빅엔디언 바이트 리더
#[derive(Debug, Clone)]
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, n: usize, context: &'static str) -> Result<&'a [u8], DecodeError> {
        if n > self.remaining() {
            return Err(DecodeError::truncated(context, n, self.remaining()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn skip(&mut self, n: usize, context: &'static str) -> Result<(), DecodeError> {
        self.take(n, context).map(|_| ())
    }

    pub(crate) fn u8(&mut self, context: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(1, context)?[0])
    }

    pub(crate) fn u16(&mut self, context: &'static str) -> Result<u16, DecodeError> {
        let b = self.take(2, context)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self, context: &'static str) -> Result<u32, DecodeError> {
        let b = self.take(4, context)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}
