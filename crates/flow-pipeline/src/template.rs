//! 템플릿 저장소 -- NetFlow v9 / IPFIX 필드 레이아웃 캐시
//!
//! 템플릿은 (익스포터 주소, 관측 도메인, 템플릿 ID)를 키로 저장됩니다.
//! [`DashMap`]의 샤드 단위 잠금을 사용하므로 서로 다른 익스포터의
//! 조회가 서로를 막지 않습니다. 값은 `Arc<Template>`로 보관하여
//! 조회 결과가 이후의 갱신과 무관하게 일관된 스냅샷이 되도록 합니다.
//!
//! 템플릿은 만료되지 않으며, IPFIX 템플릿 철회(withdrawal)로만 삭제됩니다.

use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;

/// 가변 길이 필드 표시 (IPFIX, RFC 7011 7절)
pub const VARIABLE_LENGTH: u16 = 0xFFFF;

/// 템플릿 키
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    /// 익스포터 주소
    pub exporter: IpAddr,
    /// 관측 도메인 (v9 source id / IPFIX observation domain id)
    pub domain: u32,
    /// 템플릿 ID (256 이상)
    pub template_id: u16,
}

impl TemplateKey {
    /// 새 키를 생성합니다.
    pub fn new(exporter: IpAddr, domain: u32, template_id: u16) -> Self {
        Self {
            exporter,
            domain,
            template_id,
        }
    }
}

/// 필드 정의
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// 필드 타입 (information element id)
    pub field_type: u16,
    /// 바이트 길이 ([`VARIABLE_LENGTH`]이면 가변)
    pub length: u16,
    /// 엔터프라이즈 번호 (IPFIX 전용)
    pub enterprise: Option<u32>,
}

impl FieldSpec {
    /// 표준 필드 정의를 생성합니다.
    pub fn new(field_type: u16, length: u16) -> Self {
        Self {
            field_type,
            length,
            enterprise: None,
        }
    }

    /// 가변 길이 필드인지 확인합니다.
    pub fn is_variable(&self) -> bool {
        self.length == VARIABLE_LENGTH
    }
}

/// 템플릿 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    /// 플로우 데이터 레코드용
    Data,
    /// 옵션 데이터 레코드용 (앞의 `scope_fields`개 필드가 scope)
    Options {
        /// scope 필드 수
        scope_fields: usize,
    },
}

/// 템플릿 (순서가 있는 필드 목록)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    /// 템플릿 종류
    pub kind: TemplateKind,
    /// 필드 목록 (레코드 내 순서)
    pub fields: Vec<FieldSpec>,
}

impl Template {
    /// 데이터 템플릿을 생성합니다.
    pub fn data(fields: Vec<FieldSpec>) -> Self {
        Self {
            kind: TemplateKind::Data,
            fields,
        }
    }

    /// 옵션 템플릿을 생성합니다.
    pub fn options(scope_fields: usize, fields: Vec<FieldSpec>) -> Self {
        Self {
            kind: TemplateKind::Options { scope_fields },
            fields,
        }
    }

    /// 레코드 하나의 최소 길이 (가변 길이 필드는 길이 접두어 1바이트로 계산)
    pub fn min_record_len(&self) -> usize {
        self.fields
            .iter()
            .map(|f| if f.is_variable() { 1 } else { f.length as usize })
            .sum()
    }

    /// 옵션 템플릿인지 확인합니다.
    pub fn is_options(&self) -> bool {
        matches!(self.kind, TemplateKind::Options { .. })
    }
}

/// 샘플러 키 (익스포터, 도메인, 샘플러 ID)
type SamplerKey = (IpAddr, u32, u64);

/// 파이프라인 인스턴스 범위의 템플릿 저장소
///
/// 모든 디코드 워커가 `Arc<TemplateStore>`로 공유합니다.
/// 어떤 연산도 await 지점을 갖지 않습니다.
#[derive(Debug, Default)]
pub struct TemplateStore {
    templates: DashMap<TemplateKey, Arc<Template>>,
    sampling_rates: DashMap<SamplerKey, u64>,
}

impl TemplateStore {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 템플릿을 등록하거나 교체합니다. 이전 값이 있으면 반환합니다.
    ///
    /// 반환 직후부터 같은 키의 `lookup()`은 새 템플릿을 봅니다.
    pub fn upsert(&self, key: TemplateKey, template: Template) -> Option<Arc<Template>> {
        self.templates.insert(key, Arc::new(template))
    }

    /// 템플릿을 조회합니다.
    pub fn lookup(&self, key: &TemplateKey) -> Option<Arc<Template>> {
        self.templates.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// 템플릿을 삭제합니다 (IPFIX withdrawal).
    pub fn remove(&self, key: &TemplateKey) -> bool {
        self.templates.remove(key).is_some()
    }

    /// 익스포터/도메인의 모든 템플릿을 삭제합니다 (IPFIX all-templates withdrawal).
    pub fn remove_domain(&self, exporter: IpAddr, domain: u32) -> usize {
        let before = self.templates.len();
        self.templates
            .retain(|key, _| !(key.exporter == exporter && key.domain == domain));
        before.saturating_sub(self.templates.len())
    }

    /// 저장된 템플릿 수
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// 저장소가 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// 옵션 데이터에서 얻은 샘플링 비율을 기록합니다.
    pub fn set_sampling_rate(&self, exporter: IpAddr, domain: u32, sampler_id: u64, rate: u64) {
        self.sampling_rates.insert((exporter, domain, sampler_id), rate);
    }

    /// 기록된 샘플링 비율을 조회합니다.
    pub fn sampling_rate(&self, exporter: IpAddr, domain: u32, sampler_id: u64) -> Option<u64> {
        self.sampling_rates
            .get(&(exporter, domain, sampler_id))
            .map(|entry| *entry.value())
    }
}
