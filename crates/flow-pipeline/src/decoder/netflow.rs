//! NetFlow v5 / v9 / IPFIX 디코더
//!
//! 헤더의 버전 필드(5, 9, 10)로 형식을 구분합니다.
//!
//! - v5: 24바이트 헤더 + 48바이트 고정 레코드. 상태 없음.
//! - v9 (RFC 3954): 20바이트 헤더 + flowset. 0 = 템플릿, 1 = 옵션 템플릿, 256 이상 = 데이터.
//! - IPFIX (RFC 7011): 16바이트 헤더 + set. 2 = 템플릿, 3 = 옵션 템플릿, 256 이상 = 데이터.
//!   엔터프라이즈 필드, 가변 길이 필드, 템플릿 철회를 지원합니다.
//!
//! 템플릿은 정의 레코드 전체를 읽은 뒤에만 저장소에 등록됩니다.
//! 옵션 데이터 레코드는 플로우를 만들지 않고, 샘플링 비율만 저장소에 기록합니다.

use std::net::{IpAddr, Ipv4Addr};

use ironflow_core::types::{ETYPE_IPV4, FlowMessage};
use tracing::{debug, trace};

use super::fields::{self, RecordExtras};
use super::{DecodeOutput, FlowDecoder, Reader};
use crate::error::DecodeError;
use crate::template::{FieldSpec, Template, TemplateKey, TemplateKind, TemplateStore};

const V5_HEADER_LEN: usize = 24;
const V5_RECORD_LEN: usize = 48;
const V9_HEADER_LEN: usize = 20;
const IPFIX_HEADER_LEN: usize = 16;
const SET_HEADER_LEN: usize = 4;

const V9_TEMPLATE_SET: u16 = 0;
const V9_OPTIONS_TEMPLATE_SET: u16 = 1;
const IPFIX_TEMPLATE_SET: u16 = 2;
const IPFIX_OPTIONS_TEMPLATE_SET: u16 = 3;
const MIN_DATA_SET_ID: u16 = 256;

const ENTERPRISE_BIT: u16 = 0x8000;

/// NetFlow v5 / v9 / IPFIX 디코더
#[derive(Debug, Clone, Copy, Default)]
pub struct NetflowDecoder;

impl FlowDecoder for NetflowDecoder {
    fn name(&self) -> &'static str {
        "netflow"
    }

    fn decode(
        &self,
        payload: &[u8],
        exporter: IpAddr,
        time_received: u64,
        templates: &TemplateStore,
    ) -> DecodeOutput {
        let mut out = DecodeOutput::default();

        let version = match Reader::new(payload).u16("header") {
            Ok(v) => v,
            Err(e) => {
                out.errors.push(e);
                return out;
            }
        };

        match version {
            5 => decode_v5(payload, exporter, time_received, &mut out),
            9 | 10 => {
                let ipfix = version == 10;
                let (domain, body) = match message_body(payload, ipfix, &mut out) {
                    Some(parts) => parts,
                    None => return out,
                };
                let session = Session {
                    exporter,
                    domain,
                    time_received,
                    templates,
                    ipfix,
                };
                session.decode_sets(body, &mut out);
            }
            other => out.errors.push(DecodeError::UnsupportedVersion(u32::from(other))),
        }

        trace!(
            %exporter,
            version,
            records = out.records.len(),
            errors = out.errors.len(),
            "netflow datagram decoded"
        );
        out
    }
}

fn read_ipv4(r: &mut Reader<'_>, context: &'static str) -> Result<IpAddr, DecodeError> {
    Ok(IpAddr::V4(Ipv4Addr::from(r.u32(context)?)))
}

fn decode_v5(payload: &[u8], exporter: IpAddr, time_received: u64, out: &mut DecodeOutput) {
    let mut r = Reader::new(payload);
    let (count, interval) = match read_v5_header(&mut r) {
        Ok(parts) => parts,
        Err(e) => {
            out.errors.push(e);
            return;
        }
    };
    let sampling_rate = if interval == 0 { 1 } else { u64::from(interval) };

    for _ in 0..count {
        let rec = match r.take(V5_RECORD_LEN, "v5 record") {
            Ok(rec) => rec,
            Err(e) => {
                out.errors.push(e);
                break;
            }
        };
        match read_v5_record(&mut Reader::new(rec), exporter, time_received) {
            Ok(mut msg) => {
                msg.sampling_rate = sampling_rate;
                out.records.push(msg);
            }
            Err(e) => out.errors.push(e),
        }
    }
}

/// v5 헤더를 읽고 (레코드 수, 샘플링 간격)을 반환합니다.
fn read_v5_header(r: &mut Reader<'_>) -> Result<(u16, u16), DecodeError> {
    let mut h = Reader::new(r.take(V5_HEADER_LEN, "v5 header")?);
    let _version = h.u16("v5 header")?;
    let count = h.u16("v5 header")?;
    // sys_uptime, unix_secs, unix_nsecs, flow_sequence, engine type/id
    h.skip(18, "v5 header")?;
    // 상위 2비트는 샘플링 모드
    let interval = h.u16("v5 header")? & 0x3fff;
    Ok((count, interval))
}

fn read_v5_record(
    r: &mut Reader<'_>,
    exporter: IpAddr,
    time_received: u64,
) -> Result<FlowMessage, DecodeError> {
    const CTX: &str = "v5 record";

    let mut msg = FlowMessage::new(exporter, time_received);
    msg.src_addr = read_ipv4(r, CTX)?;
    msg.dst_addr = read_ipv4(r, CTX)?;
    let next_hop = read_ipv4(r, CTX)?;
    if !next_hop.is_unspecified() {
        msg.next_hop = Some(next_hop);
    }
    msg.in_if = u32::from(r.u16(CTX)?);
    msg.out_if = u32::from(r.u16(CTX)?);
    msg.packets = u64::from(r.u32(CTX)?);
    msg.bytes = u64::from(r.u32(CTX)?);
    // first, last
    r.skip(8, CTX)?;
    msg.src_port = r.u16(CTX)?;
    msg.dst_port = r.u16(CTX)?;
    let _pad = r.u8(CTX)?;
    msg.tcp_flags = r.u8(CTX)?;
    msg.proto = r.u8(CTX)?;
    let _tos = r.u8(CTX)?;
    msg.src_as = u32::from(r.u16(CTX)?);
    msg.dst_as = u32::from(r.u16(CTX)?);
    msg.src_mask = r.u8(CTX)?;
    msg.dst_mask = r.u8(CTX)?;
    msg.etype = ETYPE_IPV4;
    Ok(msg)
}

/// v9 / IPFIX 헤더를 읽고 (도메인, set 영역)을 반환합니다.
fn message_body<'a>(
    payload: &'a [u8],
    ipfix: bool,
    out: &mut DecodeOutput,
) -> Option<(u32, &'a [u8])> {
    let mut r = Reader::new(payload);
    let parsed = if ipfix {
        read_ipfix_header(&mut r).map(|(domain, length)| (domain, Some(length)))
    } else {
        read_v9_header(&mut r).map(|domain| (domain, None))
    };
    let (domain, length) = match parsed {
        Ok(parts) => parts,
        Err(e) => {
            out.errors.push(e);
            return None;
        }
    };

    let body_len = match length {
        None => r.remaining(),
        Some(length) if length > payload.len() => {
            out.errors
                .push(DecodeError::truncated("ipfix message", length, payload.len()));
            r.remaining()
        }
        Some(length) => length - IPFIX_HEADER_LEN,
    };
    r.take(body_len, "message body").ok().map(|body| (domain, body))
}

/// v9 헤더를 읽고 source id를 반환합니다.
fn read_v9_header(r: &mut Reader<'_>) -> Result<u32, DecodeError> {
    let mut h = Reader::new(r.take(V9_HEADER_LEN, "v9 header")?);
    // version, count, sys_uptime, unix_secs, sequence
    h.skip(16, "v9 header")?;
    h.u32("v9 header")
}

/// IPFIX 헤더를 읽고 (도메인, 메시지 길이)를 반환합니다.
fn read_ipfix_header(r: &mut Reader<'_>) -> Result<(u32, usize), DecodeError> {
    let mut h = Reader::new(r.take(IPFIX_HEADER_LEN, "ipfix header")?);
    let _version = h.u16("ipfix header")?;
    let length = usize::from(h.u16("ipfix header")?);
    // export_time, sequence
    h.skip(8, "ipfix header")?;
    let domain = h.u32("ipfix header")?;
    if length < IPFIX_HEADER_LEN {
        return Err(DecodeError::malformed("ipfix message", length, r.remaining() + IPFIX_HEADER_LEN));
    }
    Ok((domain, length))
}

/// 데이터그램 하나를 디코딩하는 동안의 문맥
struct Session<'a> {
    exporter: IpAddr,
    domain: u32,
    time_received: u64,
    templates: &'a TemplateStore,
    ipfix: bool,
}

impl Session<'_> {
    fn decode_sets(&self, body: &[u8], out: &mut DecodeOutput) {
        let (template_set, options_set) = if self.ipfix {
            (IPFIX_TEMPLATE_SET, IPFIX_OPTIONS_TEMPLATE_SET)
        } else {
            (V9_TEMPLATE_SET, V9_OPTIONS_TEMPLATE_SET)
        };

        let mut r = Reader::new(body);
        // 4바이트 미만의 꼬리는 패딩으로 간주
        while r.remaining() >= SET_HEADER_LEN {
            let (set_id, set_body) = match next_set(&mut r) {
                Ok(set) => set,
                Err(e) => {
                    out.errors.push(e);
                    break;
                }
            };

            if set_id == template_set {
                self.template_set(set_body, out);
            } else if set_id == options_set {
                self.options_template_set(set_body, out);
            } else if set_id >= MIN_DATA_SET_ID {
                self.data_set(set_id, set_body, out);
            } else {
                trace!(set_id, "skipping reserved set id");
            }
        }
    }

    fn template_set(&self, body: &[u8], out: &mut DecodeOutput) {
        let mut r = Reader::new(body);
        while r.remaining() >= 4 {
            if let Err(e) = self.read_template(&mut r, out) {
                out.errors.push(e);
                break;
            }
        }
    }

    fn read_template(&self, r: &mut Reader<'_>, out: &mut DecodeOutput) -> Result<(), DecodeError> {
        let template_id = r.u16("template")?;
        let field_count = usize::from(r.u16("template")?);
        if field_count == 0 {
            if self.ipfix {
                self.withdraw(template_id);
            }
            return Ok(());
        }
        let fields = self.read_fields(r, field_count)?;
        self.store(template_id, Template::data(fields), out);
        Ok(())
    }

    fn options_template_set(&self, body: &[u8], out: &mut DecodeOutput) {
        let mut r = Reader::new(body);
        // v9 옵션 템플릿 레코드 헤더는 6바이트, IPFIX 철회 레코드는 4바이트
        let min = if self.ipfix { 4 } else { 6 };
        while r.remaining() >= min {
            let result = if self.ipfix {
                self.read_ipfix_options_template(&mut r, out)
            } else {
                self.read_v9_options_template(&mut r, out)
            };
            if let Err(e) = result {
                out.errors.push(e);
                break;
            }
        }
    }

    fn read_v9_options_template(
        &self,
        r: &mut Reader<'_>,
        out: &mut DecodeOutput,
    ) -> Result<(), DecodeError> {
        let template_id = r.u16("options template")?;
        let scope_len = usize::from(r.u16("options template")?);
        let option_len = usize::from(r.u16("options template")?);
        if scope_len % 4 != 0 || option_len % 4 != 0 {
            return Err(DecodeError::malformed(
                "options template",
                scope_len + option_len,
                r.remaining(),
            ));
        }
        let scope_fields = scope_len / 4;
        let fields = self.read_fields(r, scope_fields + option_len / 4)?;
        self.store(template_id, Template::options(scope_fields, fields), out);
        Ok(())
    }

    fn read_ipfix_options_template(
        &self,
        r: &mut Reader<'_>,
        out: &mut DecodeOutput,
    ) -> Result<(), DecodeError> {
        let template_id = r.u16("options template")?;
        let field_count = usize::from(r.u16("options template")?);
        if field_count == 0 {
            self.withdraw(template_id);
            return Ok(());
        }
        let scope_fields = usize::from(r.u16("options template")?);
        if scope_fields > field_count {
            return Err(DecodeError::malformed(
                "options template scope",
                scope_fields,
                field_count,
            ));
        }
        let fields = self.read_fields(r, field_count)?;
        self.store(template_id, Template::options(scope_fields, fields), out);
        Ok(())
    }

    fn read_fields(&self, r: &mut Reader<'_>, count: usize) -> Result<Vec<FieldSpec>, DecodeError> {
        if count * 4 > r.remaining() {
            return Err(DecodeError::malformed("template", count * 4, r.remaining()));
        }

        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let raw_type = r.u16("template field")?;
            let length = r.u16("template field")?;
            let spec = if self.ipfix && raw_type & ENTERPRISE_BIT != 0 {
                FieldSpec {
                    field_type: raw_type & !ENTERPRISE_BIT,
                    length,
                    enterprise: Some(r.u32("template field")?),
                }
            } else {
                FieldSpec::new(raw_type, length)
            };
            if spec.is_variable() && !self.ipfix {
                return Err(DecodeError::malformed("template field", usize::from(length), 0));
            }
            fields.push(spec);
        }
        Ok(fields)
    }

    fn store(&self, template_id: u16, template: Template, out: &mut DecodeOutput) {
        if template_id < MIN_DATA_SET_ID {
            debug!(
                exporter = %self.exporter,
                template_id,
                "ignoring template with reserved id"
            );
            return;
        }
        let key = TemplateKey::new(self.exporter, self.domain, template_id);
        let previous = self.templates.upsert(key, template);
        debug!(
            exporter = %self.exporter,
            domain = self.domain,
            template_id,
            replaced = previous.is_some(),
            "template stored"
        );
        out.templates_upserted += 1;
    }

    fn withdraw(&self, template_id: u16) {
        match template_id {
            IPFIX_TEMPLATE_SET | IPFIX_OPTIONS_TEMPLATE_SET => {
                let removed = self.templates.remove_domain(self.exporter, self.domain);
                debug!(
                    exporter = %self.exporter,
                    domain = self.domain,
                    removed,
                    "all templates withdrawn"
                );
            }
            id if id >= MIN_DATA_SET_ID => {
                let key = TemplateKey::new(self.exporter, self.domain, id);
                if self.templates.remove(&key) {
                    debug!(
                        exporter = %self.exporter,
                        domain = self.domain,
                        template_id = id,
                        "template withdrawn"
                    );
                }
            }
            _ => {}
        }
    }

    fn data_set(&self, set_id: u16, body: &[u8], out: &mut DecodeOutput) {
        let key = TemplateKey::new(self.exporter, self.domain, set_id);
        let Some(template) = self.templates.lookup(&key) else {
            debug!(
                exporter = %self.exporter,
                domain = self.domain,
                template_id = set_id,
                "data set references unknown template, dropping"
            );
            out.errors.push(DecodeError::UnknownTemplate {
                domain: self.domain,
                template_id: set_id,
            });
            return;
        };

        let min_len = template.min_record_len();
        if min_len == 0 {
            out.errors.push(DecodeError::malformed("data set", 0, body.len()));
            return;
        }

        let mut r = Reader::new(body);
        while r.remaining() >= min_len {
            match self.read_record(&mut r, &template) {
                Ok((msg, field_errors)) => {
                    out.errors.extend(field_errors);
                    if let Some(msg) = msg {
                        out.records.push(msg);
                    }
                }
                Err(e) => {
                    out.errors.push(e);
                    break;
                }
            }
        }
    }

    /// 레코드 하나를 읽습니다. 옵션 레코드면 샘플링 비율만 기록하고 `None`을 반환합니다.
    fn read_record(
        &self,
        r: &mut Reader<'_>,
        template: &Template,
    ) -> Result<(Option<FlowMessage>, Vec<DecodeError>), DecodeError> {
        let mut msg = FlowMessage::new(self.exporter, self.time_received);
        let mut extras = RecordExtras::default();
        let mut field_errors = Vec::new();

        // v9 scope 필드 타입은 별도 번호 체계
        let skip = match template.kind {
            TemplateKind::Options { scope_fields } if !self.ipfix => scope_fields,
            _ => 0,
        };

        for (i, field) in template.fields.iter().enumerate() {
            let length = if field.is_variable() {
                match r.u8("variable length")? {
                    255 => usize::from(r.u16("variable length")?),
                    n => usize::from(n),
                }
            } else {
                usize::from(field.length)
            };
            let value = r.take(length, "data record")?;

            if i < skip || field.enterprise.is_some() {
                continue;
            }
            if let Err(e) = fields::apply_field(&mut msg, &mut extras, field.field_type, value) {
                field_errors.push(e);
            }
        }

        let sampler_id = extras.sampler_id.unwrap_or(0);
        let explicit_rate = extras.sampling_rate.filter(|rate| *rate > 0);

        if template.is_options() {
            if let Some(rate) = explicit_rate {
                self.templates
                    .set_sampling_rate(self.exporter, self.domain, sampler_id, rate);
                debug!(
                    exporter = %self.exporter,
                    domain = self.domain,
                    sampler_id,
                    rate,
                    "sampling rate learned from options data"
                );
            }
            return Ok((None, field_errors));
        }

        msg.sampling_rate = explicit_rate
            .or_else(|| {
                self.templates
                    .sampling_rate(self.exporter, self.domain, sampler_id)
            })
            .unwrap_or(1);
        msg.infer_etype();
        Ok((Some(msg), field_errors))
    }
}

fn next_set<'a>(r: &mut Reader<'a>) -> Result<(u16, &'a [u8]), DecodeError> {
    let set_id = r.u16("set header")?;
    let length = usize::from(r.u16("set header")?);
    if length < SET_HEADER_LEN {
        return Err(DecodeError::malformed(
            "set",
            length,
            r.remaining() + SET_HEADER_LEN,
        ));
    }
    let body_len = length - SET_HEADER_LEN;
    if body_len > r.remaining() {
        return Err(DecodeError::truncated("set", body_len, r.remaining()));
    }
    let body = r.take(body_len, "set")?;
    Ok((set_id, body))
}
