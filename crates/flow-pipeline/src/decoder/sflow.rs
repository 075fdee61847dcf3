//! sFlow v5 디코더
//!
//! 데이터그램은 자기 완결적인 샘플의 연속이며 외부 상태가 없습니다.
//! 플로우 샘플(1)과 확장 플로우 샘플(3) 하나가 [`FlowMessage`] 하나가 됩니다.
//! 카운터 샘플(2, 4)은 건너뜁니다.
//!
//! 지원하는 플로우 레코드:
//! - 1: raw packet header (Ethernet, 802.1Q, IPv4, IPv6, TCP/UDP)
//! - 3 / 4: sampled IPv4 / IPv6
//! - 1001: extended switch (건너뜀)
//! - 1002: extended router (next hop, 프리픽스 길이)
//! - 1003: extended gateway (AS 번호, BGP next hop)
//!
//! 샘플 내부 길이가 맞지 않으면 그 샘플만 버리고 다음 샘플 경계에서 계속합니다.
//! 샘플 길이가 데이터그램 끝을 넘으면 헤더와 레코드 길이를 따라 실제 샘플 끝을
//! 찾아 그 샘플만 건너뜁니다. 구조로도 끝을 찾을 수 없을 때만 중단합니다.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use etherparse::{
    Ethernet2HeaderSlice, Ipv4HeaderSlice, Ipv6HeaderSlice, SingleVlanHeaderSlice,
    TcpHeaderSlice, UdpHeaderSlice,
};
use ironflow_core::types::{ETYPE_IPV4, ETYPE_IPV6, FlowMessage};
use tracing::trace;

use super::{DecodeOutput, FlowDecoder, Reader};
use crate::error::DecodeError;
use crate::template::TemplateStore;

const SFLOW_VERSION: u32 = 5;

const SAMPLE_FLOW: u32 = 1;
const SAMPLE_COUNTER: u32 = 2;
const SAMPLE_FLOW_EXPANDED: u32 = 3;
const SAMPLE_COUNTER_EXPANDED: u32 = 4;

const RECORD_RAW_HEADER: u32 = 1;
const RECORD_SAMPLED_IPV4: u32 = 3;
const RECORD_SAMPLED_IPV6: u32 = 4;
const RECORD_EXTENDED_SWITCH: u32 = 1001;
const RECORD_EXTENDED_ROUTER: u32 = 1002;
const RECORD_EXTENDED_GATEWAY: u32 = 1003;

const HEADER_PROTOCOL_ETHERNET: u32 = 1;
const HEADER_PROTOCOL_IPV4: u32 = 11;
const HEADER_PROTOCOL_IPV6: u32 = 12;

const ETYPE_VLAN: u16 = 0x8100;
const ETYPE_QINQ: u16 = 0x88a8;

const IP_PROTO_TCP: u8 = 6;
const IP_PROTO_UDP: u8 = 17;

const INTERFACE_MASK: u32 = 0x3fff_ffff;

/// sFlow v5 디코더
#[derive(Debug, Clone, Copy, Default)]
pub struct SflowDecoder;

impl FlowDecoder for SflowDecoder {
    fn name(&self) -> &'static str {
        "sflow"
    }

    fn decode(
        &self,
        payload: &[u8],
        exporter: IpAddr,
        time_received: u64,
        _templates: &TemplateStore,
    ) -> DecodeOutput {
        let mut out = DecodeOutput::default();
        let mut r = Reader::new(payload);

        let sample_count = match read_header(&mut r) {
            Ok(count) => count,
            Err(e) => {
                out.errors.push(e);
                return out;
            }
        };

        for _ in 0..sample_count {
            let (format, body) = match next_sample(&mut r, &mut out.errors) {
                Ok(Some(block)) => block,
                Ok(None) => continue,
                Err(e) => {
                    out.errors.push(e);
                    break;
                }
            };

            let (enterprise, format) = split_format(format);
            if enterprise != 0 {
                trace!(enterprise, format, "skipping vendor sample");
                continue;
            }

            let expanded = match format {
                SAMPLE_FLOW => false,
                SAMPLE_FLOW_EXPANDED => true,
                SAMPLE_COUNTER | SAMPLE_COUNTER_EXPANDED => continue,
                other => {
                    trace!(format = other, "skipping unknown sample format");
                    continue;
                }
            };

            match decode_flow_sample(body, expanded, exporter, time_received, &mut out.errors) {
                Ok(Some(msg)) => out.records.push(msg),
                Ok(None) => {}
                Err(e) => {
                    trace!(%exporter, error = %e, "skipping malformed flow sample");
                    out.errors.push(as_malformed(e, "flow sample"));
                }
            }
        }

        trace!(
            %exporter,
            records = out.records.len(),
            errors = out.errors.len(),
            "sflow datagram decoded"
        );
        out
    }
}

/// 데이터그램 헤더를 읽고 샘플 수를 반환합니다.
fn read_header(r: &mut Reader<'_>) -> Result<u32, DecodeError> {
    let version = r.u32("sflow header")?;
    if version != SFLOW_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let agent = read_address(r, "agent address")?;
    let _sub_agent_id = r.u32("sflow header")?;
    let sequence = r.u32("sflow header")?;
    let _uptime = r.u32("sflow header")?;
    let samples = r.u32("sflow header")?;
    trace!(agent = ?agent, sequence, samples, "sflow header");
    Ok(samples)
}

/// (enterprise, format) 분리
fn split_format(format: u32) -> (u32, u32) {
    (format >> 12, format & 0xfff)
}

/// format(4) + length(4) + body 블록을 읽습니다.
fn next_block<'a>(r: &mut Reader<'a>, context: &'static str) -> Result<(u32, &'a [u8]), DecodeError> {
    let format = r.u32(context)?;
    let length = r.u32(context)? as usize;
    if length > r.remaining() {
        return Err(DecodeError::truncated(context, length, r.remaining()));
    }
    Ok((format, r.take(length, context)?))
}

/// 샘플 블록 하나를 읽습니다.
///
/// 선언된 길이가 남은 바이트보다 길면 [`structural_len`]으로 실제 끝을 찾아
/// 건너뛰고 길이 오류를 기록한 뒤 `Ok(None)`을 반환합니다.
fn next_sample<'a>(
    r: &mut Reader<'a>,
    errors: &mut Vec<DecodeError>,
) -> Result<Option<(u32, &'a [u8])>, DecodeError> {
    let format = r.u32("sample")?;
    let length = r.u32("sample")? as usize;
    let available = r.remaining();
    if length <= available {
        return Ok(Some((format, r.take(length, "sample")?)));
    }

    let Some(actual) = structural_len(format, r.clone()) else {
        return Err(DecodeError::truncated("sample", length, available));
    };
    r.skip(actual, "sample")?;
    trace!(declared = length, actual, "skipping sample with overlong length");
    errors.push(DecodeError::malformed("sample", length, available));
    Ok(None)
}

/// 고정 헤더와 각 레코드의 길이를 따라 샘플 본문의 실제 길이를 계산합니다.
fn structural_len(format: u32, mut r: Reader<'_>) -> Option<usize> {
    let (enterprise, format) = split_format(format);
    if enterprise != 0 {
        return None;
    }
    // 레코드 수 앞의 고정 필드
    let fixed = match format {
        SAMPLE_FLOW => 28,
        SAMPLE_FLOW_EXPANDED => 40,
        SAMPLE_COUNTER => 8,
        SAMPLE_COUNTER_EXPANDED => 12,
        _ => return None,
    };

    let start = r.remaining();
    r.skip(fixed, "sample").ok()?;
    let records = r.u32("sample").ok()?;
    for _ in 0..records {
        let _format = r.u32("record").ok()?;
        let length = r.u32("record").ok()? as usize;
        r.skip(length, "record").ok()?;
    }
    Some(start - r.remaining())
}

/// 샘플/레코드 내부의 잘림은 선언된 길이가 틀린 것이므로 길이 오류로 분류합니다.
fn as_malformed(err: DecodeError, context: &'static str) -> DecodeError {
    match err {
        DecodeError::Truncated {
            needed, available, ..
        } => DecodeError::malformed(context, needed, available),
        other => other,
    }
}

fn read_address(r: &mut Reader<'_>, context: &'static str) -> Result<Option<IpAddr>, DecodeError> {
    match r.u32(context)? {
        0 => Ok(None),
        1 => {
            let b = r.take(4, context)?;
            Ok(Some(IpAddr::V4(Ipv4Addr::new(b[0], b[1], b[2], b[3]))))
        }
        2 => {
            let b: [u8; 16] = r
                .take(16, context)?
                .try_into()
                .map_err(|_| DecodeError::truncated(context, 16, 0))?;
            Ok(Some(IpAddr::V6(Ipv6Addr::from(b))))
        }
        other => Err(DecodeError::malformed(context, other as usize, 0)),
    }
}

fn decode_flow_sample(
    body: &[u8],
    expanded: bool,
    exporter: IpAddr,
    time_received: u64,
    errors: &mut Vec<DecodeError>,
) -> Result<Option<FlowMessage>, DecodeError> {
    let mut r = Reader::new(body);

    let _sequence = r.u32("flow sample")?;
    // source id: 확장형은 type/index 분리
    r.skip(if expanded { 8 } else { 4 }, "flow sample")?;
    let sampling_rate = r.u32("flow sample")?;
    let _sample_pool = r.u32("flow sample")?;
    let _drops = r.u32("flow sample")?;

    let (in_if, out_if) = if expanded {
        let _in_format = r.u32("flow sample")?;
        let in_if = r.u32("flow sample")?;
        let _out_format = r.u32("flow sample")?;
        let out_if = r.u32("flow sample")?;
        (in_if, out_if)
    } else {
        let in_if = r.u32("flow sample")? & INTERFACE_MASK;
        let out_if = r.u32("flow sample")? & INTERFACE_MASK;
        (in_if, out_if)
    };

    let record_count = r.u32("flow sample")?;

    let mut msg = FlowMessage::new(exporter, time_received);
    msg.sampling_rate = if sampling_rate == 0 {
        1
    } else {
        u64::from(sampling_rate)
    };
    msg.in_if = in_if;
    msg.out_if = out_if;
    msg.packets = 1;

    let mut describes_packet = false;
    for _ in 0..record_count {
        let (format, record) = next_block(&mut r, "flow record")?;
        let (enterprise, format) = split_format(format);
        if enterprise != 0 {
            continue;
        }

        let result = match format {
            RECORD_RAW_HEADER => {
                describes_packet = true;
                apply_raw_header(&mut msg, record)
            }
            RECORD_SAMPLED_IPV4 => {
                describes_packet = true;
                apply_sampled_ipv4(&mut msg, record)
            }
            RECORD_SAMPLED_IPV6 => {
                describes_packet = true;
                apply_sampled_ipv6(&mut msg, record)
            }
            RECORD_EXTENDED_ROUTER => apply_extended_router(&mut msg, record),
            RECORD_EXTENDED_GATEWAY => apply_extended_gateway(&mut msg, record),
            RECORD_EXTENDED_SWITCH => Ok(()),
            _ => Ok(()),
        };
        if let Err(e) = result {
            errors.push(as_malformed(e, "flow record"));
        }
    }

    if !describes_packet {
        trace!(%exporter, "flow sample without packet record");
        return Ok(None);
    }

    msg.infer_etype();
    Ok(Some(msg))
}

fn apply_raw_header(msg: &mut FlowMessage, record: &[u8]) -> Result<(), DecodeError> {
    let mut r = Reader::new(record);
    let protocol = r.u32("raw header")?;
    let frame_length = r.u32("raw header")?;
    let _stripped = r.u32("raw header")?;
    let header_length = r.u32("raw header")? as usize;
    let header = r.take(header_length, "raw header")?;

    msg.bytes = u64::from(frame_length);
    match protocol {
        HEADER_PROTOCOL_ETHERNET => parse_ethernet(msg, header),
        HEADER_PROTOCOL_IPV4 => parse_ip(msg, ETYPE_IPV4, header),
        HEADER_PROTOCOL_IPV6 => parse_ip(msg, ETYPE_IPV6, header),
        other => trace!(protocol = other, "unsupported raw header protocol"),
    }
    Ok(())
}

fn parse_ethernet(msg: &mut FlowMessage, frame: &[u8]) {
    let Ok(eth) = Ethernet2HeaderSlice::from_slice(frame) else {
        return;
    };
    let mut etype = eth.ether_type().0;
    let mut rest = &frame[eth.slice().len()..];

    while etype == ETYPE_VLAN || etype == ETYPE_QINQ {
        let Ok(vlan) = SingleVlanHeaderSlice::from_slice(rest) else {
            return;
        };
        etype = vlan.ether_type().0;
        rest = &rest[vlan.slice().len()..];
    }

    msg.etype = etype;
    parse_ip(msg, etype, rest);
}

fn parse_ip(msg: &mut FlowMessage, etype: u16, packet: &[u8]) {
    let (proto, l4) = match etype {
        ETYPE_IPV4 => {
            let Ok(ip) = Ipv4HeaderSlice::from_slice(packet) else {
                return;
            };
            msg.src_addr = IpAddr::V4(ip.source_addr());
            msg.dst_addr = IpAddr::V4(ip.destination_addr());
            (ip.protocol().0, &packet[ip.slice().len()..])
        }
        ETYPE_IPV6 => {
            let Ok(ip) = Ipv6HeaderSlice::from_slice(packet) else {
                return;
            };
            msg.src_addr = IpAddr::V6(ip.source_addr());
            msg.dst_addr = IpAddr::V6(ip.destination_addr());
            (ip.next_header().0, &packet[ip.slice().len()..])
        }
        _ => return,
    };

    msg.etype = etype;
    msg.proto = proto;
    match proto {
        IP_PROTO_TCP => {
            if let Ok(tcp) = TcpHeaderSlice::from_slice(l4) {
                msg.src_port = tcp.source_port();
                msg.dst_port = tcp.destination_port();
                msg.tcp_flags = tcp_flags(&tcp);
            }
        }
        IP_PROTO_UDP => {
            if let Ok(udp) = UdpHeaderSlice::from_slice(l4) {
                msg.src_port = udp.source_port();
                msg.dst_port = udp.destination_port();
            }
        }
        _ => {}
    }
}

fn tcp_flags(tcp: &TcpHeaderSlice<'_>) -> u8 {
    [
        tcp.fin(),
        tcp.syn(),
        tcp.rst(),
        tcp.psh(),
        tcp.ack(),
        tcp.urg(),
        tcp.ece(),
        tcp.cwr(),
    ]
    .iter()
    .enumerate()
    .fold(0u8, |acc, (bit, set)| if *set { acc | (1 << bit) } else { acc })
}

fn apply_sampled_ipv4(msg: &mut FlowMessage, record: &[u8]) -> Result<(), DecodeError> {
    let mut r = Reader::new(record);
    let length = r.u32("sampled ipv4")?;
    let protocol = r.u32("sampled ipv4")?;
    let src = r.take(4, "sampled ipv4")?;
    let dst = r.take(4, "sampled ipv4")?;
    let src_port = r.u32("sampled ipv4")?;
    let dst_port = r.u32("sampled ipv4")?;
    let tcp_flags = r.u32("sampled ipv4")?;
    let _tos = r.u32("sampled ipv4")?;

    msg.bytes = u64::from(length);
    msg.proto = protocol as u8;
    msg.src_addr = IpAddr::V4(Ipv4Addr::new(src[0], src[1], src[2], src[3]));
    msg.dst_addr = IpAddr::V4(Ipv4Addr::new(dst[0], dst[1], dst[2], dst[3]));
    msg.src_port = src_port as u16;
    msg.dst_port = dst_port as u16;
    msg.tcp_flags = tcp_flags as u8;
    msg.etype = ETYPE_IPV4;
    Ok(())
}

fn apply_sampled_ipv6(msg: &mut FlowMessage, record: &[u8]) -> Result<(), DecodeError> {
    let mut r = Reader::new(record);
    let length = r.u32("sampled ipv6")?;
    let protocol = r.u32("sampled ipv6")?;
    let src = ipv6_from(r.take(16, "sampled ipv6")?);
    let dst = ipv6_from(r.take(16, "sampled ipv6")?);
    let src_port = r.u32("sampled ipv6")?;
    let dst_port = r.u32("sampled ipv6")?;
    let tcp_flags = r.u32("sampled ipv6")?;
    let _priority = r.u32("sampled ipv6")?;

    msg.bytes = u64::from(length);
    msg.proto = protocol as u8;
    msg.src_addr = IpAddr::V6(src);
    msg.dst_addr = IpAddr::V6(dst);
    msg.src_port = src_port as u16;
    msg.dst_port = dst_port as u16;
    msg.tcp_flags = tcp_flags as u8;
    msg.etype = ETYPE_IPV6;
    Ok(())
}

fn ipv6_from(b: &[u8]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&b[..16]);
    Ipv6Addr::from(octets)
}

fn apply_extended_router(msg: &mut FlowMessage, record: &[u8]) -> Result<(), DecodeError> {
    let mut r = Reader::new(record);
    let next_hop = read_address(&mut r, "extended router")?;
    let src_mask = r.u32("extended router")?;
    let dst_mask = r.u32("extended router")?;

    if next_hop.is_some() {
        msg.next_hop = next_hop;
    }
    msg.src_mask = src_mask as u8;
    msg.dst_mask = dst_mask as u8;
    Ok(())
}

fn apply_extended_gateway(msg: &mut FlowMessage, record: &[u8]) -> Result<(), DecodeError> {
    let mut r = Reader::new(record);
    let next_hop = read_address(&mut r, "extended gateway")?;
    let _router_as = r.u32("extended gateway")?;
    let src_as = r.u32("extended gateway")?;
    let _src_peer_as = r.u32("extended gateway")?;
    let segments = r.u32("extended gateway")?;

    let mut dst_as = 0;
    for _ in 0..segments {
        let _segment_type = r.u32("as path")?;
        let length = r.u32("as path")? as usize;
        for _ in 0..length {
            dst_as = r.u32("as path")?;
        }
    }

    // extended router의 next hop이 우선
    if msg.next_hop.is_none() {
        msg.next_hop = next_hop;
    }
    msg.src_as = src_as;
    msg.dst_as = dst_as;
    Ok(())
}
