//! 필드 타입 상수와 FlowMessage 매핑
//!
//! NetFlow v9 필드 타입과 IPFIX information element 번호는 0-127 구간에서
//! 같은 값을 공유하므로 하나의 테이블로 처리합니다.
//! 여기에 없는 필드는 길이만큼 건너뜁니다.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ironflow_core::types::FlowMessage;

use crate::error::DecodeError;

pub const IN_BYTES: u16 = 1;
pub const IN_PKTS: u16 = 2;
pub const PROTOCOL: u16 = 4;
pub const TCP_FLAGS: u16 = 6;
pub const L4_SRC_PORT: u16 = 7;
pub const IPV4_SRC_ADDR: u16 = 8;
pub const SRC_MASK: u16 = 9;
pub const INPUT_SNMP: u16 = 10;
pub const L4_DST_PORT: u16 = 11;
pub const IPV4_DST_ADDR: u16 = 12;
pub const DST_MASK: u16 = 13;
pub const OUTPUT_SNMP: u16 = 14;
pub const IPV4_NEXT_HOP: u16 = 15;
pub const SRC_AS: u16 = 16;
pub const DST_AS: u16 = 17;
pub const BGP_IPV4_NEXT_HOP: u16 = 18;
pub const IPV6_SRC_ADDR: u16 = 27;
pub const IPV6_DST_ADDR: u16 = 28;
pub const IPV6_SRC_MASK: u16 = 29;
pub const IPV6_DST_MASK: u16 = 30;
pub const SAMPLING_INTERVAL: u16 = 34;
pub const FLOW_SAMPLER_ID: u16 = 48;
pub const FLOW_SAMPLER_RANDOM_INTERVAL: u16 = 50;
pub const IPV6_NEXT_HOP: u16 = 62;
pub const BGP_IPV6_NEXT_HOP: u16 = 63;
pub const OCTET_TOTAL_COUNT: u16 = 85;
pub const PACKET_TOTAL_COUNT: u16 = 86;
pub const FORWARDING_STATUS: u16 = 89;
pub const ETHERNET_TYPE: u16 = 256;
pub const SELECTOR_ID: u16 = 302;
pub const SAMPLING_PACKET_INTERVAL: u16 = 305;

/// 1-8바이트 빅엔디언 부호 없는 정수를 읽습니다.
///
/// 길이가 0이거나 8을 넘으면 `None`을 반환합니다.
pub fn read_unsigned(value: &[u8]) -> Option<u64> {
    if value.is_empty() || value.len() > 8 {
        return None;
    }
    Some(value.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

fn read_ipv4(value: &[u8]) -> Option<IpAddr> {
    let octets: [u8; 4] = value.try_into().ok()?;
    Some(IpAddr::V4(Ipv4Addr::from(octets)))
}

fn read_ipv6(value: &[u8]) -> Option<IpAddr> {
    let octets: [u8; 16] = value.try_into().ok()?;
    Some(IpAddr::V6(Ipv6Addr::from(octets)))
}

/// 레코드 해석 결과 중 FlowMessage 밖에서 쓰이는 값
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecordExtras {
    /// 레코드가 직접 실은 샘플링 비율
    pub sampling_rate: Option<u64>,
    /// 레코드가 참조하는 샘플러 ID
    pub sampler_id: Option<u64>,
}

/// 필드 하나를 FlowMessage에 적용합니다.
///
/// 알 수 없는 필드 타입은 무시합니다. 알려진 필드의 길이를 해석할 수
/// 없으면 `UnsupportedField`를 반환하며, 호출자는 해당 필드만 건너뜁니다.
pub fn apply_field(
    msg: &mut FlowMessage,
    extras: &mut RecordExtras,
    field_type: u16,
    value: &[u8],
) -> Result<(), DecodeError> {
    let unsupported = || DecodeError::UnsupportedField {
        field_type,
        length: value.len(),
    };
    let unsigned = || read_unsigned(value).ok_or_else(unsupported);

    match field_type {
        IN_BYTES | OCTET_TOTAL_COUNT => msg.bytes = unsigned()?,
        IN_PKTS | PACKET_TOTAL_COUNT => msg.packets = unsigned()?,
        PROTOCOL => msg.proto = unsigned()? as u8,
        TCP_FLAGS => msg.tcp_flags = unsigned()? as u8,
        L4_SRC_PORT => msg.src_port = unsigned()? as u16,
        L4_DST_PORT => msg.dst_port = unsigned()? as u16,
        SRC_MASK | IPV6_SRC_MASK => msg.src_mask = unsigned()? as u8,
        DST_MASK | IPV6_DST_MASK => msg.dst_mask = unsigned()? as u8,
        INPUT_SNMP => msg.in_if = unsigned()? as u32,
        OUTPUT_SNMP => msg.out_if = unsigned()? as u32,
        SRC_AS => msg.src_as = unsigned()? as u32,
        DST_AS => msg.dst_as = unsigned()? as u32,
        FORWARDING_STATUS => msg.forwarding_status = unsigned()? as u32,
        ETHERNET_TYPE => msg.etype = unsigned()? as u16,
        IPV4_SRC_ADDR => msg.src_addr = read_ipv4(value).ok_or_else(unsupported)?,
        IPV4_DST_ADDR => msg.dst_addr = read_ipv4(value).ok_or_else(unsupported)?,
        IPV6_SRC_ADDR => msg.src_addr = read_ipv6(value).ok_or_else(unsupported)?,
        IPV6_DST_ADDR => msg.dst_addr = read_ipv6(value).ok_or_else(unsupported)?,
        IPV4_NEXT_HOP | BGP_IPV4_NEXT_HOP => {
            let addr = read_ipv4(value).ok_or_else(unsupported)?;
            // 라우터 next hop이 BGP next hop보다 우선
            if msg.next_hop.is_none() || field_type == IPV4_NEXT_HOP {
                msg.next_hop = Some(addr);
            }
        }
        IPV6_NEXT_HOP | BGP_IPV6_NEXT_HOP => {
            let addr = read_ipv6(value).ok_or_else(unsupported)?;
            if msg.next_hop.is_none() || field_type == IPV6_NEXT_HOP {
                msg.next_hop = Some(addr);
            }
        }
        SAMPLING_INTERVAL | FLOW_SAMPLER_RANDOM_INTERVAL | SAMPLING_PACKET_INTERVAL => {
            extras.sampling_rate = Some(unsigned()?);
        }
        FLOW_SAMPLER_ID | SELECTOR_ID => extras.sampler_id = Some(unsigned()?),
        _ => {}
    }
    Ok(())
}
