//! 도메인 타입: 정규화된 플로우 레코드
//!
//! 디코더가 생성하고 외부 소비자(저장소, 분석 계층)가 소비하는
//! 프로토콜 독립적인 레코드 형식을 정의합니다.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

/// IPv4 EtherType
pub const ETYPE_IPV4: u16 = 0x0800;
/// IPv6 EtherType
pub const ETYPE_IPV6: u16 = 0x86dd;

/// 정규화된 플로우 레코드
///
/// NetFlow v5/v9, IPFIX, sFlow 중 어느 형식에서 디코딩되었든
/// 동일한 필드 집합으로 표현됩니다. 생성 후에는 변경되지 않으며,
/// 송신 큐에 들어간 뒤에는 소비자가 소유권을 가집니다.
///
/// 카운터(`bytes`, `packets`)는 익스포터가 보낸 원시 값이며
/// `sampling_rate`를 곱하지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowMessage {
    /// 수신 시각 (Unix epoch 초)
    pub time_received: u64,
    /// 샘플링 비율 (없으면 1)
    pub sampling_rate: u64,
    /// 익스포터 주소 (데이터그램 송신자)
    pub exporter_address: IpAddr,
    /// 익스포터 이름 (기본값: 주소 문자열)
    pub exporter_name: String,
    /// 익스포터 그룹 (외부 enrichment 대상, 기본값: 빈 문자열)
    pub exporter_group: String,
    /// 출발지 주소
    pub src_addr: IpAddr,
    /// 목적지 주소
    pub dst_addr: IpAddr,
    /// 출발지 AS 번호
    pub src_as: u32,
    /// 목적지 AS 번호
    pub dst_as: u32,
    /// 출발지 프리픽스 길이
    pub src_mask: u8,
    /// 목적지 프리픽스 길이
    pub dst_mask: u8,
    /// 넥스트홉 주소
    pub next_hop: Option<IpAddr>,
    /// 출발지 포트
    pub src_port: u16,
    /// 목적지 포트
    pub dst_port: u16,
    /// IP 프로토콜 번호 (TCP=6, UDP=17 등)
    pub proto: u8,
    /// TCP 플래그 (누적 OR)
    pub tcp_flags: u8,
    /// 바이트 카운터
    pub bytes: u64,
    /// 패킷 카운터
    pub packets: u64,
    /// 입력 인터페이스 인덱스
    pub in_if: u32,
    /// 출력 인터페이스 인덱스
    pub out_if: u32,
    /// EtherType (0x0800, 0x86dd)
    pub etype: u16,
    /// 포워딩 상태 (IPFIX forwardingStatus, 64 = forwarded)
    pub forwarding_status: u32,
}

impl FlowMessage {
    /// 익스포터 정보만 채운 빈 레코드를 생성합니다.
    ///
    /// 디코더는 이 레코드에서 시작하여 필드를 하나씩 채웁니다.
    pub fn new(exporter_address: IpAddr, time_received: u64) -> Self {
        Self {
            time_received,
            sampling_rate: 1,
            exporter_address,
            exporter_name: exporter_address.to_string(),
            exporter_group: String::new(),
            src_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dst_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            src_as: 0,
            dst_as: 0,
            src_mask: 0,
            dst_mask: 0,
            next_hop: None,
            src_port: 0,
            dst_port: 0,
            proto: 0,
            tcp_flags: 0,
            bytes: 0,
            packets: 0,
            in_if: 0,
            out_if: 0,
            etype: 0,
            forwarding_status: 0,
        }
    }

    /// EtherType이 비어 있으면 주소 체계에서 추론합니다.
    pub fn infer_etype(&mut self) {
        if self.etype != 0 {
            return;
        }
        self.etype = match (self.src_addr, self.dst_addr) {
            (IpAddr::V6(_), _) | (_, IpAddr::V6(_)) => ETYPE_IPV6,
            _ if self.src_addr.is_unspecified() && self.dst_addr.is_unspecified() => 0,
            _ => ETYPE_IPV4,
        };
    }
}

impl fmt::Display for FlowMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}:{} -> {}:{} proto={} bytes={} packets={} rate={}",
            self.exporter_address,
            self.src_addr,
            self.src_port,
            self.dst_addr,
            self.dst_port,
            self.proto,
            self.bytes,
            self.packets,
            self.sampling_rate,
        )
    }
}
