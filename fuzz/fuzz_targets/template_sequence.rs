#![no_main]

use std::net::{IpAddr, Ipv4Addr};

use arbitrary::Arbitrary;
use ironflow_flow_pipeline::{FlowDecoder, NetflowDecoder, TemplateStore};
use libfuzzer_sys::fuzz_target;

/// 퍼저용 구조적 입력
///
/// 같은 저장소를 공유하는 데이터그램 연속으로, 템플릿 등록/교체/철회가
/// 이후 데이터 셋 디코딩에 미치는 영향을 탐색합니다.
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    datagrams: Vec<FuzzDatagram>,
}

#[derive(Arbitrary, Debug)]
struct FuzzDatagram {
    /// 익스포터 주소 마지막 옥텟 (소수의 익스포터로 충돌 유도)
    exporter: u8,
    ipfix: bool,
    domain: u8,
    sets: Vec<FuzzSet>,
}

#[derive(Arbitrary, Debug)]
struct FuzzSet {
    /// 0-3이면 템플릿 셋, 그 외는 256 이상의 데이터 셋
    id: u16,
    body: Vec<u8>,
}

impl FuzzDatagram {
    fn encode(&self) -> Vec<u8> {
        let mut sets = Vec::new();
        for set in self.sets.iter().take(8) {
            let id = if set.id < 4 { set.id } else { 256 + set.id % 8 };
            let body = &set.body[..set.body.len().min(512)];
            sets.extend_from_slice(&id.to_be_bytes());
            sets.extend_from_slice(&((body.len() + 4) as u16).to_be_bytes());
            sets.extend_from_slice(body);
        }

        let mut b = Vec::new();
        if self.ipfix {
            b.extend_from_slice(&10u16.to_be_bytes());
            b.extend_from_slice(&((sets.len() + 16) as u16).to_be_bytes());
            b.extend_from_slice(&[0u8; 8]);
        } else {
            b.extend_from_slice(&9u16.to_be_bytes());
            b.extend_from_slice(&(self.sets.len() as u16).to_be_bytes());
            b.extend_from_slice(&[0u8; 12]);
        }
        b.extend_from_slice(&u32::from(self.domain % 4).to_be_bytes());
        b.extend_from_slice(&sets);
        b
    }
}

fuzz_target!(|input: FuzzInput| {
    let store = TemplateStore::new();
    for datagram in input.datagrams.iter().take(16) {
        let exporter = IpAddr::V4(Ipv4Addr::new(192, 0, 2, datagram.exporter % 4));
        let out = NetflowDecoder.decode(&datagram.encode(), exporter, 0, &store);
        assert!(out.missing_templates() <= out.errors.len());
    }
});
