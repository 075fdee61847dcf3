#![no_main]

use std::net::{IpAddr, Ipv4Addr};

use ironflow_flow_pipeline::{FlowDecoder, SflowDecoder, TemplateStore};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let store = TemplateStore::new();
    let exporter = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let out = SflowDecoder.decode(data, exporter, 0, &store);
    // sFlow는 템플릿 상태를 갖지 않음
    assert!(store.is_empty());
    assert_eq!(out.templates_upserted, 0);
});
