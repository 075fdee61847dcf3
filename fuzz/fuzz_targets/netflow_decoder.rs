#![no_main]

use std::net::{IpAddr, Ipv4Addr};

use ironflow_flow_pipeline::{FlowDecoder, NetflowDecoder, TemplateStore};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let store = TemplateStore::new();
    let exporter = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let _ = NetflowDecoder.decode(data, exporter, 0, &store);
});
