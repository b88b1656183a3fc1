#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tagmesh_core::{LogicalTime, NodeId};
use tagmesh_mesh::{NodeRegistry, Router, RouterConfig};

#[derive(Arbitrary, Debug)]
struct Input {
    local: u32,
    tag: u32,
    frames: Vec<(u16, Vec<u8>)>,
}

fuzz_target!(|input: Input| {
    let local = NodeId::new(input.local.max(1));
    let mut router = Router::with_session(local, input.tag, RouterConfig::constrained(), 0);
    let mut registry = NodeRegistry::new();

    for (at, raw) in &input.frames {
        let _ = router.ingest(raw, LogicalTime::from_millis(u64::from(*at)), &mut registry);
        assert!(router.pending() <= RouterConfig::constrained().max_outbound);
    }
});
