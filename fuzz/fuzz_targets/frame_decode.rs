#![no_main]

use libfuzzer_sys::fuzz_target;
use tagmesh_wire::{Beacon, Frame, FrameKind, TimeAnnounce};

fuzz_target!(|data: &[u8]| {
    let Ok(frame) = Frame::decode(data) else {
        return;
    };

    // Anything that decodes fits on the wire again
    let encoded = frame.encode().expect("decoded frame re-encodes");
    assert_eq!(encoded.len(), frame.encoded_len());

    match frame.header.kind {
        FrameKind::TimeAnnounce => {
            let _ = TimeAnnounce::decode(&frame.payload);
        }
        FrameKind::Beacon => {
            let _ = Beacon::decode(&frame.payload);
        }
        FrameKind::Data => {}
    }
});
