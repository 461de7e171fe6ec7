#![no_main]

use libfuzzer_sys::fuzz_target;
use tiergate::protocol::Frame;

fuzz_target!(|data: &[u8]| {
    let _ = serde_json::from_slice::<Frame>(data);

    // Full path the realtime manager takes for every inbound text frame.
    if let Ok(text) = std::str::from_utf8(data) {
        if let Ok(frame) = Frame::decode(text) {
            let _ = frame.classify();
        }
    }
});
