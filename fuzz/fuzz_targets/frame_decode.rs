#![no_main]

use assist_protocol::{decode_frame, encode_frame, FrameConvention};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for convention in [FrameConvention::Ndjson, FrameConvention::LegacySse] {
        let Ok(chunk) = decode_frame(data, convention) else {
            continue;
        };
        let frame = encode_frame(&chunk, convention).expect("decoded chunk re-encodes");
        assert!(frame.ends_with(convention.delimiter()));
        let body = &frame[..frame.len() - convention.delimiter().len()];
        assert!(!body.windows(convention.delimiter().len()).any(|w| w == convention.delimiter()));
    }
});
