#![no_main]

use assist_protocol::{ChunkReassembler, FrameConvention};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&selector, body)) = data.split_first() else {
        return;
    };
    let convention = if selector & 1 == 0 {
        FrameConvention::Ndjson
    } else {
        FrameConvention::LegacySse
    };
    let split = usize::from(selector >> 1).min(body.len());

    let mut whole = ChunkReassembler::new(convention);
    let mut expected = whole.push(body);
    expected.extend(whole.finish());

    let mut pieces = ChunkReassembler::new(convention);
    let mut actual = pieces.push(&body[..split]);
    actual.extend(pieces.push(&body[split..]));
    actual.extend(pieces.finish());

    assert_eq!(expected, actual);
    assert_eq!(pieces.buffered_len(), 0);
});
