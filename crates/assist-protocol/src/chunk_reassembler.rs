//! Recovers whole events from network reads split at arbitrary byte offsets.

use crate::{decode_frame, FrameConvention, StreamChunk};

/// Buffers undelimited trailing bytes between reads and emits decoded events
/// in arrival order once their delimiter has been seen.
///
/// The reassembler only knows about delimiters; event semantics belong to the
/// consumer. A frame that fails to decode is emitted in place as
/// [`StreamChunk::Error`] and the following frames are still decoded.
#[derive(Debug, Clone, Default)]
pub struct ChunkReassembler {
    convention: FrameConvention,
    carry: Vec<u8>,
}

impl ChunkReassembler {
    pub fn new(convention: FrameConvention) -> Self {
        Self {
            convention,
            carry: Vec::new(),
        }
    }

    pub fn convention(&self) -> FrameConvention {
        self.convention
    }

    /// Number of bytes waiting for a delimiter.
    pub fn buffered_len(&self) -> usize {
        self.carry.len()
    }

    /// Feeds one network read and returns every event it completed.
    pub fn push(&mut self, fragment: &[u8]) -> Vec<StreamChunk> {
        if fragment.is_empty() {
            return Vec::new();
        }

        let delimiter = self.convention.delimiter();
        // The carry never holds a full delimiter, but it may end with the first
        // bytes of one.
        let mut cursor = self
            .carry
            .len()
            .saturating_sub(delimiter.len().saturating_sub(1));
        self.carry.extend_from_slice(fragment);

        let mut decoded = Vec::new();
        let mut segment_start = 0;
        while let Some(offset) = find_delimiter(&self.carry[cursor..], delimiter) {
            let segment_end = cursor + offset;
            decode_segment(
                &self.carry[segment_start..segment_end],
                self.convention,
                &mut decoded,
            );
            segment_start = segment_end + delimiter.len();
            cursor = segment_start;
        }
        self.carry.drain(..segment_start);
        decoded
    }

    /// Flushes bytes left without a trailing delimiter at end of stream.
    ///
    /// Leftover bytes are decoded as a best-effort final frame; when that
    /// fails an error event is returned instead. Whitespace-only leftovers
    /// produce nothing.
    pub fn finish(&mut self) -> Option<StreamChunk> {
        let leftover = std::mem::take(&mut self.carry);
        let mut decoded = Vec::with_capacity(1);
        decode_segment(&leftover, self.convention, &mut decoded);
        decoded.pop()
    }
}

fn decode_segment(segment: &[u8], convention: FrameConvention, out: &mut Vec<StreamChunk>) {
    if segment.iter().all(u8::is_ascii_whitespace) {
        return;
    }
    match decode_frame(segment, convention) {
        Ok(chunk) => out.push(chunk),
        Err(error) => out.push(error.into_error_chunk()),
    }
}

fn find_delimiter(haystack: &[u8], delimiter: &[u8]) -> Option<usize> {
    if haystack.len() < delimiter.len() {
        return None;
    }
    haystack
        .windows(delimiter.len())
        .position(|window| window == delimiter)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::ChunkReassembler;
    use crate::{
        encode_frames, ConversationSnapshot, FrameConvention, Message, StreamChunk,
    };

    fn sample_chunks() -> Vec<StreamChunk> {
        vec![
            StreamChunk::Metadata(ConversationSnapshot {
                conversation_id: Some("conv-1".to_string()),
                messages: vec![
                    Message::input("1_0", "¿qué tal? 👋"),
                    Message::output("1_1", ""),
                ],
                ..ConversationSnapshot::default()
            }),
            StreamChunk::append("1_1", "He"),
            StreamChunk::append("1_1", "llo\n\nworld"),
            StreamChunk::error("late failure"),
            StreamChunk::Unknown {
                kind: "suggestions".to_string(),
                body: json!({"items": ["a"]}),
            },
        ]
    }

    fn decode_all(convention: FrameConvention, fragments: &[&[u8]]) -> Vec<StreamChunk> {
        let mut reassembler = ChunkReassembler::new(convention);
        let mut decoded = Vec::new();
        for fragment in fragments {
            decoded.extend(reassembler.push(fragment));
        }
        decoded.extend(reassembler.finish());
        decoded
    }

    #[test]
    fn functional_round_trip_preserves_order_for_both_conventions() {
        for convention in [FrameConvention::Ndjson, FrameConvention::LegacySse] {
            let chunks = sample_chunks();
            let bytes = encode_frames(&chunks, convention).expect("encode");
            assert_eq!(decode_all(convention, &[&bytes]), chunks, "{convention}");
        }
    }

    #[test]
    fn functional_byte_by_byte_feed_matches_whole_feed() {
        for convention in [FrameConvention::Ndjson, FrameConvention::LegacySse] {
            let chunks = sample_chunks();
            let bytes = encode_frames(&chunks, convention).expect("encode");
            let fragments = bytes.chunks(1).collect::<Vec<_>>();
            assert_eq!(decode_all(convention, &fragments), chunks, "{convention}");
        }
    }

    #[test]
    fn integration_every_two_way_split_yields_same_sequence() {
        for convention in [FrameConvention::Ndjson, FrameConvention::LegacySse] {
            let chunks = sample_chunks();
            let bytes = encode_frames(&chunks, convention).expect("encode");
            for split in 0..=bytes.len() {
                let (head, tail) = bytes.split_at(split);
                assert_eq!(
                    decode_all(convention, &[head, tail]),
                    chunks,
                    "{convention} split at {split}"
                );
            }
        }
    }

    #[test]
    fn functional_malformed_segment_degrades_to_error_and_stream_continues() {
        let mut reassembler = ChunkReassembler::new(FrameConvention::Ndjson);
        let decoded = reassembler.push(
            b"{\"type\":\"appendMessageContent\",\"body\":{\"messageId\":\"1\",\"content\":\"a\"}}\n{broken\n{\"type\":\"appendMessageContent\",\"body\":{\"messageId\":\"1\",\"content\":\"b\"}}\n",
        );
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0], StreamChunk::append("1", "a"));
        assert!(matches!(&decoded[1], StreamChunk::Error(message) if message.contains("failed to parse stream frame")));
        assert_eq!(decoded[2], StreamChunk::append("1", "b"));
        assert_eq!(reassembler.buffered_len(), 0);
    }

    #[test]
    fn unit_partial_frame_is_held_until_delimiter_arrives() {
        let mut reassembler = ChunkReassembler::new(FrameConvention::Ndjson);
        assert!(reassembler.push(b"{\"type\":\"error\",").is_empty());
        assert!(reassembler.push(b"").is_empty());
        assert_eq!(reassembler.buffered_len(), 16);
        let decoded = reassembler.push(b"\"body\":\"x\"}\n{\"type\"");
        assert_eq!(decoded, vec![StreamChunk::error("x")]);
        assert_eq!(reassembler.buffered_len(), 7);
    }

    #[test]
    fn unit_legacy_delimiter_split_across_fragments_is_detected() {
        let mut reassembler = ChunkReassembler::new(FrameConvention::LegacySse);
        assert!(reassembler
            .push(b"data: {\"type\":\"error\",\"body\":\"x\"}\n")
            .is_empty());
        let decoded = reassembler.push(b"\ndata: ");
        assert_eq!(decoded, vec![StreamChunk::error("x")]);
    }

    #[test]
    fn functional_finish_decodes_unterminated_final_frame() {
        let mut reassembler = ChunkReassembler::new(FrameConvention::Ndjson);
        assert!(reassembler
            .push(b"{\"type\":\"error\",\"body\":\"tail\"}")
            .is_empty());
        assert_eq!(reassembler.finish(), Some(StreamChunk::error("tail")));
        assert_eq!(reassembler.finish(), None);
    }

    #[test]
    fn regression_finish_signals_truncated_leftover_instead_of_dropping_it() {
        let mut reassembler = ChunkReassembler::new(FrameConvention::Ndjson);
        assert!(reassembler.push(b"{\"type\":\"appendMess").is_empty());
        let Some(StreamChunk::Error(message)) = reassembler.finish() else {
            panic!("truncated leftover must surface as an error chunk");
        };
        assert!(message.contains("failed to parse stream frame"));
    }

    #[test]
    fn unit_blank_segments_and_whitespace_leftover_are_ignored() {
        let mut reassembler = ChunkReassembler::new(FrameConvention::Ndjson);
        assert!(reassembler.push(b"\n\n  \n").is_empty());
        assert!(reassembler.push(b"  ").is_empty());
        assert_eq!(reassembler.finish(), None);
    }

    #[test]
    fn regression_utf8_code_point_split_across_reads_is_reassembled() {
        let bytes = encode_frames(&[StreamChunk::append("m", "👋")], FrameConvention::Ndjson)
            .expect("encode");
        let emoji_start = bytes
            .windows(4)
            .position(|window| window == "👋".as_bytes())
            .expect("emoji bytes present");
        let (head, tail) = bytes.split_at(emoji_start + 2);
        assert_eq!(
            decode_all(FrameConvention::Ndjson, &[head, tail]),
            vec![StreamChunk::append("m", "👋")]
        );
    }
}
