//! Turn-stream decoding: raw bytes in, [`StreamRecord`]s out.

use omni_types::{SseDecoder, StreamRecord, WireError};

/// Incremental decoder for a turn's event stream.
///
/// Wraps [`SseDecoder`] so chunk boundaries never affect the decoded
/// records, and parses each event payload into a [`StreamRecord`].  A
/// payload that is not a valid record is returned as an error in its
/// position; the caller decides whether to skip it.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    sse: SseDecoder,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<StreamRecord, WireError>> {
        self.sse
            .push(chunk)
            .iter()
            .map(|data| StreamRecord::parse(data))
            .collect()
    }

    /// Decode whatever is left once the byte stream has ended.
    pub fn finish(&mut self) -> Option<Result<StreamRecord, WireError>> {
        self.sse.finish().map(|data| StreamRecord::parse(&data))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decodes_records_across_chunk_boundaries() {
        let mut dec = RecordDecoder::new();
        assert!(dec.push(b"data: {\"chatId\":4").is_empty());
        let out = dec.push(b"2}\n\ndata: {\"token\":\"Hel\"}\n\ndata: [DO");
        let out: Vec<StreamRecord> = out.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            out,
            vec![
                StreamRecord::ChatCreated { chat_id: 42 },
                StreamRecord::Token { token: "Hel".into() },
            ]
        );
        let done: Vec<StreamRecord> = dec.push(b"NE]\n\n").into_iter().map(Result::unwrap).collect();
        assert_eq!(done, vec![StreamRecord::Done]);
    }

    #[test]
    fn malformed_payload_keeps_its_position() {
        let mut dec = RecordDecoder::new();
        let out = dec.push(b"data: {\"token\":\"a\"}\n\ndata: {oops\n\ndata: {\"token\":\"b\"}\n\n");
        assert_eq!(out.len(), 3);
        assert!(out[0].is_ok());
        assert!(out[1].is_err());
        assert_eq!(out[2].as_ref().unwrap(), &StreamRecord::Token { token: "b".into() });
    }

    #[test]
    fn unknown_record_shape_is_an_error() {
        let mut dec = RecordDecoder::new();
        let out = dec.push(b"data: {\"status\":\"ok\"}\n\n");
        assert!(matches!(out[0], Err(WireError::Json(_))));
    }

    #[test]
    fn finish_decodes_unterminated_done() {
        let mut dec = RecordDecoder::new();
        assert!(dec.push(b"data: [DONE]").is_empty());
        assert!(matches!(dec.finish(), Some(Ok(StreamRecord::Done))));
    }
}
