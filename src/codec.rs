use bytes::BytesMut;
use encoding_rs::{CoderResult, Encoding};
use std::io;
use tokio_util::codec::Decoder;

/// Streaming byte-to-text decoder.
///
/// A multi-byte sequence split across chunks is held inside the decoder until
/// the rest arrives. A BOM is decoded to U+FEFF and left for [`crate::Parser`]
/// to strip; malformed input becomes U+FFFD.
pub struct TextDecoder {
    decoder: encoding_rs::Decoder,
    finished: bool,
}

impl TextDecoder {
    pub fn new(encoding: &'static Encoding) -> Self {
        Self {
            decoder: encoding.new_decoder_without_bom_handling(),
            finished: false,
        }
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.decoder.encoding()
    }

    fn transcode(&mut self, src: &[u8], last: bool) -> String {
        let mut out = String::with_capacity(self.output_len(src.len()));
        let mut read_total = 0;
        loop {
            let (result, read, _) =
                self.decoder
                    .decode_to_string(&src[read_total..], &mut out, last);
            read_total += read;
            match result {
                CoderResult::InputEmpty => break,
                CoderResult::OutputFull => {
                    let extra = self.output_len(src.len() - read_total).max(4);
                    out.reserve(extra);
                }
            }
        }
        out
    }

    fn output_len(&self, input_len: usize) -> usize {
        self.decoder
            .max_utf8_buffer_length(input_len)
            .unwrap_or_else(|| input_len.saturating_mul(3))
    }
}

impl Decoder for TextDecoder {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        let bytes = src.split();
        let text = self.transcode(&bytes, false);
        Ok((!text.is_empty()).then_some(text))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.finished {
            buf.clear();
            return Ok(None);
        }
        self.finished = true;
        let bytes = buf.split();
        let text = self.transcode(&bytes, true);
        Ok((!text.is_empty()).then_some(text))
    }
}
