//! zlib-stream decompression
//!
//! With transport compression the whole connection shares one zlib context.
//! A message may span several binary frames; it is complete once the
//! buffered input ends with the sync-flush marker.

use flate2::{Decompress, DecompressError, FlushDecompress};

const ZLIB_SUFFIX: [u8; 4] = [0x00, 0x00, 0xff, 0xff];
const OUTPUT_CHUNK: usize = 8 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum InflateError {
    #[error("zlib: {0}")]
    Zlib(#[from] DecompressError),

    #[error("Inflated payload is not UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Per-connection inflater
pub struct Inflater {
    decompress: Decompress,
    buffer: Vec<u8>,
}

impl Inflater {
    #[must_use]
    pub fn new() -> Self {
        Self {
            decompress: Decompress::new(true),
            buffer: Vec::new(),
        }
    }

    /// Feed one binary frame; returns the message text once it is complete
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<String>, InflateError> {
        self.buffer.extend_from_slice(chunk);
        if !self.buffer.ends_with(&ZLIB_SUFFIX) {
            return Ok(None);
        }

        let mut output = Vec::with_capacity(self.buffer.len() * 4);
        let mut offset = 0;
        loop {
            if output.capacity() - output.len() < OUTPUT_CHUNK {
                output.reserve(OUTPUT_CHUNK);
            }
            let in_before = self.decompress.total_in();
            let out_before = self.decompress.total_out();

            let result = self.decompress.decompress_vec(
                &self.buffer[offset..],
                &mut output,
                FlushDecompress::Sync,
            );
            if let Err(e) = result {
                self.buffer.clear();
                return Err(e.into());
            }

            let consumed = (self.decompress.total_in() - in_before) as usize;
            let produced = self.decompress.total_out() - out_before;
            offset += consumed;

            let output_full = output.len() == output.capacity();
            if offset >= self.buffer.len() && !output_full {
                break;
            }
            if consumed == 0 && produced == 0 {
                break;
            }
        }

        self.buffer.clear();
        Ok(Some(String::from_utf8(output)?))
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compress, Compression, FlushCompress};

    fn compress(stream: &mut Compress, text: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(text.len() + 64);
        stream
            .compress_vec(text.as_bytes(), &mut out, FlushCompress::Sync)
            .unwrap();
        out
    }

    #[test]
    fn test_messages_share_one_context() {
        let mut stream = Compress::new(Compression::default(), true);
        let mut inflater = Inflater::new();

        let first = compress(&mut stream, r#"{"op":10,"d":{"heartbeat_interval":40000}}"#);
        let second = compress(&mut stream, r#"{"op":11}"#);

        assert_eq!(
            inflater.push(&first).unwrap().as_deref(),
            Some(r#"{"op":10,"d":{"heartbeat_interval":40000}}"#)
        );
        assert_eq!(inflater.push(&second).unwrap().as_deref(), Some(r#"{"op":11}"#));
    }

    #[test]
    fn test_message_split_across_frames() {
        let mut stream = Compress::new(Compression::default(), true);
        let mut inflater = Inflater::new();
        let bytes = compress(&mut stream, r#"{"op":0,"t":"READY","s":1,"d":{}}"#);
        let (head, tail) = bytes.split_at(bytes.len() / 2);

        assert_eq!(inflater.push(head).unwrap(), None);
        assert_eq!(
            inflater.push(tail).unwrap().as_deref(),
            Some(r#"{"op":0,"t":"READY","s":1,"d":{}}"#)
        );
    }

    #[test]
    fn test_large_message() {
        let mut stream = Compress::new(Compression::default(), true);
        let mut inflater = Inflater::new();
        let text = "x".repeat(200_000);
        let mut out = Vec::with_capacity(text.len());
        stream
            .compress_vec(text.as_bytes(), &mut out, FlushCompress::Sync)
            .unwrap();

        assert_eq!(inflater.push(&out).unwrap().map(|s| s.len()), Some(200_000));
    }
}
