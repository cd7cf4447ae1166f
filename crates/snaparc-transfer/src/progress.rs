//! Splitting meter output into progress lines.
//!
//! The meter redraws its status line with carriage returns when forced to
//! report on a pipe, so both `\r` and `\n` terminate a line here.

use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// Longest line kept before it is cut, in bytes.
const MAX_LINE: usize = 4096;

/// Decodes a byte stream into trimmed, non-empty progress lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProgressDecoder;

impl ProgressDecoder {
    /// Creates a decoder.
    pub fn new() -> Self {
        Self
    }
}

fn to_line(raw: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(raw).trim().to_string();
    (!line.is_empty()).then_some(line)
}

impl Decoder for ProgressDecoder {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        loop {
            let end = match src.iter().position(|b| *b == b'\r' || *b == b'\n') {
                Some(end) => end,
                None if src.len() > MAX_LINE => {
                    let raw = src.split_to(MAX_LINE);
                    return Ok(to_line(&raw));
                }
                None => return Ok(None),
            };
            let raw = src.split_to(end);
            src.advance(1);
            if let Some(line) = to_line(&raw) {
                return Ok(Some(line));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, io::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        let raw = src.split_to(src.len());
        Ok(to_line(&raw))
    }
}
