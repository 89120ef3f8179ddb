//! Bounded line framing for worker connections
//!
//! Lines longer than the limit are reported once as [`Frame::Oversized`] and
//! their remaining bytes are skipped up to the next newline, so a worker that
//! never sends one cannot grow the read buffer. Bytes are decoded lossily;
//! invalid UTF-8 reaches the engine and is discarded there as malformed.

use std::io;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// Default maximum line length (bytes, excluding the newline)
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// One decoded unit of a worker's byte stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// A complete line, trimmed
    Line(String),
    /// A line exceeded the limit and is being skipped
    Oversized,
}

/// Newline-delimited decoder with a length limit
#[derive(Clone, Debug)]
pub struct LineCodec {
    max_length: usize,
    /// Bytes already scanned without finding a newline
    next_index: usize,
    /// Skipping the tail of an oversized line
    discarding: bool,
}

impl LineCodec {
    pub fn new(max_length: usize) -> Self {
        LineCodec {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        LineCodec::new(MAX_LINE_LENGTH)
    }
}

fn decode_line(raw: &[u8]) -> Frame {
    Frame::Line(String::from_utf8_lossy(raw).trim().to_string())
}

impl Decoder for LineCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        loop {
            // Never look further than one byte past the limit
            let read_to = self.max_length.saturating_add(1).min(buf.len());
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n');

            match (self.discarding, newline) {
                (true, Some(offset)) => {
                    buf.advance(self.next_index + offset + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(offset)) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let line = buf.split_to(end + 1);
                    return Ok(Some(decode_line(&line[..end])));
                }
                (false, None) if buf.len() > self.max_length => {
                    self.discarding = true;
                    self.next_index = 0;
                    return Ok(Some(Frame::Oversized));
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        self.next_index = 0;
        if buf.is_empty() || self.discarding {
            buf.clear();
            return Ok(None);
        }
        // Final line without a trailing newline
        let line = buf.split_to(buf.len());
        Ok(Some(decode_line(&line)))
    }
}
