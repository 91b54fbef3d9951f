//! Incremental Frame Decoder
//!
//! This module turns the bytes received on a connection into complete
//! [`Command`] frames. TCP gives no message boundaries, so the decoder must
//! cope with a frame split across many reads as well as several frames
//! arriving in one read.
//!
//! ## Grammar
//!
//! ```text
//! get <queue> [<timeout_ms>]\r?\n
//! put <queue>:\r?\n          <- trailing ':' opens a payload
//! <payload line>\r?\n        <- one payload item per line
//! \r?\n                      <- blank line closes the payload
//! quit\r?\n
//! ```
//!
//! ## How the Decoder Works
//!
//! Like the rest of the protocol layer, decoding never consumes bytes on
//! its own. [`FrameDecoder::decode`] looks at everything buffered so far and
//! returns either:
//! - `Some((command, consumed))` - a complete frame made of the first `consumed` bytes
//! - `None` - no complete frame yet; the buffer must be left untouched
//!
//! The caller appends incoming data, decodes in a loop, and advances the
//! buffer by `consumed` after each frame. A multi-line frame is only
//! reported once its closing blank line has arrived, so a partial payload
//! stays in the buffer until the rest shows up.

use crate::protocol::types::{Command, LF};
use bytes::Bytes;

/// Marks the end of an argument line that opens a payload
const PAYLOAD_MARKER: u8 = b':';

/// Incremental decoder for request frames.
///
/// # Example
///
/// ```
/// use linequeue::protocol::FrameDecoder;
///
/// let mut decoder = FrameDecoder::new();
/// let buf = b"put work:\nhello\n\nget work\n";
///
/// let (put, consumed) = decoder.decode(buf).unwrap();
/// assert_eq!(put.name, "put");
/// assert_eq!(put.payload_items.len(), 1);
///
/// let (get, _) = decoder.decode(&buf[consumed..]).unwrap();
/// assert_eq!(get.arguments, vec!["work".to_string()]);
/// ```
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Offset into the buffer up to which lines of a still-open payload
    /// have already been scanned
    scanned: usize,
}

impl FrameDecoder {
    /// Creates a new decoder instance.
    pub fn new() -> Self {
        Self { scanned: 0 }
    }

    /// Attempts to decode one frame from the start of `buf`.
    ///
    /// Returns the command and the number of bytes it occupies, or `None`
    /// when `buf` does not yet hold a complete frame.
    pub fn decode(&mut self, buf: &[u8]) -> Option<(Command, usize)> {
        let (header, mut pos) = match next_line(buf, 0) {
            Some(line) => line,
            None => {
                self.scanned = 0;
                return None;
            }
        };

        let opens_payload = header.last() == Some(&PAYLOAD_MARKER);
        let mut command = parse_header(header, opens_payload);

        if !opens_payload {
            self.scanned = 0;
            return Some((command, pos));
        }

        let body_start = pos;

        // Skip straight to where the previous call stopped scanning.
        if self.scanned > pos && self.scanned <= buf.len() {
            pos = self.scanned;
        }

        loop {
            match next_line(buf, pos) {
                Some((line, next)) if line.is_empty() => {
                    command.payload_items = collect_payload(buf, body_start, pos);
                    self.scanned = 0;
                    return Some((command, next));
                }
                Some((_, next)) => pos = next,
                None => {
                    self.scanned = pos;
                    return None;
                }
            }
        }
    }

    /// Forgets any partial-scan progress.
    ///
    /// Must be called if the caller discards bytes from the buffer without
    /// going through a decoded frame.
    pub fn reset(&mut self) {
        self.scanned = 0;
    }
}

/// Finds the line starting at `start`.
///
/// Returns the line content (without `\r\n` or `\n`) and the offset just
/// past its terminator, or `None` if the terminator hasn't arrived yet.
#[inline]
fn next_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let rest = buf.get(start..)?;
    let lf = rest.iter().position(|&b| b == LF)?;
    Some((strip_cr(&rest[..lf]), start + lf + 1))
}

#[inline]
fn strip_cr(line: &[u8]) -> &[u8] {
    match line.split_last() {
        Some((b'\r', head)) => head,
        _ => line,
    }
}

/// Splits the argument line into a lowercased verb and its arguments.
fn parse_header(line: &[u8], opens_payload: bool) -> Command {
    let line = if opens_payload {
        &line[..line.len() - 1]
    } else {
        line
    };
    let text = String::from_utf8_lossy(line);
    let mut parts = text.split_ascii_whitespace();

    let name = parts.next().unwrap_or_default().to_ascii_lowercase();
    let arguments = parts.map(str::to_string).collect();

    Command {
        name,
        arguments,
        payload_items: Vec::new(),
    }
}

/// Copies each payload line between `from` and `until` into its own item.
fn collect_payload(buf: &[u8], from: usize, until: usize) -> Vec<Bytes> {
    let mut items = Vec::new();
    let mut pos = from;
    while pos < until {
        match next_line(buf, pos) {
            Some((line, next)) => {
                items.push(Bytes::copy_from_slice(line));
                pos = next;
            }
            None => break,
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feeds `chunks` one at a time into a growing buffer, draining every
    /// frame as soon as it is complete.
    fn decode_in_chunks(chunks: &[&[u8]]) -> Vec<(usize, Command)> {
        let mut decoder = FrameDecoder::new();
        let mut buffer: Vec<u8> = Vec::new();
        let mut frames = Vec::new();

        for (i, chunk) in chunks.iter().enumerate() {
            buffer.extend_from_slice(chunk);
            while let Some((command, consumed)) = decoder.decode(&buffer) {
                buffer.drain(..consumed);
                frames.push((i, command));
            }
        }
        frames
    }

    #[test]
    fn test_decode_get() {
        let mut decoder = FrameDecoder::new();
        let (command, consumed) = decoder.decode(b"get test\n").unwrap();
        assert_eq!(command, Command::new("get", ["test"]));
        assert_eq!(consumed, 9);
    }

    #[test]
    fn test_decode_get_with_timeout_and_crlf() {
        let mut decoder = FrameDecoder::new();
        let (command, consumed) = decoder.decode(b"GET test 500\r\n").unwrap();
        assert_eq!(command, Command::new("get", ["test", "500"]));
        assert_eq!(consumed, 14);
    }

    #[test]
    fn test_decode_quit() {
        let mut decoder = FrameDecoder::new();
        let (command, _) = decoder.decode(b"QUIT\r\n").unwrap();
        assert_eq!(command, Command::new("quit", Vec::<String>::new()));
    }

    #[test]
    fn test_partial_line_is_not_decoded() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.decode(b"get te").is_none());
        assert!(decoder.decode(b"").is_none());
    }

    #[test]
    fn test_decode_put_single_item() {
        let mut decoder = FrameDecoder::new();
        let input = b"put test:\nhello\n\n";
        let (command, consumed) = decoder.decode(input).unwrap();
        assert_eq!(
            command,
            Command::new("put", ["test"]).with_payload([Bytes::from("hello")])
        );
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_decode_put_multiple_items_with_crlf() {
        let mut decoder = FrameDecoder::new();
        let input = b"put test 1000:\r\none\r\ntwo\r\n\r\n";
        let (command, consumed) = decoder.decode(input).unwrap();
        assert_eq!(command.name, "put");
        assert_eq!(command.arguments, vec!["test", "1000"]);
        assert_eq!(
            command.payload_items,
            vec![Bytes::from("one"), Bytes::from("two")]
        );
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_put_without_terminator_waits() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.decode(b"put test:\nhello\n").is_none());
        assert!(decoder.decode(b"put test:\nhel").is_none());
        assert!(decoder.decode(b"put test:\n").is_none());
    }

    #[test]
    fn test_get_split_at_every_byte() {
        let frame = b"get q\n";
        for split in 1..frame.len() {
            let frames = decode_in_chunks(&[&frame[..split], &frame[split..]]);
            assert_eq!(frames.len(), 1, "split at {}", split);
            assert_eq!(frames[0].0, 1, "emitted early at split {}", split);
            assert_eq!(frames[0].1, Command::new("get", ["q"]));
        }
    }

    #[test]
    fn test_get_one_byte_per_read() {
        let frame = b"get q\n";
        let chunks: Vec<&[u8]> = frame.chunks(1).collect();
        let frames = decode_in_chunks(&chunks);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, chunks.len() - 1);
    }

    #[test]
    fn test_put_split_at_every_pair_of_points() {
        let frame = b"put q:\ndata\n\n";
        let expected = Command::new("put", ["q"]).with_payload([Bytes::from("data")]);

        for a in 1..frame.len() {
            for b in a..frame.len() {
                let chunks: [&[u8]; 3] = [&frame[..a], &frame[a..b], &frame[b..]];
                let frames = decode_in_chunks(&chunks);
                assert_eq!(frames.len(), 1, "splits {} {}", a, b);
                assert_eq!(frames[0].0, 2, "emitted early at splits {} {}", a, b);
                assert_eq!(frames[0].1, expected);
            }
        }
    }

    #[test]
    fn test_pipelined_frames_in_one_read() {
        let frames = decode_in_chunks(&[b"put q:\na\n\nget q\nget q 10\nquit\n"]);
        let names: Vec<&str> = frames.iter().map(|(_, c)| c.name.as_str()).collect();
        assert_eq!(names, vec!["put", "get", "get", "quit"]);
        assert_eq!(frames[2].1.arguments, vec!["q", "10"]);
    }

    #[test]
    fn test_trailing_partial_frame_is_kept() {
        let mut decoder = FrameDecoder::new();
        let buf = b"get a\nput b:\npartial";
        let (_, consumed) = decoder.decode(buf).unwrap();
        assert_eq!(consumed, 6);
        assert!(decoder.decode(&buf[consumed..]).is_none());
    }

    #[test]
    fn test_payload_marker_stripped_from_verb_only_line() {
        let mut decoder = FrameDecoder::new();
        let (command, _) = decoder.decode(b"put:\nx\n\n").unwrap();
        assert_eq!(command.name, "put");
        assert!(command.arguments.is_empty());
        assert_eq!(command.payload_items, vec![Bytes::from("x")]);
    }

    #[test]
    fn test_payload_item_keeps_raw_bytes() {
        let mut decoder = FrameDecoder::new();
        let (command, _) = decoder.decode(b"put q:\n  spaced : out\xff\n\n").unwrap();
        assert_eq!(
            command.payload_items,
            vec![Bytes::from_static(b"  spaced : out\xff")]
        );
    }

    #[test]
    fn test_blank_line_decodes_to_empty_verb() {
        let mut decoder = FrameDecoder::new();
        let (command, consumed) = decoder.decode(b"\r\n").unwrap();
        assert!(command.name.is_empty());
        assert_eq!(consumed, 2);
    }

    #[test]
    fn test_reset_after_discarding_buffer() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.decode(b"put q:\nline one\nline two\n").is_none());
        decoder.reset();
        let (command, _) = decoder.decode(b"get q\n").unwrap();
        assert_eq!(command.name, "get");
    }
}
