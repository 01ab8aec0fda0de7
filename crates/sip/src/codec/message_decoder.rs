//! Stream framing for connection oriented transports.
//!
//! Datagram transports hand one message per packet to [`MessageParser`]
//! directly. On a stream the messages arrive back to back, possibly split or
//! coalesced, so [`MessageDecoder`] waits for a complete header block and
//! `Content-Length` bytes of body before parsing a frame.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;
use tracing::trace;

use crate::codec::MessageParser;
use crate::codec::header::header_name;
use crate::ensure;
use crate::protocol::{ParseError, SipMessage, normalize_name};

/// Maximum size in bytes of a start line plus header block
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct MessageDecoder {
    parser: MessageParser,
    strict: bool,
}

impl MessageDecoder {
    pub fn new(parser: MessageParser, strict: bool) -> Self {
        Self { parser, strict }
    }
}

impl Decoder for MessageDecoder {
    type Item = SipMessage;
    type Error = ParseError;

    /// Decodes the next message.
    ///
    /// CRLF keep-alives between messages are consumed silently.
    ///
    /// # Errors
    ///
    /// [`ParseError::TooLargeHeader`] when no header block ends within
    /// [`MAX_HEADER_BYTES`], otherwise whatever parsing the frame yields.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let keep_alive = src.iter().take_while(|b| **b == b'\r' || **b == b'\n').count();
        if keep_alive > 0 {
            trace!(bytes = keep_alive, "skip keep-alive");
            src.advance(keep_alive);
        }
        if src.is_empty() {
            return Ok(None);
        }

        let Some(header_len) = header_end(src) else {
            ensure!(src.len() <= MAX_HEADER_BYTES, ParseError::too_large_header(src.len(), MAX_HEADER_BYTES));
            return Ok(None);
        };
        ensure!(header_len <= MAX_HEADER_BYTES, ParseError::too_large_header(header_len, MAX_HEADER_BYTES));

        let frame_len = header_len + content_length(&src[..header_len])?;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(frame_len);
        trace!(len = frame_len, "decode sip frame");
        self.parser.parse(&frame, true, self.strict, None)
    }
}

/// Length of the header block including its blank line, which is a CRLF
/// or a bare LF following the last line feed.
fn header_end(src: &[u8]) -> Option<usize> {
    src.iter().enumerate().filter(|(_, b)| **b == b'\n').find_map(|(i, _)| match &src[i + 1..] {
        [b'\n', ..] => Some(i + 2),
        [b'\r', b'\n', ..] => Some(i + 3),
        _ => None,
    })
}

/// `Content-Length` of a raw header block, 0 when absent.
fn content_length(head: &[u8]) -> Result<usize, ParseError> {
    let head = String::from_utf8_lossy(head);
    for line in head.lines() {
        let Some(name) = header_name(line) else {
            continue;
        };
        if normalize_name(name) != "content-length" {
            continue;
        }

        let value = line.split_once(':').map_or("", |(_, value)| value.trim());
        return value.parse().map_err(|e| ParseError::header_parse_failure(name, format!("invalid number `{value}`: {e}")));
    }
    Ok(0)
}
