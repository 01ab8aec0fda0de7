//! Splits a raw buffer into the first line, logical header lines and the body
//! offset.
//!
//! Physical lines end in CR, LF or CRLF. A line starting with SP or HT
//! continues the previous header: that first whitespace character is dropped
//! and the rest of the line is appended as is. The first empty line ends the
//! header block.
//!
//! Lines are decoded as UTF-8. Invalid sequences become U+FFFD, so a header
//! carrying non UTF-8 bytes is not written back byte for byte.

use crate::protocol::ParseError;

/// The logical lines of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageLines {
    pub first_line: String,
    pub headers: Vec<String>,
    /// Offset of the first body byte, the buffer length when the blank line
    /// is missing
    pub body_offset: usize,
}

/// Tokenizes `buf`.
///
/// Leading control characters are skipped, a buffer holding nothing else
/// yields `Ok(None)`. A missing terminal blank line is tolerated.
///
/// # Errors
///
/// [`ParseError::BadHeaderContinuation`] when a continuation line has no
/// header to attach to.
pub fn tokenize(buf: &[u8]) -> Result<Option<MessageLines>, ParseError> {
    let Some(start) = buf.iter().position(|b| *b >= 0x20) else {
        return Ok(None);
    };

    let mut lines = PhysicalLines { buf, pos: start };
    let mut first_line: Option<String> = None;
    let mut headers = Vec::new();
    let mut pending: Option<String> = None;

    while let Some(line) = lines.next() {
        let line = trim_end(line);
        if line.is_empty() {
            break;
        }

        let text = String::from_utf8_lossy(line);
        if first_line.is_none() {
            first_line = Some(text.into_owned());
            continue;
        }

        if line[0] == b' ' || line[0] == b'\t' {
            let header = pending.as_mut().ok_or(ParseError::BadHeaderContinuation)?;
            header.push_str(&text[1..]);
        } else if let Some(previous) = pending.replace(text.into_owned()) {
            headers.push(previous);
        }
    }

    headers.extend(pending);
    Ok(first_line.map(|first_line| MessageLines { first_line, headers, body_offset: lines.pos }))
}

struct PhysicalLines<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PhysicalLines<'a> {
    fn next(&mut self) -> Option<&'a [u8]> {
        if self.pos >= self.buf.len() {
            return None;
        }

        let rest = &self.buf[self.pos..];
        match rest.iter().position(|b| *b == b'\r' || *b == b'\n') {
            Some(end) => {
                let delimiter = if rest[end] == b'\r' && rest.get(end + 1) == Some(&b'\n') { 2 } else { 1 };
                self.pos += end + delimiter;
                Some(&rest[..end])
            }
            None => {
                self.pos = self.buf.len();
                Some(rest)
            }
        }
    }
}

fn trim_end(line: &[u8]) -> &[u8] {
    let end = line.iter().rposition(|b| *b > 0x20).map_or(0, |i| i + 1);
    &line[..end]
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn split_lines_and_body() {
        let buf = b"OPTIONS sip:a@b SIP/2.0\r\nVia: SIP/2.0/UDP h\r\nContent-Length: 2\r\n\r\nhi";
        let lines = tokenize(buf).unwrap().unwrap();

        assert_eq!(lines.first_line, "OPTIONS sip:a@b SIP/2.0");
        assert_eq!(lines.headers, vec!["Via: SIP/2.0/UDP h", "Content-Length: 2"]);
        assert_eq!(&buf[lines.body_offset..], b"hi");
    }

    #[test]
    fn fold_continuation_lines() {
        let buf = indoc! {"
            SIP/2.0 200 OK
            Subject: I know you're there,
              pick up the phone
            \tand talk to me!
            To: <sip:b>
        "};
        let lines = tokenize(buf.as_bytes()).unwrap().unwrap();

        assert_eq!(lines.headers, vec!["Subject: I know you're there, pick up the phoneand talk to me!", "To: <sip:b>"]);
        assert_eq!(lines.body_offset, buf.len());
    }

    #[test]
    fn continuation_drops_one_whitespace() {
        let lines = tokenize(b"MESSAGE sip:a@b SIP/2.0\r\nSubject: a,\r\n\tb\r\nAccept: x\r\n \t y\r\n\r\n").unwrap().unwrap();
        assert_eq!(lines.headers, vec!["Subject: a,b", "Accept: x\t y"]);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let lines = tokenize(b"BYE sip:a@b SIP/2.0\r\nSubject: caf\xe9\r\n\r\n").unwrap().unwrap();
        assert_eq!(lines.headers, vec!["Subject: caf\u{fffd}"]);
    }

    #[test]
    fn continuation_without_header() {
        let buf = b"INVITE sip:a@b SIP/2.0\r\n  dangling\r\n\r\n";
        assert!(matches!(tokenize(buf), Err(ParseError::BadHeaderContinuation)));
    }

    #[test]
    fn only_control_characters() {
        assert_eq!(tokenize(b"\r\n\r\n\0\x01").unwrap(), None);
        assert_eq!(tokenize(b"").unwrap(), None);
    }

    #[test]
    fn leading_crlf_skipped_and_lone_cr_delimits() {
        let lines = tokenize(b"\r\n\r\nBYE sip:a@b SIP/2.0\rCall-ID: x  \t\r\rbody").unwrap().unwrap();
        assert_eq!(lines.first_line, "BYE sip:a@b SIP/2.0");
        assert_eq!(lines.headers, vec!["Call-ID: x"]);
    }

    #[test]
    fn missing_blank_line_flushes_last_header() {
        let buf = b"BYE sip:a@b SIP/2.0\r\nCall-ID: x\r\nCSeq: 2 BYE";
        let lines = tokenize(buf).unwrap().unwrap();
        assert_eq!(lines.headers, vec!["Call-ID: x", "CSeq: 2 BYE"]);
        assert_eq!(lines.body_offset, buf.len());
    }
}
