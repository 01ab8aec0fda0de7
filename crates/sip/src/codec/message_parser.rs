//! Buffer to [`SipMessage`] with selective header parsing.
//!
//! The parser tokenizes the buffer, classifies the first line, then hands
//! each logical header line to the [`HeaderPolicy`](crate::codec::header::HeaderPolicy)
//! of its context: eager headers are parsed into structured form right away,
//! the rest is stored as raw text in the message's lazy store.

use bytes::Bytes;
use tracing::{debug, trace, warn};
use triomphe::Arc;

use crate::codec::header::header_name;
use crate::codec::listener::{ErrorContext, ParseExceptionListener};
use crate::codec::tokenizer::{MessageLines, tokenize};
use crate::context::MessageContext;
use crate::protocol::{Body, ContentLength, Header, ParseError, RequestLine, SIP_VERSION, SipMessage, StartLine, StatusLine, normalize_name};

#[derive(Debug, Clone)]
pub struct MessageParser {
    context: Arc<MessageContext>,
}

impl MessageParser {
    pub fn new(context: Arc<MessageContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<MessageContext> {
        &self.context
    }

    /// Parses the first message in `buf`.
    ///
    /// Returns `Ok(None)` when `buf` holds nothing but control characters.
    /// With `read_body` and a `Content-Length` header the bytes after the
    /// header block are taken as the body, bounded by `Content-Length`. With
    /// `strict` a body shorter than `Content-Length`, or a `Content-Length: 0`
    /// message not ending in a blank line, is a
    /// [`ParseError::BodyLengthMismatch`].
    ///
    /// A bad first line, or a header line without a name, is returned as an
    /// error unless `listener` takes it. A header that fails to parse goes to
    /// `listener` and is dropped when there is none.
    pub fn parse(
        &self,
        buf: &[u8],
        read_body: bool,
        strict: bool,
        listener: Option<&dyn ParseExceptionListener>,
    ) -> Result<Option<SipMessage>, ParseError> {
        let Some(lines) = tokenize(buf)? else {
            return Ok(None);
        };

        let (start, first_line_error) = match classify(&lines.first_line) {
            Ok(start) => (start, None),
            Err(e) => (empty_start(&lines.first_line), Some(e)),
        };

        let mut message = SipMessage::with_start(start, Arc::clone(&self.context));
        if let Some(e) = first_line_error {
            let Some(listener) = listener else {
                return Err(e);
            };
            listener.handle_exception(e, &mut message, ErrorContext::FirstLine, &lines.first_line, buf)?;
        }

        self.fill(&mut message, &lines, buf, read_body, strict, listener)?;
        Ok(Some(message))
    }

    /// Parses `buf` into an existing message shell.
    ///
    /// The shell keeps its kind: a status-line can't be parsed into a request
    /// and the other way round. Headers and body of the shell are replaced.
    /// An empty buffer leaves the shell untouched.
    pub fn reparse(
        &self,
        buf: &[u8],
        message: &mut SipMessage,
        read_body: bool,
        strict: bool,
        listener: Option<&dyn ParseExceptionListener>,
    ) -> Result<(), ParseError> {
        let Some(lines) = tokenize(buf)? else {
            return Ok(());
        };

        let start = match classify(&lines.first_line) {
            Ok(start) if kind_matches(message.start_line(), &start) => Ok(start),
            Ok(_) => Err(ParseError::malformed_first_line(&lines.first_line, "message kind differs from the shell")),
            Err(e) => Err(e),
        };

        match start {
            Ok(start) => {
                message.reset();
                message.set_start_line(start);
            }
            Err(e) => {
                let Some(listener) = listener else {
                    return Err(e);
                };
                message.reset();
                listener.handle_exception(e, message, ErrorContext::FirstLine, &lines.first_line, buf)?;
            }
        }

        self.fill(message, &lines, buf, read_body, strict, listener)
    }

    fn fill(
        &self,
        message: &mut SipMessage,
        lines: &MessageLines,
        buf: &[u8],
        read_body: bool,
        strict: bool,
        listener: Option<&dyn ParseExceptionListener>,
    ) -> Result<(), ParseError> {
        for line in &lines.headers {
            self.dispatch(message, line, buf, listener)?;
        }
        message.set_header_size(lines.body_offset);

        // the body is framed by Content-Length only, and only read on request
        let (true, Some(content_length)) = (read_body, message.content_length()) else {
            return Ok(());
        };
        let available = &buf[lines.body_offset.min(buf.len())..];

        if content_length == 0 {
            if strict && !(buf.ends_with(b"\r\n\r\n") || buf.ends_with(b"\n\n")) {
                return Err(ParseError::body_length_mismatch(0, available.len()));
            }
            return Ok(());
        }

        if available.len() < content_length {
            if strict {
                return Err(ParseError::body_length_mismatch(content_length, available.len()));
            }
            debug!(content_length, actual = available.len(), "body shorter than content-length, using actual length");
            message.add_header(Header::ContentLength(ContentLength(available.len())));
        }

        let body = &available[..content_length.min(available.len())];
        message.set_parsed_body(Body::Bytes(Bytes::copy_from_slice(body)));
        Ok(())
    }

    fn dispatch(
        &self,
        message: &mut SipMessage,
        line: &str,
        buf: &[u8],
        listener: Option<&dyn ParseExceptionListener>,
    ) -> Result<(), ParseError> {
        let Some(name) = header_name(line) else {
            let error = ParseError::missing_header_name(line);
            let Some(listener) = listener else {
                return Err(error);
            };
            return listener.handle_exception(error, message, ErrorContext::Header { name: None }, line, buf);
        };

        let key = normalize_name(name);
        if !self.context.policy().is_eager(&key) {
            trace!(header = %key, "defer header");
            message.lazy_headers().append(&key, line);
            return Ok(());
        }

        trace!(header = %key, "parse header eagerly");
        match self.context.parser().parse(line) {
            Ok(header) => {
                message.push_parsed_header(header);
                Ok(())
            }
            Err(e) => self.report(e, message, ErrorContext::Header { name: Some(key) }, line, buf, listener),
        }
    }

    fn report(
        &self,
        error: ParseError,
        message: &mut SipMessage,
        context: ErrorContext,
        line: &str,
        buf: &[u8],
        listener: Option<&dyn ParseExceptionListener>,
    ) -> Result<(), ParseError> {
        if let Some(listener) = listener {
            return listener.handle_exception(error, message, context, line, buf);
        }

        if self.context.report_dropped_headers() {
            warn!(cause = %error, line, "drop unparseable header");
        } else {
            debug!(cause = %error, line, "drop unparseable header");
        }
        Ok(())
    }
}

/// A line starting with the literal version is a status-line, anything else
/// a request-line.
fn classify(first_line: &str) -> Result<StartLine, ParseError> {
    if first_line.starts_with(SIP_VERSION) {
        Ok(StartLine::Response(Some(first_line.parse::<StatusLine>()?)))
    } else {
        Ok(StartLine::Request(Some(first_line.parse::<RequestLine>()?)))
    }
}

fn empty_start(first_line: &str) -> StartLine {
    if first_line.starts_with(SIP_VERSION) { StartLine::Response(None) } else { StartLine::Request(None) }
}

fn kind_matches(shell: &StartLine, parsed: &StartLine) -> bool {
    match shell {
        StartLine::Request(_) => parsed.is_request(),
        StartLine::Response(_) => parsed.is_response(),
        StartLine::KeepAlive => true,
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::codec::PassThroughListener;
    use crate::codec::header::{DefaultHeaderParser, HeaderParser, HeaderPolicy, MockHeaderParser};
    use crate::protocol::Method;

    const REGISTER: &str = "REGISTER sip:a@b SIP/2.0\r\nVia: SIP/2.0/UDP 1.2.3.4\r\nCall-ID: xyz\r\nCSeq: 1 REGISTER\r\nContent-Length: 0\r\n\r\n";

    fn parser(eager: &str) -> MessageParser {
        MessageParser::new(Arc::new(MessageContext::new(HeaderPolicy::from_config(Some(eager)))))
    }

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<(ErrorContext, String)>>,
        abort: bool,
    }

    impl ParseExceptionListener for Recording {
        fn handle_exception(
            &self,
            error: ParseError,
            _message: &mut SipMessage,
            context: ErrorContext,
            raw_text: &str,
            _raw_buffer: &[u8],
        ) -> Result<(), ParseError> {
            self.seen.lock().push((context, raw_text.to_owned()));
            if self.abort { Err(error) } else { Ok(()) }
        }
    }

    #[test]
    fn register_all_eager() {
        let message = parser("via, call-id, cseq, content-length").parse(REGISTER.as_bytes(), true, true, None).unwrap().unwrap();

        assert!(message.is_request());
        assert_eq!(message.request_line().unwrap().method(), &Method::Register);
        assert_eq!(message.headers().len(), 4);
        assert!(message.lazy_headers().is_empty());
        assert_eq!(message.header_size(), REGISTER.len());
        assert_eq!(message.encode(), REGISTER);
    }

    #[test]
    fn register_via_only() {
        let message = parser("via").parse(REGISTER.as_bytes(), true, true, None).unwrap().unwrap();

        let structured: Vec<_> = message.headers().iter().map(|h| h.key().to_owned()).collect();
        assert_eq!(structured, vec!["via", "content-length"]);
        assert_eq!(message.lazy_headers().all_names(), vec!["call-id", "cseq"]);
        assert_eq!(message.raw_header("cseq").as_deref(), Some("CSeq: 1 REGISTER\r\n"));

        let cseq = message.header_values("cseq").unwrap();
        assert_eq!(cseq.len(), 1);
        assert_eq!(cseq[0].as_cseq().unwrap().seq, 1);
        assert!(!message.lazy_headers().contains("cseq"));
        assert_eq!(message.lazy_headers().all_names(), vec!["call-id"]);

        // promoted headers move ahead of the deferred ones
        assert_eq!(
            message.encode(),
            "REGISTER sip:a@b SIP/2.0\r\nVia: SIP/2.0/UDP 1.2.3.4\r\nCSeq: 1 REGISTER\r\nCall-ID: xyz\r\nContent-Length: 0\r\n\r\n"
        );
    }

    #[test]
    fn promotion_is_one_shot() {
        let mut mock = MockHeaderParser::new();
        mock.expect_parse().withf(|line| line.starts_with("CSeq")).times(1).returning(|line| DefaultHeaderParser.parse(line));
        mock.expect_parse().withf(|line| !line.starts_with("CSeq")).returning(|line| DefaultHeaderParser.parse(line));

        let context = MessageContext::new(HeaderPolicy::from_config(Some("via"))).with_parser(std::sync::Arc::new(mock));
        let message = MessageParser::new(Arc::new(context)).parse(REGISTER.as_bytes(), true, false, None).unwrap().unwrap();

        assert_eq!(message.header("CSeq").unwrap().unwrap().value(), "1 REGISTER");
        assert_eq!(message.header("cseq").unwrap().unwrap().value(), "1 REGISTER");
        assert_eq!(message.header_values("CSEQ").unwrap().len(), 1);
    }

    #[test]
    fn repeated_deferred_headers_are_kept() {
        let buf = "INVITE sip:bob@b SIP/2.0\r\nRecord-Route: <sip:p1>\r\nRecord-Route: <sip:p2>\r\nContent-Length: 0\r\n\r\n";
        let message = parser("").parse(buf.as_bytes(), true, true, None).unwrap().unwrap();

        assert_eq!(message.raw_header("record-route").as_deref(), Some("Record-Route: <sip:p1>\r\nRecord-Route: <sip:p2>\r\n"));
        assert_eq!(message.header_values("record-route").unwrap().len(), 2);
        assert_eq!(message.encode(), buf);
    }

    #[test]
    fn body_by_content_length() {
        let buf = b"MESSAGE sip:a@b SIP/2.0\r\nContent-Length: 5\r\n\r\nhelloNEXT";
        let message = parser("").parse(buf, true, true, None).unwrap().unwrap();

        assert_eq!(message.body(), &Body::Bytes(Bytes::from_static(b"hello")));
        assert!(message.encode_bytes().ends_with(b"Content-Length: 5\r\n\r\nhello"));

        let headless = parser("").parse(buf, false, false, None).unwrap().unwrap();
        assert!(headless.body().is_empty());
    }

    #[test]
    fn short_body_strict_and_lenient() {
        let buf = b"MESSAGE sip:a@b SIP/2.0\r\nl: 10\r\n\r\nhello";

        let err = parser("").parse(buf, true, true, None).unwrap_err();
        assert!(matches!(err, ParseError::BodyLengthMismatch { expected: 10, actual: 5 }));

        let message = parser("").parse(buf, true, false, None).unwrap().unwrap();
        assert_eq!(message.content_length(), Some(5));
        assert!(message.encode().ends_with("Content-Length: 5\r\n\r\nhello"));
    }

    #[test]
    fn strict_check_needs_content_length_and_body() {
        let buf = b"BYE sip:a@b SIP/2.0\r\nCall-ID: x\r\nCSeq: 1 BYE";
        let message = parser("").parse(buf, true, true, None).unwrap().unwrap();
        assert_eq!(message.content_length(), None);
        assert!(message.body().is_empty());

        let unread = b"OPTIONS sip:a@b SIP/2.0\r\nContent-Length: 0\r\n\r\ngarbage";
        assert!(parser("").parse(unread, false, true, None).unwrap().is_some());

        let short = b"MESSAGE sip:a@b SIP/2.0\r\nContent-Length: 10\r\n\r\nhello";
        let message = parser("").parse(short, false, true, None).unwrap().unwrap();
        assert_eq!(message.content_length(), Some(10));
        assert!(message.body().is_empty());
    }

    #[test]
    fn strict_zero_length_needs_blank_line() {
        let buf = b"OPTIONS sip:a@b SIP/2.0\r\nContent-Length: 0\r\n\r\ngarbage";
        assert!(matches!(parser("").parse(buf, true, true, None), Err(ParseError::BodyLengthMismatch { expected: 0, actual: 7 })));
        assert!(parser("").parse(buf, true, false, None).unwrap().is_some());
    }

    #[test]
    fn bad_first_line_without_listener() {
        let err = parser("").parse(b"HELLO\r\n\r\n", true, false, None).unwrap_err();
        assert!(matches!(err, ParseError::MalformedFirstLine { .. }));
    }

    #[test]
    fn bad_first_line_with_listener() {
        let listener = Recording::default();
        let message = parser("").parse(b"SIP/2.0 abc OK\r\nCall-ID: x\r\n\r\n", true, false, Some(&listener)).unwrap().unwrap();

        assert!(message.is_response());
        assert!(message.status_line().is_none());
        assert_eq!(listener.seen.lock()[0], (ErrorContext::FirstLine, "SIP/2.0 abc OK".to_owned()));
        assert!(message.lazy_headers().contains("call-id"));
    }

    #[test]
    fn header_without_name_fails() {
        let buf = b"BYE sip:a@b SIP/2.0\r\nnonsense\r\nCall-ID: x\r\n\r\n";

        let err = parser("").parse(buf, true, false, None).unwrap_err();
        assert!(matches!(err, ParseError::MissingHeaderName { ref line } if line == "nonsense"));

        let mut shell = parser("").parse(b"BYE sip:a@b SIP/2.0\r\n\r\n", true, false, None).unwrap().unwrap();
        assert!(matches!(parser("").reparse(buf, &mut shell, true, false, None), Err(ParseError::MissingHeaderName { .. })));
    }

    #[test]
    fn bad_eager_header_dropped_or_reported() {
        let buf = b"BYE sip:a@b SIP/2.0\r\nCSeq: banana\r\nnonsense\r\nCall-ID: x\r\n\r\n";

        let message = parser("cseq, call-id").parse(b"BYE sip:a@b SIP/2.0\r\nCSeq: banana\r\nCall-ID: x\r\n\r\n", true, false, None).unwrap().unwrap();
        assert!(message.header("cseq").unwrap().is_none());
        assert_eq!(message.headers().len(), 1);

        let listener = Recording::default();
        parser("cseq, call-id").parse(buf, true, false, Some(&listener)).unwrap().unwrap();
        let seen = listener.seen.lock();
        assert_eq!(seen[0], (ErrorContext::Header { name: Some("cseq".into()) }, "CSeq: banana".to_owned()));
        assert_eq!(seen[1], (ErrorContext::Header { name: None }, "nonsense".to_owned()));

        let aborting = Recording { abort: true, ..Recording::default() };
        assert!(matches!(parser("cseq").parse(buf, true, false, Some(&aborting)), Err(ParseError::HeaderParseFailure { .. })));
    }

    #[test]
    fn pass_through_keeps_bad_headers() {
        let buf = b"BYE sip:a@b SIP/2.0\r\nMax-Forwards: many\r\nContent-Length: 0\r\n\r\n";
        let message = parser("max-forwards").parse(buf, true, false, Some(&PassThroughListener)).unwrap().unwrap();

        assert_eq!(message.unrecognized(), ["Max-Forwards: many"]);
        assert_eq!(message.encode().as_bytes(), buf);
    }

    #[test]
    fn promoted_parse_failure_surfaces() {
        let message = parser("").parse(b"BYE sip:a@b SIP/2.0\r\nCSeq: banana\r\n\r\n", true, false, None).unwrap().unwrap();
        assert!(matches!(message.header("cseq"), Err(ParseError::InvalidPromotedHeader { .. })));
        assert!(message.header("cseq").unwrap().is_none());
    }

    #[test]
    fn reparse_into_shell() {
        let parser = parser("via");
        let mut message = parser.parse(REGISTER.as_bytes(), true, false, None).unwrap().unwrap();

        parser.reparse(b"BYE sip:x@y SIP/2.0\r\nSubject: again\r\n\r\n", &mut message, true, false, None).unwrap();
        assert_eq!(message.request_line().unwrap().method(), &Method::Bye);
        assert_eq!(message.header_names(), vec!["subject"]);

        let err = parser.reparse(b"SIP/2.0 200 OK\r\n\r\n", &mut message, true, false, None).unwrap_err();
        assert!(matches!(err, ParseError::MalformedFirstLine { .. }));
    }

    #[test]
    fn nothing_to_parse() {
        assert!(parser("").parse(b"\r\n\r\n", true, true, None).unwrap().is_none());
    }
}
