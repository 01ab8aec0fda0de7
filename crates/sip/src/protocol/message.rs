//! The SIP message: start line, three header sources and a body.
//!
//! A message keeps headers in three places:
//!
//! - structured headers, parsed eagerly or promoted later, in order
//! - the [`LazyHeaderStore`] with raw text of deferred headers
//! - unrecognized lines a listener chose to pass through verbatim
//!
//! Reading a deferred header through [`SipMessage::header`] promotes it: the
//! raw text leaves the lazy store, gets parsed once and from then on lives
//! in the structured list, so mutations through [`SipMessage::with_header_mut`]
//! show up in the encoded output.

use bytes::{BufMut, Bytes, BytesMut};
use encoding_rs::{Encoding, UTF_8};
use parking_lot::RwLock;
use tracing::trace;
use triomphe::Arc;

use crate::context::MessageContext;
use crate::protocol::{
    Body, ContentLength, ContentType, EncodeError, Header, LazyHeaderStore, ParseError, RequestLine, StartLine, StatusLine,
    normalize_name,
};

const KEEP_ALIVE: &str = "\r\n\r\n";

#[derive(Debug)]
pub struct SipMessage {
    start: StartLine,
    headers: RwLock<Vec<Header>>,
    lazy: LazyHeaderStore,
    unrecognized: Vec<String>,
    body: Body,
    header_size: usize,
    context: Arc<MessageContext>,
}

impl SipMessage {
    pub fn request(line: RequestLine, context: Arc<MessageContext>) -> Self {
        Self::with_start(StartLine::Request(Some(line)), context)
    }

    pub fn response(line: StatusLine, context: Arc<MessageContext>) -> Self {
        Self::with_start(StartLine::Response(Some(line)), context)
    }

    /// A CRLF keep-alive, encodes as `\r\n\r\n`.
    pub fn keep_alive(context: Arc<MessageContext>) -> Self {
        Self::with_start(StartLine::KeepAlive, context)
    }

    pub(crate) fn with_start(start: StartLine, context: Arc<MessageContext>) -> Self {
        Self {
            start,
            headers: RwLock::new(Vec::new()),
            lazy: LazyHeaderStore::new(),
            unrecognized: Vec::new(),
            body: Body::Empty,
            header_size: 0,
            context,
        }
    }

    pub fn start_line(&self) -> &StartLine {
        &self.start
    }

    pub(crate) fn set_start_line(&mut self, start: StartLine) {
        self.start = start;
    }

    pub fn request_line(&self) -> Option<&RequestLine> {
        match &self.start {
            StartLine::Request(line) => line.as_ref(),
            _ => None,
        }
    }

    pub fn request_line_mut(&mut self) -> Option<&mut RequestLine> {
        match &mut self.start {
            StartLine::Request(line) => line.as_mut(),
            _ => None,
        }
    }

    pub fn status_line(&self) -> Option<&StatusLine> {
        match &self.start {
            StartLine::Response(line) => line.as_ref(),
            _ => None,
        }
    }

    pub fn is_request(&self) -> bool {
        self.start.is_request()
    }

    pub fn is_response(&self) -> bool {
        self.start.is_response()
    }

    pub fn is_keep_alive(&self) -> bool {
        matches!(self.start, StartLine::KeepAlive)
    }

    pub fn context(&self) -> &Arc<MessageContext> {
        &self.context
    }

    /// Bytes consumed by the start line and header block, blank line included.
    pub fn header_size(&self) -> usize {
        self.header_size
    }

    pub(crate) fn set_header_size(&mut self, header_size: usize) {
        self.header_size = header_size;
    }

    /// A copy of the first header called `name`, promoting a deferred one.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidPromotedHeader`] when the deferred raw
    /// text can't be parsed. The raw text is gone afterwards.
    pub fn header(&self, name: &str) -> Result<Option<Header>, ParseError> {
        let key = normalize_name(name);
        self.promote(&key)?;
        Ok(self.headers.read().iter().find(|header| header.key() == key).cloned())
    }

    /// Runs `f` on the first header called `name`, promoting a deferred one.
    ///
    /// The header list is locked while `f` runs, `f` must not call back into
    /// this message. Returns `None` when there is no such header.
    pub fn with_header_mut<F, R>(&self, name: &str, f: F) -> Result<Option<R>, ParseError>
    where
        F: FnOnce(&mut Header) -> R,
    {
        let key = normalize_name(name);
        self.promote(&key)?;
        Ok(self.headers.write().iter_mut().find(|header| header.key() == key).map(f))
    }

    /// Every header called `name`, promoting deferred ones.
    pub fn header_values(&self, name: &str) -> Result<Vec<Header>, ParseError> {
        let key = normalize_name(name);
        self.promote(&key)?;
        Ok(self.headers.read().iter().filter(|header| header.key() == key).cloned().collect())
    }

    /// A snapshot of the structured headers, deferred ones are not included.
    pub fn headers(&self) -> Vec<Header> {
        self.headers.read().clone()
    }

    /// Promotes every deferred header and returns all structured headers.
    pub fn all_headers(&self) -> Result<Vec<Header>, ParseError> {
        for name in self.lazy.all_names() {
            self.promote(&name)?;
        }
        Ok(self.headers())
    }

    /// The wire form of the header `name` without promoting it.
    ///
    /// Deferred headers yield their raw text verbatim, structured ones are
    /// encoded. Each line ends in CRLF.
    pub fn raw_header(&self, name: &str) -> Option<String> {
        let key = normalize_name(name);
        if let Some(raw) = self.lazy.get_raw(&key) {
            return Some(raw);
        }

        let mut raw = String::new();
        for header in self.headers.read().iter().filter(|header| header.key() == key) {
            header.encode(&mut raw);
        }
        (!raw.is_empty()).then_some(raw)
    }

    /// Normalized names of structured and deferred headers, without duplicates.
    pub fn header_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for header in self.headers.read().iter() {
            if !names.iter().any(|name| name == header.key()) {
                names.push(header.key().to_owned());
            }
        }
        for name in self.lazy.all_names() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Removes both the deferred and structured forms of `name`.
    pub fn remove_header(&self, name: &str) -> bool {
        let key = normalize_name(name);
        let removed_raw = self.lazy.remove(&key).is_some();

        let mut headers = self.headers.write();
        let before = headers.len();
        headers.retain(|header| header.key() != key);
        removed_raw || headers.len() != before
    }

    /// Appends a structured header. A `Content-Length` replaces the current one.
    pub fn add_header(&self, header: Header) {
        let mut headers = self.headers.write();
        if header.is_content_length() {
            headers.retain(|existing| !existing.is_content_length());
        }
        headers.push(header);
    }

    pub fn lazy_headers(&self) -> &LazyHeaderStore {
        &self.lazy
    }

    pub fn unrecognized(&self) -> &[String] {
        &self.unrecognized
    }

    /// Keeps `line` verbatim, it is written after the deferred headers.
    pub fn add_unrecognized<S: Into<String>>(&mut self, line: S) {
        self.unrecognized.push(line.into());
    }

    pub fn content_length(&self) -> Option<usize> {
        self.headers.read().iter().find_map(|header| match header {
            Header::ContentLength(ContentLength(len)) => Some(*len),
            _ => None,
        })
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Replaces the body and sets `Content-Length` to its encoded size.
    pub fn set_body<B: Into<Body>>(&mut self, body: B) {
        self.body = body.into();
        let len = self.body.to_bytes(self.charset(), self.context.internal_error_handler()).len();
        self.add_header(Header::ContentLength(ContentLength(len)));
    }

    /// Charset of the body per the `Content-Type` `charset` parameter,
    /// UTF-8 when absent or unknown.
    pub fn charset(&self) -> &'static Encoding {
        let Some(label) = self.content_type().and_then(|content_type| content_type.charset().map(str::to_owned)) else {
            return UTF_8;
        };

        Encoding::for_label(label.as_bytes()).unwrap_or_else(|| {
            self.context.internal_error_handler().handle(&EncodeError::internal_encoding_failure(&label, "unknown charset"));
            UTF_8
        })
    }

    fn content_type(&self) -> Option<ContentType> {
        if let Some(content_type) = self.headers.read().iter().find_map(Header::as_content_type) {
            return Some(content_type.clone());
        }

        // peek at the deferred text, encoding must not promote
        let raw = self.lazy.get_raw("content-type")?;
        let (_, value) = raw.lines().next()?.split_once(':')?;
        ContentType::parse(value).ok()
    }

    /// Rewrites the transport of the topmost `Via`.
    ///
    /// This is the only encode related step that changes the message, callers
    /// opt into it before encoding.
    pub fn set_transport(&self, transport: &str) -> Result<(), ParseError> {
        self.promote("via")?;
        if let Some(via) = self.headers.write().iter_mut().find_map(Header::as_via_mut) {
            via.set_transport(transport);
        }
        Ok(())
    }

    /// The message as text. Raw byte bodies are decoded with [`charset`](Self::charset).
    pub fn encode(&self) -> String {
        if self.is_keep_alive() {
            return KEEP_ALIVE.to_owned();
        }

        let charset = self.charset();
        let body = self.body.to_bytes(charset, self.context.internal_error_handler());
        let mut dst = String::with_capacity(self.header_size.max(256) + body.len());
        self.encode_head(|dst| self.start.encode(dst), body.len(), &mut dst);
        dst.push_str(&self.body.to_text(charset));
        dst
    }

    /// The message as wire bytes.
    pub fn encode_bytes(&self) -> Bytes {
        if self.is_keep_alive() {
            return Bytes::from_static(KEEP_ALIVE.as_bytes());
        }

        let body = self.body.to_bytes(self.charset(), self.context.internal_error_handler());
        let mut head = String::with_capacity(self.header_size.max(256));
        self.encode_head(|dst| self.start.encode(dst), body.len(), &mut head);

        let mut dst = BytesMut::with_capacity(head.len() + body.len());
        dst.put_slice(head.as_bytes());
        dst.put_slice(&body);
        dst.freeze()
    }

    /// [`set_transport`](Self::set_transport) followed by [`encode_bytes`](Self::encode_bytes).
    pub fn encode_bytes_for(&self, transport: &str) -> Result<Bytes, ParseError> {
        self.set_transport(transport)?;
        Ok(self.encode_bytes())
    }

    /// Writes the start line through `encode_start_line`, then the header
    /// sources in order and `Content-Length` last, ending with the blank line.
    fn encode_head<F>(&self, encode_start_line: F, body_len: usize, dst: &mut String)
    where
        F: FnOnce(&mut String),
    {
        encode_start_line(dst);

        for header in self.headers.read().iter().filter(|header| !header.is_content_length()) {
            header.encode(dst);
        }
        self.lazy.encode(dst);
        for line in &self.unrecognized {
            dst.push_str(line);
            dst.push_str("\r\n");
        }

        Header::ContentLength(ContentLength(body_len)).encode(dst);
        dst.push_str("\r\n");
    }

    /// Drops everything but the start line and context, used before reparse.
    pub(crate) fn reset(&mut self) {
        self.headers.get_mut().clear();
        self.lazy.clear();
        self.unrecognized.clear();
        self.body = Body::Empty;
        self.header_size = 0;
    }

    pub(crate) fn push_parsed_header(&mut self, header: Header) {
        self.headers.get_mut().push(header);
    }

    pub(crate) fn set_parsed_body(&mut self, body: Body) {
        self.body = body;
    }

    fn promote(&self, key: &str) -> Result<(), ParseError> {
        if let Some(promoted) = self.lazy.take_and_parse(key, self.context.parser())? {
            trace!(header = key, count = promoted.len(), "promote deferred header");
            self.headers.write().extend(promoted);
        }
        Ok(())
    }
}

impl Clone for SipMessage {
    /// A deep copy: headers, deferred text and body are duplicated, the
    /// context is shared.
    fn clone(&self) -> Self {
        Self {
            start: self.start.clone(),
            headers: RwLock::new(self.headers.read().clone()),
            lazy: self.lazy.clone(),
            unrecognized: self.unrecognized.clone(),
            body: self.body.clone(),
            header_size: self.header_size,
            context: Arc::clone(&self.context),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::header::HeaderPolicy;
    use crate::protocol::{CallId, ExtensionHeader, Method, Via};

    fn invite() -> SipMessage {
        let context = Arc::new(MessageContext::new(HeaderPolicy::default()));
        let message = SipMessage::request(RequestLine::new(Method::Invite, "sip:bob@example.com"), context);
        message.add_header(Header::Via(Via::parse("SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK1").unwrap()));
        message.add_header(Header::CallId(CallId("abc".into())));
        message
    }

    #[test]
    fn encode_puts_content_length_last() {
        let mut message = invite();
        message.add_header(Header::ContentLength(ContentLength(0)));
        message.lazy_headers().put("subject", "Subject: hi");
        message.add_unrecognized("X-Odd line");
        message.set_body("hello");

        assert_eq!(
            message.encode(),
            "INVITE sip:bob@example.com SIP/2.0\r\n\
             Via: SIP/2.0/UDP 10.0.0.1:5060;branch=z9hG4bK1\r\n\
             Call-ID: abc\r\n\
             Subject: hi\r\n\
             X-Odd line\r\n\
             Content-Length: 5\r\n\
             \r\n\
             hello"
        );
        assert_eq!(message.content_length(), Some(5));
    }

    #[test]
    fn missing_content_length_encodes_zero() {
        let message = invite();
        assert!(message.encode().ends_with("Content-Length: 0\r\n\r\n"));
        assert_eq!(message.encode().as_bytes(), &message.encode_bytes()[..]);
    }

    #[test]
    fn keep_alive_encoding() {
        let message = SipMessage::keep_alive(Arc::new(MessageContext::default()));
        assert_eq!(message.encode(), "\r\n\r\n");
        assert_eq!(&message.encode_bytes()[..], b"\r\n\r\n");
    }

    #[test]
    fn transport_rewrite_is_opt_in() {
        let message = invite();
        assert!(message.encode_bytes().windows(11).any(|w| w == b"SIP/2.0/UDP"));

        let bytes = message.encode_bytes_for("tcp").unwrap();
        assert!(bytes.windows(11).any(|w| w == b"SIP/2.0/TCP"));
        assert_eq!(message.header("via").unwrap().unwrap().as_via().unwrap().transport(), "TCP");
    }

    #[test]
    fn header_mut_changes_encoding() {
        let message = invite();
        message.lazy_headers().put("subject", "Subject: old");

        let updated = message.with_header_mut("Subject", |subject| subject.as_extension_mut().map(|subject| subject.set_value("new")));
        assert_eq!(updated.unwrap(), Some(Some(())));
        assert_eq!(message.with_header_mut("x-none", |_| ()).unwrap(), None);

        assert!(message.lazy_headers().is_empty());
        assert!(message.encode().contains("Subject: new\r\n"));
    }

    #[test]
    fn held_header_does_not_block_promotion() {
        let message = invite();
        message.lazy_headers().put("user-agent", "User-Agent: softphone");
        message.lazy_headers().put("subject", "Subject: old");

        let via = message.header("via").unwrap().unwrap();
        let user_agent = message.header("user-agent").unwrap().unwrap();
        message.with_header_mut("subject", |subject| subject.as_extension_mut().map(|subject| subject.set_value("new"))).unwrap();
        message.set_transport("tcp").unwrap();
        let encoded = message.encode();

        assert_eq!(via.as_via().unwrap().transport(), "UDP");
        assert_eq!(user_agent.value(), "softphone");
        assert!(encoded.contains("Via: SIP/2.0/TCP"));
        assert!(encoded.contains("Subject: new\r\n"));
    }

    #[test]
    fn raw_header_and_names() {
        let message = invite();
        message.lazy_headers().put("user-agent", "User-Agent:   spaced  ");

        assert_eq!(message.raw_header("USER-AGENT").as_deref(), Some("User-Agent:   spaced\r\n"));
        assert_eq!(message.raw_header("i").as_deref(), Some("Call-ID: abc\r\n"));
        assert_eq!(message.raw_header("x-none"), None);
        assert_eq!(message.header_names(), vec!["via", "call-id", "user-agent"]);
    }

    #[test]
    fn remove_header_both_forms() {
        let message = invite();
        message.lazy_headers().put("subject", "Subject: hi");
        message.add_header(Header::Extension(ExtensionHeader::new("Subject", "hi")));

        assert!(message.remove_header("subject"));
        assert!(message.raw_header("subject").is_none());
        assert!(!message.remove_header("subject"));
    }

    #[test]
    fn clone_is_deep() {
        let message = invite();
        message.lazy_headers().put("subject", "Subject: hi");
        let copy = message.clone();

        message.remove_header("subject");
        message.remove_header("call-id");

        assert!(copy.raw_header("subject").is_some());
        assert_eq!(copy.headers().len(), 2);
        assert!(Arc::ptr_eq(copy.context(), message.context()));
    }

    #[test]
    fn charset_from_content_type() {
        let mut message = invite();
        assert_eq!(message.charset(), UTF_8);

        message.lazy_headers().put("content-type", "Content-Type: text/plain;charset=windows-1252");
        assert_eq!(message.charset(), encoding_rs::WINDOWS_1252);
        assert!(message.lazy_headers().contains("content-type"));

        message.set_body("café");
        assert_eq!(message.content_length(), Some(4));
        assert!(message.encode_bytes().ends_with(b"caf\xe9"));
    }
}
