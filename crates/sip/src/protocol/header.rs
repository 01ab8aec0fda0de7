//! Structured SIP headers.
//!
//! Only the headers the message core itself needs to understand get a typed
//! representation: `Via` (transport rewrite), `Content-Length` (framing),
//! `Content-Type` (charset resolution) and a few dialog identifiers. Every
//! other header is an [`ExtensionHeader`] keeping its name and value verbatim.

use std::fmt;

use mime::Mime;

use crate::protocol::{Method, ParseError};

/// Returns the lowercase long form of a header name.
///
/// Compact forms from RFC 3261 and its extensions are expanded so that `v`
/// and `Via` land on the same key.
pub fn normalize_name(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    let expanded = match lower.as_str() {
        "v" => "via",
        "i" => "call-id",
        "m" => "contact",
        "e" => "content-encoding",
        "l" => "content-length",
        "c" => "content-type",
        "f" => "from",
        "t" => "to",
        "s" => "subject",
        "k" => "supported",
        "r" => "refer-to",
        "b" => "referred-by",
        "o" => "event",
        "u" => "allow-events",
        "x" => "session-expires",
        "y" => "identity",
        "n" => "identity-info",
        "a" => "accept-contact",
        "j" => "reject-contact",
        "d" => "request-disposition",
        _ => return lower,
    };
    expanded.to_owned()
}

/// A structurally parsed header.
#[derive(Debug, Clone, PartialEq)]
pub enum Header {
    Via(Via),
    CallId(CallId),
    CSeq(CSeq),
    MaxForwards(MaxForwards),
    ContentLength(ContentLength),
    ContentType(ContentType),
    Extension(ExtensionHeader),
}

impl Header {
    /// The name written on the wire.
    pub fn name(&self) -> &str {
        match self {
            Header::Via(_) => "Via",
            Header::CallId(_) => "Call-ID",
            Header::CSeq(_) => "CSeq",
            Header::MaxForwards(_) => "Max-Forwards",
            Header::ContentLength(_) => "Content-Length",
            Header::ContentType(_) => "Content-Type",
            Header::Extension(ext) => &ext.name,
        }
    }

    /// The normalized lookup key, see [`normalize_name`].
    pub fn key(&self) -> &str {
        match self {
            Header::Via(_) => "via",
            Header::CallId(_) => "call-id",
            Header::CSeq(_) => "cseq",
            Header::MaxForwards(_) => "max-forwards",
            Header::ContentLength(_) => "content-length",
            Header::ContentType(_) => "content-type",
            Header::Extension(ext) => &ext.key,
        }
    }

    pub fn is_content_length(&self) -> bool {
        matches!(self, Header::ContentLength(_))
    }

    /// Writes `Name: value\r\n`.
    pub fn encode(&self, dst: &mut String) {
        dst.push_str(self.name());
        dst.push_str(": ");
        dst.push_str(&self.value());
        dst.push_str("\r\n");
    }

    pub fn value(&self) -> String {
        match self {
            Header::Via(via) => via.to_string(),
            Header::CallId(call_id) => call_id.0.clone(),
            Header::CSeq(cseq) => cseq.to_string(),
            Header::MaxForwards(max_forwards) => max_forwards.0.to_string(),
            Header::ContentLength(content_length) => content_length.0.to_string(),
            Header::ContentType(content_type) => content_type.value.clone(),
            Header::Extension(ext) => ext.value.clone(),
        }
    }

    pub fn as_via(&self) -> Option<&Via> {
        match self {
            Header::Via(via) => Some(via),
            _ => None,
        }
    }

    pub fn as_via_mut(&mut self) -> Option<&mut Via> {
        match self {
            Header::Via(via) => Some(via),
            _ => None,
        }
    }

    pub fn as_cseq(&self) -> Option<&CSeq> {
        match self {
            Header::CSeq(cseq) => Some(cseq),
            _ => None,
        }
    }

    pub fn as_content_type(&self) -> Option<&ContentType> {
        match self {
            Header::ContentType(content_type) => Some(content_type),
            _ => None,
        }
    }

    pub fn as_extension(&self) -> Option<&ExtensionHeader> {
        match self {
            Header::Extension(ext) => Some(ext),
            _ => None,
        }
    }

    pub fn as_extension_mut(&mut self) -> Option<&mut ExtensionHeader> {
        match self {
            Header::Extension(ext) => Some(ext),
            _ => None,
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut encoded = String::new();
        self.encode(&mut encoded);
        f.write_str(&encoded)
    }
}

/// `Via: SIP/2.0/UDP host:port;branch=...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Via {
    protocol: String,
    transport: String,
    sent_by: String,
}

impl Via {
    pub fn parse(value: &str) -> Result<Self, ParseError> {
        let value = value.trim();
        let (sent_protocol, sent_by) =
            value.split_once(|c: char| c == ' ' || c == '\t').ok_or_else(|| ParseError::header_parse_failure("Via", "missing sent-by"))?;

        let (protocol, transport) =
            sent_protocol.rsplit_once('/').ok_or_else(|| ParseError::header_parse_failure("Via", "missing transport"))?;
        if protocol.is_empty() || transport.is_empty() || !protocol.contains('/') {
            return Err(ParseError::header_parse_failure("Via", format!("invalid sent-protocol `{sent_protocol}`")));
        }

        let sent_by = sent_by.trim_start();
        if sent_by.is_empty() {
            return Err(ParseError::header_parse_failure("Via", "missing sent-by"));
        }

        Ok(Self { protocol: protocol.to_owned(), transport: transport.to_owned(), sent_by: sent_by.to_owned() })
    }

    pub fn transport(&self) -> &str {
        &self.transport
    }

    pub fn set_transport<T: Into<String>>(&mut self, transport: T) {
        self.transport = transport.into().to_ascii_uppercase();
    }

    /// The host and port part, without parameters.
    pub fn host(&self) -> &str {
        self.sent_by.split(';').next().unwrap_or_default().trim()
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.sent_by.split(';').skip(1).find_map(|param| {
            let (key, value) = param.split_once('=').unwrap_or((param, ""));
            key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }

    pub fn branch(&self) -> Option<&str> {
        self.param("branch")
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} {}", self.protocol, self.transport, self.sent_by)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallId(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CSeq {
    pub seq: u32,
    pub method: Method,
}

impl CSeq {
    pub fn parse(value: &str) -> Result<Self, ParseError> {
        let mut parts = value.split_whitespace();
        let (Some(seq), Some(method), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ParseError::header_parse_failure("CSeq", format!("expect `seq method`, got `{value}`")));
        };
        let seq = seq.parse().map_err(|e| ParseError::header_parse_failure("CSeq", format!("invalid sequence `{seq}`: {e}")))?;
        let method = method.parse().map_err(|e| ParseError::header_parse_failure("CSeq", format!("invalid method `{method}`: {e}")))?;
        Ok(Self { seq, method })
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.method)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxForwards(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentLength(pub usize);

/// `Content-Type`, kept verbatim and parsed with [`mime`] for parameter access.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentType {
    value: String,
    mime: Mime,
}

impl ContentType {
    pub fn parse(value: &str) -> Result<Self, ParseError> {
        let value = value.trim();
        let mime = value.parse::<Mime>().map_err(|e| ParseError::header_parse_failure("Content-Type", e))?;
        Ok(Self { value: value.to_owned(), mime })
    }

    pub fn mime(&self) -> &Mime {
        &self.mime
    }

    /// The explicit `charset` parameter, if any.
    pub fn charset(&self) -> Option<&str> {
        self.mime.get_param(mime::CHARSET).map(|charset| charset.as_str())
    }
}

/// Any header without a dedicated type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionHeader {
    name: String,
    key: String,
    value: String,
}

impl ExtensionHeader {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        let name = name.into();
        let key = normalize_name(&name);
        Self { name, key, value: value.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn set_value<V: Into<String>>(&mut self, value: V) {
        self.value = value.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_compact_forms() {
        assert_eq!(normalize_name("v"), "via");
        assert_eq!(normalize_name("I"), "call-id");
        assert_eq!(normalize_name(" l "), "content-length");
        assert_eq!(normalize_name("m"), "contact");
        assert_eq!(normalize_name("User-Agent"), "user-agent");
    }

    #[test]
    fn via_transport_rewrite() {
        let mut via = Via::parse("SIP/2.0/UDP 1.2.3.4:5060;branch=z9hG4bK776;rport").unwrap();
        assert_eq!(via.transport(), "UDP");
        assert_eq!(via.host(), "1.2.3.4:5060");
        assert_eq!(via.branch(), Some("z9hG4bK776"));
        assert_eq!(via.param("rport"), Some(""));

        via.set_transport("tcp");
        assert_eq!(via.to_string(), "SIP/2.0/TCP 1.2.3.4:5060;branch=z9hG4bK776;rport");
    }

    #[test]
    fn via_rejects_garbage() {
        assert!(Via::parse("garbage").is_err());
        assert!(Via::parse("UDP 1.2.3.4").is_err());
    }

    #[test]
    fn cseq_round_trip() {
        let cseq = CSeq::parse("  42 INVITE ").unwrap();
        assert_eq!(cseq.seq, 42);
        assert_eq!(cseq.method, Method::Invite);
        assert_eq!(Header::CSeq(cseq).to_string(), "CSeq: 42 INVITE\r\n");
        assert!(CSeq::parse("x INVITE").is_err());
    }

    #[test]
    fn content_type_charset() {
        let content_type = ContentType::parse("text/plain; charset=ISO-8859-1").unwrap();
        assert_eq!(content_type.charset(), Some("ISO-8859-1"));
        assert_eq!(Header::ContentType(content_type).to_string(), "Content-Type: text/plain; charset=ISO-8859-1\r\n");

        let sdp = ContentType::parse("application/sdp").unwrap();
        assert_eq!(sdp.charset(), None);
    }

    #[test]
    fn extension_key_is_normalized() {
        let header = Header::Extension(ExtensionHeader::new("s", "hello"));
        assert_eq!(header.key(), "subject");
        assert_eq!(header.name(), "s");
        assert_eq!(header.to_string(), "s: hello\r\n");
    }
}
