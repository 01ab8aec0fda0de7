//! SIP request-line and status-line types.
//!
//! The first line of a message decides its kind: a line starting with the
//! literal [`SIP_VERSION`] is a status-line, anything else a request-line.
//! The grammars here are intentionally small, they validate the three
//! space-separated parts and keep the URI and reason phrase verbatim.

use std::fmt;
use std::str::FromStr;

use crate::ensure;
use crate::protocol::ParseError;

/// The only protocol version this crate speaks.
pub const SIP_VERSION: &str = "SIP/2.0";

/// SIP request method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Register,
    Options,
    Subscribe,
    Notify,
    Refer,
    Message,
    Info,
    Prack,
    Update,
    Publish,
    /// Any other syntactically valid token
    Extension(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Register => "REGISTER",
            Method::Options => "OPTIONS",
            Method::Subscribe => "SUBSCRIBE",
            Method::Notify => "NOTIFY",
            Method::Refer => "REFER",
            Method::Message => "MESSAGE",
            Method::Info => "INFO",
            Method::Prack => "PRACK",
            Method::Update => "UPDATE",
            Method::Publish => "PUBLISH",
            Method::Extension(token) => token,
        }
    }
}

impl FromStr for Method {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ensure!(is_token(s), ParseError::malformed_first_line(s, "method is not a token"));

        let method = match s {
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "REGISTER" => Method::Register,
            "OPTIONS" => Method::Options,
            "SUBSCRIBE" => Method::Subscribe,
            "NOTIFY" => Method::Notify,
            "REFER" => Method::Refer,
            "MESSAGE" => Method::Message,
            "INFO" => Method::Info,
            "PRACK" => Method::Prack,
            "UPDATE" => Method::Update,
            "PUBLISH" => Method::Publish,
            other => Method::Extension(other.to_owned()),
        };
        Ok(method)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `Method SP Request-URI SP SIP-Version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    method: Method,
    uri: String,
    version: String,
}

impl RequestLine {
    pub fn new<U: Into<String>>(method: Method, uri: U) -> Self {
        Self { method, uri: uri.into(), version: SIP_VERSION.to_owned() }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn set_uri<U: Into<String>>(&mut self, uri: U) {
        self.uri = uri.into();
    }

    /// Writes the line including its CRLF terminator.
    pub fn encode(&self, dst: &mut String) {
        dst.push_str(self.method.as_str());
        dst.push(' ');
        dst.push_str(&self.uri);
        dst.push(' ');
        dst.push_str(&self.version);
        dst.push_str("\r\n");
    }
}

impl FromStr for RequestLine {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split(' ');
        let (Some(method), Some(uri), Some(version), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
            return Err(ParseError::malformed_first_line(line, "expect `method SP uri SP version`"));
        };

        ensure!(!uri.is_empty() && uri.contains(':'), ParseError::malformed_first_line(line, "invalid request uri"));
        check_version(line, version)?;

        Ok(Self { method: method.parse().map_err(|e| ParseError::malformed_first_line(line, format!("invalid method: {e}")))?, uri: uri.to_owned(), version: version.to_owned() })
    }
}

/// `SIP-Version SP Status-Code SP Reason-Phrase`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    version: String,
    status_code: u16,
    reason_phrase: String,
}

impl StatusLine {
    pub fn new<R: Into<String>>(status_code: u16, reason_phrase: R) -> Self {
        Self { version: SIP_VERSION.to_owned(), status_code, reason_phrase: reason_phrase.into() }
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn reason_phrase(&self) -> &str {
        &self.reason_phrase
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Writes the line including its CRLF terminator.
    pub fn encode(&self, dst: &mut String) {
        dst.push_str(&self.version);
        dst.push(' ');
        dst.push_str(&self.status_code.to_string());
        dst.push(' ');
        dst.push_str(&self.reason_phrase);
        dst.push_str("\r\n");
    }
}

impl FromStr for StatusLine {
    type Err = ParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.splitn(3, ' ');
        let (Some(version), Some(code)) = (parts.next(), parts.next()) else {
            return Err(ParseError::malformed_first_line(line, "expect `version SP code SP reason`"));
        };
        check_version(line, version)?;

        ensure!(code.len() == 3 && code.bytes().all(|b| b.is_ascii_digit()), ParseError::malformed_first_line(line, "status code must be 3 digits"));
        let status_code: u16 = code.parse().map_err(|e| ParseError::malformed_first_line(line, format!("invalid status code: {e}")))?;
        ensure!((100..700).contains(&status_code), ParseError::malformed_first_line(line, "status code out of range"));

        Ok(Self { version: version.to_owned(), status_code, reason_phrase: parts.next().unwrap_or_default().to_owned() })
    }
}

/// The opening line of a message.
///
/// `None` inside `Request`/`Response` marks a shell whose first line failed to
/// parse and was reported to a listener instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    Request(Option<RequestLine>),
    Response(Option<StatusLine>),
    /// CRLF keep-alive, encodes as an empty line pair
    KeepAlive,
}

impl StartLine {
    pub fn is_request(&self) -> bool {
        matches!(self, StartLine::Request(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, StartLine::Response(_))
    }

    pub fn encode(&self, dst: &mut String) {
        match self {
            StartLine::Request(Some(line)) => line.encode(dst),
            StartLine::Response(Some(line)) => line.encode(dst),
            StartLine::Request(None) | StartLine::Response(None) | StartLine::KeepAlive => {}
        }
    }
}

fn check_version(line: &str, version: &str) -> Result<(), ParseError> {
    let digits = version.strip_prefix("SIP/").or_else(|| version.strip_prefix("sip/"));
    let valid = digits
        .and_then(|d| d.split_once('.'))
        .is_some_and(|(major, minor)| !major.is_empty() && !minor.is_empty() && major.bytes().chain(minor.bytes()).all(|b| b.is_ascii_digit()));
    ensure!(valid, ParseError::malformed_first_line(line, format!("invalid sip version `{version}`")));
    Ok(())
}

/// RFC 3261 `token`
pub(crate) fn is_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b"-.!%*_+`'~".contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_request_line() {
        let line: RequestLine = "REGISTER sip:a@b SIP/2.0".parse().unwrap();
        assert_eq!(line.method(), &Method::Register);
        assert_eq!(line.uri(), "sip:a@b");
        assert_eq!(line.version(), SIP_VERSION);

        let mut encoded = String::new();
        line.encode(&mut encoded);
        assert_eq!(encoded, "REGISTER sip:a@b SIP/2.0\r\n");
    }

    #[test]
    fn parse_extension_method() {
        let line: RequestLine = "FOO-BAR sip:x@y SIP/2.0".parse().unwrap();
        assert_eq!(line.method(), &Method::Extension("FOO-BAR".into()));
    }

    #[test]
    fn reject_bad_request_lines() {
        assert!(matches!("INVITE".parse::<RequestLine>(), Err(ParseError::MalformedFirstLine { .. })));
        assert!(matches!("INVITE sip:a@b HTTP/1.1".parse::<RequestLine>(), Err(ParseError::MalformedFirstLine { .. })));
        assert!(matches!("INV(TE sip:a@b SIP/2.0".parse::<RequestLine>(), Err(ParseError::MalformedFirstLine { .. })));
        assert!(matches!("INVITE sip:a@b SIP/2.0 extra".parse::<RequestLine>(), Err(ParseError::MalformedFirstLine { .. })));
    }

    #[test]
    fn parse_status_line() {
        let line: StatusLine = "SIP/2.0 180 Ringing Now".parse().unwrap();
        assert_eq!(line.status_code(), 180);
        assert_eq!(line.reason_phrase(), "Ringing Now");

        let empty_reason: StatusLine = "SIP/2.0 200".parse().unwrap();
        assert_eq!(empty_reason.reason_phrase(), "");

        let mut encoded = String::new();
        line.encode(&mut encoded);
        assert_eq!(encoded, "SIP/2.0 180 Ringing Now\r\n");
    }

    #[test]
    fn reject_bad_status_lines() {
        assert!("SIP/2.0 20 OK".parse::<StatusLine>().is_err());
        assert!("SIP/2.0 abc OK".parse::<StatusLine>().is_err());
        assert!("SIP/2.0 999 OK".parse::<StatusLine>().is_err());
        assert!("SIP/2.0".parse::<StatusLine>().is_err());
    }
}
