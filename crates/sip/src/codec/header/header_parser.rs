//! Turning a logical header line into a [`Header`].

use tracing::trace;

use crate::ensure;
use crate::protocol::{is_token, CSeq, CallId, ContentLength, ContentType, ExtensionHeader, Header, MaxForwards, ParseError, Via, normalize_name};

/// Parses one complete logical header line, `Name: value`, into its
/// structured form.
///
/// The parser is shared through the message context, implementations must
/// not keep per-message state.
#[cfg_attr(test, mockall::automock)]
pub trait HeaderParser: Send + Sync {
    fn parse(&self, line: &str) -> Result<Header, ParseError>;
}

/// Knows the handful of headers with a typed representation and keeps
/// everything else as [`ExtensionHeader`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHeaderParser;

impl HeaderParser for DefaultHeaderParser {
    fn parse(&self, line: &str) -> Result<Header, ParseError> {
        let (name, value) = split_header(line)?;
        let key = normalize_name(name);
        trace!(header = %key, "parse header");

        let header = match key.as_str() {
            "via" => Header::Via(Via::parse(value)?),
            "call-id" => {
                ensure!(!value.is_empty(), ParseError::header_parse_failure(name, "empty call-id"));
                Header::CallId(CallId(value.to_owned()))
            }
            "cseq" => Header::CSeq(CSeq::parse(value)?),
            "max-forwards" => {
                Header::MaxForwards(MaxForwards(value.parse().map_err(|e| ParseError::header_parse_failure(name, format!("invalid number `{value}`: {e}")))?))
            }
            "content-length" => {
                Header::ContentLength(ContentLength(value.parse().map_err(|e| ParseError::header_parse_failure(name, format!("invalid number `{value}`: {e}")))?))
            }
            "content-type" => Header::ContentType(ContentType::parse(value)?),
            _ => Header::Extension(ExtensionHeader::new(name, value)),
        };
        Ok(header)
    }
}

/// Extracts the header name of a logical line: the trimmed text before the
/// first `:`. Returns `None` when there is no colon or the name is empty.
pub fn header_name(line: &str) -> Option<&str> {
    let (name, _) = line.split_once(':')?;
    let name = name.trim();
    (!name.is_empty()).then_some(name)
}

fn split_header(line: &str) -> Result<(&str, &str), ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let name = header_name(line).ok_or_else(|| ParseError::missing_header_name(line))?;
    ensure!(is_token(name), ParseError::header_parse_failure(name, "invalid character in header name"));
    let value = line.split_once(':').map_or("", |(_, value)| value.trim());
    Ok((name, value))
}
