//! Message bodies and their charset handling.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use encoding_rs::Encoding;

use crate::context::InternalErrorHandler;
use crate::protocol::EncodeError;

/// The payload after the header block.
#[derive(Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    /// Text, written through the message charset
    Text(String),
    /// Raw bytes, written untouched
    Bytes(Bytes),
    /// Structured content such as an SDP description, written as its
    /// `Display` output through the message charset
    Object(Arc<dyn fmt::Display + Send + Sync>),
}

impl Body {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Body::Text(text.into())
    }

    pub fn bytes<B: Into<Bytes>>(bytes: B) -> Self {
        Body::Bytes(bytes.into())
    }

    pub fn object<T: fmt::Display + Send + Sync + 'static>(object: T) -> Self {
        Body::Object(Arc::new(object))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Body::Empty => true,
            Body::Text(text) => text.is_empty(),
            Body::Bytes(bytes) => bytes.is_empty(),
            Body::Object(_) => false,
        }
    }

    /// The wire bytes of this body under `charset`.
    ///
    /// Characters `charset` can't represent are handed to `handler` as an
    /// [`EncodeError::InternalEncodingFailure`], the returned bytes then carry
    /// the encoder's replacement output.
    pub fn to_bytes(&self, charset: &'static Encoding, handler: &dyn InternalErrorHandler) -> Bytes {
        match self {
            Body::Empty => Bytes::new(),
            Body::Bytes(bytes) => bytes.clone(),
            Body::Text(text) => encode_text(text, charset, handler),
            Body::Object(object) => encode_text(&object.to_string(), charset, handler),
        }
    }

    /// The body as text, raw bytes are decoded with `charset`.
    pub fn to_text(&self, charset: &'static Encoding) -> Cow<'_, str> {
        match self {
            Body::Empty => Cow::Borrowed(""),
            Body::Text(text) => Cow::Borrowed(text),
            Body::Bytes(bytes) => Cow::Owned(charset.decode_without_bom_handling(bytes).0.into_owned()),
            Body::Object(object) => Cow::Owned(object.to_string()),
        }
    }
}

fn encode_text(text: &str, charset: &'static Encoding, handler: &dyn InternalErrorHandler) -> Bytes {
    let (encoded, used, had_errors) = charset.encode(text);
    if had_errors {
        handler.handle(&EncodeError::internal_encoding_failure(used.name(), "unmappable characters replaced"));
    }
    Bytes::copy_from_slice(&encoded)
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Body::Bytes(bytes) => f.debug_tuple("Bytes").field(bytes).finish(),
            Body::Object(object) => f.debug_tuple("Object").field(&object.to_string()).finish(),
        }
    }
}

impl PartialEq for Body {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Body::Empty, Body::Empty) => true,
            (Body::Text(a), Body::Text(b)) => a == b,
            (Body::Bytes(a), Body::Bytes(b)) => a == b,
            (Body::Object(a), Body::Object(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Text(text)
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::Text(text.to_owned())
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use encoding_rs::{UTF_8, WINDOWS_1252};
    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug, Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl InternalErrorHandler for Recorder {
        fn handle(&self, error: &EncodeError) {
            self.0.lock().push(error.to_string());
        }
    }

    struct Sdp;

    impl fmt::Display for Sdp {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("v=0\r\n")
        }
    }

    #[test]
    fn text_goes_through_charset() {
        let recorder = Recorder::default();
        let body = Body::text("café");

        assert_eq!(body.to_bytes(UTF_8, &recorder).len(), 5);
        assert_eq!(&body.to_bytes(WINDOWS_1252, &recorder)[..], b"caf\xe9");
        assert!(recorder.0.lock().is_empty());
    }

    #[test]
    fn unmappable_text_is_reported() {
        let recorder = Recorder::default();
        let bytes = Body::text("snow ☃").to_bytes(WINDOWS_1252, &recorder);

        assert!(bytes.starts_with(b"snow "));
        assert_eq!(recorder.0.lock().len(), 1);
    }

    #[test]
    fn bytes_and_objects() {
        let recorder = Recorder::default();
        assert_eq!(&Body::bytes(&b"\x00\x01"[..]).to_bytes(UTF_8, &recorder)[..], b"\x00\x01");
        assert_eq!(&Body::object(Sdp).to_bytes(UTF_8, &recorder)[..], b"v=0\r\n");
        assert_eq!(Body::bytes(&b"caf\xe9"[..]).to_text(WINDOWS_1252), "café");
        assert!(Body::Empty.is_empty());
        assert!(!Body::object(Sdp).is_empty());
    }
}
