use std::io;
use thiserror::Error;

use crate::config::ConfigError;
use crate::timer::TimerError;

#[derive(Debug, Error)]
pub enum SipError {
    #[error("parse error: {source}")]
    ParseError {
        #[from]
        source: ParseError,
    },

    #[error("encode error: {source}")]
    EncodeError {
        #[from]
        source: EncodeError,
    },

    #[error("timer error: {source}")]
    TimerError {
        #[from]
        source: TimerError,
    },

    #[error("config error: {source}")]
    ConfigError {
        #[from]
        source: ConfigError,
    },
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed first line `{line}`: {reason}")]
    MalformedFirstLine { line: String, reason: String },

    #[error("bad header continuation")]
    BadHeaderContinuation,

    #[error("the header name or value is missing: `{line}`")]
    MissingHeaderName { line: String },

    #[error("can't parse header `{name}`: {reason}")]
    HeaderParseFailure { name: String, reason: String },

    #[error("body length mismatch, content-length: {expected}, actual: {actual}")]
    BodyLengthMismatch { expected: usize, actual: usize },

    #[error("following header couldn't be parsed for header name `{name}`: {source}")]
    InvalidPromotedHeader {
        name: String,
        #[source]
        source: Box<ParseError>,
    },

    #[error("header size too large, current: {current_size} exceed the limit {max_size}")]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    pub fn malformed_first_line<L: ToString, S: ToString>(line: L, reason: S) -> Self {
        Self::MalformedFirstLine { line: line.to_string(), reason: reason.to_string() }
    }

    pub fn missing_header_name<S: ToString>(line: S) -> Self {
        Self::MissingHeaderName { line: line.to_string() }
    }

    pub fn header_parse_failure<N: ToString, S: ToString>(name: N, reason: S) -> Self {
        Self::HeaderParseFailure { name: name.to_string(), reason: reason.to_string() }
    }

    pub fn body_length_mismatch(expected: usize, actual: usize) -> Self {
        Self::BodyLengthMismatch { expected, actual }
    }

    pub fn invalid_promoted_header<N: ToString>(name: N, source: ParseError) -> Self {
        Self::InvalidPromotedHeader { name: name.to_string(), source: Box::new(source) }
    }

    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::TooLargeHeader { current_size, max_size }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("internal encoding failure, charset `{charset}`: {reason}")]
    InternalEncodingFailure { charset: String, reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl EncodeError {
    pub fn internal_encoding_failure<C: ToString, S: ToString>(charset: C, reason: S) -> Self {
        Self::InternalEncodingFailure { charset: charset.to_string(), reason: reason.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}
