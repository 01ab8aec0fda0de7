//! Turning bytes into [`SipMessage`](crate::protocol::SipMessage)s and back.
//!
//! - [`MessageParser`]: one buffer, one message, with selective header parsing
//! - [`MessageDecoder`] / [`MessageEncoder`]: `tokio_util` codecs framing
//!   messages on stream transports
//! - [`header`]: the eager header [`HeaderPolicy`](header::HeaderPolicy) and
//!   the structured [`HeaderParser`](header::HeaderParser)
//! - [`ParseExceptionListener`]: hook for failures during ingestion

pub mod header;
mod listener;
mod message_decoder;
mod message_encoder;
mod message_parser;
mod tokenizer;

pub use listener::{ErrorContext, ParseExceptionListener, PassThroughListener};
pub use message_decoder::{MAX_HEADER_BYTES, MessageDecoder};
pub use message_encoder::MessageEncoder;
pub use message_parser::MessageParser;
pub use tokenizer::{MessageLines, tokenize};
