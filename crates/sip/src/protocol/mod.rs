//! SIP protocol types: start lines, headers, bodies and the message itself.
//!
//! - start lines: [`RequestLine`], [`StatusLine`] and the [`StartLine`] wrapping them
//! - headers: the structured [`Header`] model and name normalization
//! - [`LazyHeaderStore`]: raw text of headers not parsed yet
//! - [`SipMessage`]: one message, request or response, with promote-on-read
//!   header access and encoding
//! - errors: [`ParseError`], [`EncodeError`] and the top level [`SipError`]

mod body;
mod error;
mod first_line;
mod header;
mod lazy_store;
mod message;

pub use body::Body;
pub use error::{EncodeError, ParseError, SipError};
pub use first_line::{Method, RequestLine, SIP_VERSION, StartLine, StatusLine};
pub use header::{CSeq, CallId, ContentLength, ContentType, ExtensionHeader, Header, MaxForwards, Via, normalize_name};
pub use lazy_store::LazyHeaderStore;
pub use message::SipMessage;

pub(crate) use first_line::is_token;
