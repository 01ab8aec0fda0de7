//! A selective SIP message parser and retransmission timers.
//!
//! The parser turns a raw buffer into a [`SipMessage`](protocol::SipMessage)
//! but only parses the headers the application asks for up front. Every other
//! header is kept as raw text, written back byte for byte on encode, and
//! parsed the first time somebody reads it.
//!
//! # Example
//!
//! ```
//! use micro_sip::config::StackConfig;
//! use micro_sip::stack::SipStack;
//!
//! let stack = SipStack::new(StackConfig { headers_to_parse: Some("via".into()), ..StackConfig::default() });
//! let buf = b"REGISTER sip:a@b SIP/2.0\r\nVia: SIP/2.0/UDP 1.2.3.4\r\nCSeq: 1 REGISTER\r\nContent-Length: 0\r\n\r\n";
//!
//! let message = stack.parse(buf, None).unwrap().unwrap();
//! assert_eq!(message.raw_header("cseq").as_deref(), Some("CSeq: 1 REGISTER\r\n"));
//!
//! // reading a deferred header parses it once
//! let cseq = message.header("cseq").unwrap().unwrap();
//! assert_eq!(cseq.as_cseq().unwrap().seq, 1);
//!
//! assert_eq!(message.encode_bytes().len(), buf.len());
//! ```
//!
//! # Modules
//!
//! - [`protocol`]: messages, start lines, headers, bodies and errors
//! - [`codec`]: the parser, the header policy and stream codecs
//! - [`timer`]: the [`SipTimer`](timer::SipTimer) trait and its three backends
//! - [`config`] and [`stack`]: configuration and the per-instance entry point

pub mod codec;
pub mod config;
pub mod context;
pub mod protocol;
pub mod stack;
pub mod timer;

mod utils;
pub(crate) use utils::ensure;
