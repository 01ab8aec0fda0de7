//! Header level building blocks used by the message parser.

mod header_parser;
mod policy;

pub use header_parser::{DefaultHeaderParser, HeaderParser, header_name};
pub use policy::{DEFAULT_EAGER_HEADERS, HeaderPolicy};

#[cfg(test)]
pub use header_parser::MockHeaderParser;
