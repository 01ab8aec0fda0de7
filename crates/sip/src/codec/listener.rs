//! Hooks for failures found while ingesting a message.

use crate::protocol::{ParseError, SipMessage};

/// Where in the message a failure happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorContext {
    /// The request-line or status-line
    FirstLine,
    /// A logical header line, `name` is `None` when no name could be lexed
    Header { name: Option<String> },
}

/// Receives parse failures during ingestion.
///
/// Returning `Ok(())` tells the parser to carry on with the next line,
/// returning an error aborts the parse with that error. `message` is the
/// partially built message, a listener may repair it, for example by keeping
/// the offending line with [`SipMessage::add_unrecognized`].
pub trait ParseExceptionListener: Send + Sync {
    fn handle_exception(
        &self,
        error: ParseError,
        message: &mut SipMessage,
        context: ErrorContext,
        raw_text: &str,
        raw_buffer: &[u8],
    ) -> Result<(), ParseError>;
}

/// Keeps unparseable headers as unrecognized lines so they are written back
/// unchanged, and rejects a bad first line.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughListener;

impl ParseExceptionListener for PassThroughListener {
    fn handle_exception(
        &self,
        error: ParseError,
        message: &mut SipMessage,
        context: ErrorContext,
        raw_text: &str,
        _raw_buffer: &[u8],
    ) -> Result<(), ParseError> {
        match context {
            ErrorContext::FirstLine => Err(error),
            ErrorContext::Header { .. } => {
                message.add_unrecognized(raw_text);
                Ok(())
            }
        }
    }
}
