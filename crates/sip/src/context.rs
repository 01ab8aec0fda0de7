//! Per-stack collaborators shared by every message the stack parses.

use std::fmt;
use std::sync::Arc;

use tracing::error;

use crate::codec::header::{DefaultHeaderParser, HeaderParser, HeaderPolicy};
use crate::protocol::EncodeError;

/// Receives failures that happen where nobody can propagate them, such as a
/// body that doesn't fit the message charset during encode.
pub trait InternalErrorHandler: Send + Sync {
    fn handle(&self, error: &EncodeError);
}

/// Logs every internal error at `error` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogInternalErrorHandler;

impl InternalErrorHandler for LogInternalErrorHandler {
    fn handle(&self, err: &EncodeError) {
        error!(cause = %err, "internal error while encoding sip message");
    }
}

/// Everything a message needs from the stack that created it: the eager
/// header policy, the structured header parser used for promotion and the
/// internal error sink.
///
/// Immutable once built, messages hold it behind a [`triomphe::Arc`].
pub struct MessageContext {
    policy: HeaderPolicy,
    parser: Arc<dyn HeaderParser>,
    internal_error_handler: Arc<dyn InternalErrorHandler>,
    report_dropped_headers: bool,
}

impl MessageContext {
    pub fn new(policy: HeaderPolicy) -> Self {
        Self {
            policy,
            parser: Arc::new(DefaultHeaderParser),
            internal_error_handler: Arc::new(LogInternalErrorHandler),
            report_dropped_headers: false,
        }
    }

    #[must_use]
    pub fn with_parser(mut self, parser: Arc<dyn HeaderParser>) -> Self {
        self.parser = parser;
        self
    }

    #[must_use]
    pub fn with_internal_error_handler(mut self, handler: Arc<dyn InternalErrorHandler>) -> Self {
        self.internal_error_handler = handler;
        self
    }

    #[must_use]
    pub fn with_report_dropped_headers(mut self, report: bool) -> Self {
        self.report_dropped_headers = report;
        self
    }

    pub fn policy(&self) -> &HeaderPolicy {
        &self.policy
    }

    pub fn parser(&self) -> &dyn HeaderParser {
        self.parser.as_ref()
    }

    pub fn internal_error_handler(&self) -> &dyn InternalErrorHandler {
        self.internal_error_handler.as_ref()
    }

    pub fn report_dropped_headers(&self) -> bool {
        self.report_dropped_headers
    }
}

impl Default for MessageContext {
    fn default() -> Self {
        Self::new(HeaderPolicy::default())
    }
}

impl fmt::Debug for MessageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageContext")
            .field("policy", &self.policy)
            .field("report_dropped_headers", &self.report_dropped_headers)
            .finish_non_exhaustive()
    }
}
