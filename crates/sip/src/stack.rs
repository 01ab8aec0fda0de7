//! The per-instance entry point tying configuration to parsers and timers.

use std::fmt;
use std::sync::Arc as StdArc;

use once_cell::sync::OnceCell;
use tracing::debug;
use triomphe::Arc;

use crate::codec::header::HeaderParser;
use crate::codec::{MessageDecoder, MessageEncoder, MessageParser, ParseExceptionListener};
use crate::config::StackConfig;
use crate::context::{InternalErrorHandler, MessageContext};
use crate::protocol::{ParseError, SipMessage};
use crate::timer::{SipTimer, TimerError, new_timer};

/// Owns a [`StackConfig`] and everything built from it.
///
/// The [`MessageContext`], and with it the eager header policy, is built on
/// first use and shared by every message this stack parses. Two stacks never
/// share a policy. The timer is created and started on first use too.
pub struct SipStack {
    config: StackConfig,
    header_parser: Option<StdArc<dyn HeaderParser>>,
    internal_error_handler: Option<StdArc<dyn InternalErrorHandler>>,
    context: OnceCell<Arc<MessageContext>>,
    timer: OnceCell<Box<dyn SipTimer>>,
}

impl SipStack {
    pub fn new(config: StackConfig) -> Self {
        Self { config, header_parser: None, internal_error_handler: None, context: OnceCell::new(), timer: OnceCell::new() }
    }

    /// Replaces the structured header parser, must be called before the
    /// context is first used.
    #[must_use]
    pub fn with_header_parser(mut self, parser: StdArc<dyn HeaderParser>) -> Self {
        self.header_parser = Some(parser);
        self
    }

    #[must_use]
    pub fn with_internal_error_handler(mut self, handler: StdArc<dyn InternalErrorHandler>) -> Self {
        self.internal_error_handler = Some(handler);
        self
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<MessageContext> {
        self.context.get_or_init(|| {
            let policy = self.config.header_policy();
            debug!(eager = ?policy, "build sip message context");

            let mut context = MessageContext::new(policy).with_report_dropped_headers(self.config.report_dropped_headers);
            if let Some(parser) = &self.header_parser {
                context = context.with_parser(StdArc::clone(parser));
            }
            if let Some(handler) = &self.internal_error_handler {
                context = context.with_internal_error_handler(StdArc::clone(handler));
            }
            Arc::new(context)
        })
    }

    pub fn parser(&self) -> MessageParser {
        MessageParser::new(Arc::clone(self.context()))
    }

    /// Parses `buf` with the configured `read_body` and `strict` flags.
    pub fn parse(&self, buf: &[u8], listener: Option<&dyn ParseExceptionListener>) -> Result<Option<SipMessage>, ParseError> {
        self.parser().parse(buf, self.config.read_body, self.config.strict, listener)
    }

    pub fn decoder(&self) -> MessageDecoder {
        MessageDecoder::new(self.parser(), self.config.strict)
    }

    pub fn encoder(&self) -> MessageEncoder {
        MessageEncoder::new()
    }

    /// The configured timer, started on first access.
    pub fn timer(&self) -> Result<&dyn SipTimer, TimerError> {
        let timer = self.timer.get_or_try_init(|| {
            let timer = new_timer(self.config.timer.kind);
            timer.start(&self.config.timer)?;
            Ok::<_, TimerError>(timer)
        })?;
        Ok(timer.as_ref())
    }

    /// Stops the timer if one was started.
    pub fn shutdown(&self) {
        if let Some(timer) = self.timer.get() {
            timer.stop();
        }
    }
}

impl fmt::Debug for SipStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SipStack")
            .field("config", &self.config)
            .field("context", &self.context.get())
            .field("timer", &self.timer.get())
            .finish_non_exhaustive()
    }
}
