use bytes::BytesMut;
use tokio_util::codec::Encoder;
use tracing::trace;

use crate::protocol::{EncodeError, SipMessage};

/// Writes whole messages into a stream buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageEncoder;

impl MessageEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl Encoder<SipMessage> for MessageEncoder {
    type Error = EncodeError;

    fn encode(&mut self, item: SipMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        <Self as Encoder<&SipMessage>>::encode(self, &item, dst)
    }
}

impl Encoder<&SipMessage> for MessageEncoder {
    type Error = EncodeError;

    fn encode(&mut self, item: &SipMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = item.encode_bytes();
        trace!(len = bytes.len(), "encode sip message");
        dst.extend_from_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::SinkExt;
    use tokio_util::codec::FramedWrite;
    use triomphe::Arc;

    use super::*;
    use crate::context::MessageContext;
    use crate::protocol::StatusLine;

    #[tokio::test]
    async fn framed_write() {
        let message = SipMessage::response(StatusLine::new(486, "Busy Here"), Arc::new(MessageContext::default()));
        let keep_alive = SipMessage::keep_alive(Arc::new(MessageContext::default()));

        let mut out = Vec::new();
        {
            let mut framed = FramedWrite::new(&mut out, MessageEncoder::new());
            framed.send(message).await.unwrap();
            framed.send(keep_alive).await.unwrap();
        }

        assert_eq!(out, b"SIP/2.0 486 Busy Here\r\nContent-Length: 0\r\n\r\n\r\n\r\n");
    }
}
