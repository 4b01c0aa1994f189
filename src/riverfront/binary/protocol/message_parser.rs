use bytes::{Buf, BytesMut};

use crate::riverfront::binary::protocol::Message;
use crate::riverfront::config::conf;
use crate::riverfront::Result;

/// Accumulates bytes read off the socket and splits off complete binary-wire
/// messages as they arrive. Unlike `pg::protocol::MessageParser` there is no
/// untagged-first-message mode: every message on this wire carries a tag,
/// including the handshake.
pub struct MessageParser {
    data: BytesMut,
}

impl MessageParser {
    pub fn new() -> Self {
        Self { data: BytesMut::with_capacity(conf().recv_buffer_size as usize) }
    }

    pub fn next(&mut self) -> Option<Result<Message>> {
        match Message::parse_header(self.data.chunk()) {
            Err(e) => Some(Err(e)),
            Ok(None) => None,
            Ok(Some((_tag, len))) => {
                // Binary wire length is exclusive: it covers only the
                // payload, not the tag byte or the length field itself.
                let total = len as usize + 5;
                if total <= self.data.len() {
                    Some(Ok(Message::new(self.data.split_to(total).freeze())))
                } else {
                    self.data.reserve(total - self.data.len());
                    None
                }
            }
        }
    }

    pub fn has_pending_bytes(&self) -> bool {
        !self.data.is_empty()
    }

    pub fn bytes_mut(&mut self) -> &mut BytesMut {
        &mut self.data
    }
}
