use bytes::{BytesMut, Buf};
use std::num::NonZeroU32;
use std::convert::TryInto;

use crate::riverfront::{Error, Result};
use crate::riverfront::pg::protocol::Message;
use crate::riverfront::config::conf;
use crate::riverfront::pg::protocol::Tag;

pub const MIN_MESSAGE_LEN: u32 = 4;

#[derive(Copy, Clone)]
pub struct Header {
    pub tag: Tag,
    pub length: NonZeroU32,
}

impl Header {
    /// Parses the header of the next message in `bytes`. `tagged` is false only for the very
    /// first message read from a freshly-accepted PG-wire socket (Startup/SSLRequest/
    /// CancelRequest/GSSENCRequest), which carries no leading tag byte.
    pub fn parse(bytes: &[u8], tagged: bool) -> Result<Option<Self>> {
        let header_len = if tagged { 5 } else { 4 };
        if bytes.len() < header_len {
            return Ok(None);
        }
        let (tag, len_bytes) = if tagged {
            (Tag::new_unchecked(bytes[0]), &bytes[1..5])
        } else {
            (Tag::UNTAGGED, &bytes[0..4])
        };
        let len = u32::from_be_bytes(len_bytes.try_into().unwrap());
        Ok(Some(Header {
            tag,
            length: NonZeroU32::new(len).ok_or_else(|| Error::protocol_violation("length of message frame cannot be 0"))?,
        }))
    }

    /// Total length of the framed message, including the tag byte if tagged.
    pub fn len(&self) -> u32 {
        if self.tag == Tag::UNTAGGED {
            self.length.get()
        } else {
            self.length.get() + 1
        }
    }
}

/// Accumulates bytes read off the socket and splits off complete messages as they arrive.
pub struct MessageParser {
    data: BytesMut,
    tagged: bool,
}

impl MessageParser {
    pub fn new() -> Self {
        Self { data: BytesMut::with_capacity(conf().recv_buffer_size as usize), tagged: true }
    }

    /// A parser for a freshly-accepted socket, whose first message has no tag byte.
    pub fn new_untagged_first() -> Self {
        Self { data: BytesMut::with_capacity(conf().recv_buffer_size as usize), tagged: false }
    }

    pub fn next(&mut self) -> Option<Result<Message>> {
        match Header::parse(self.data.chunk(), self.tagged) {
            Err(e) => Some(Err(e)),
            Ok(None) => None,
            Ok(Some(hdr)) => {
                let msg_len = hdr.len();
                if msg_len <= self.data.len() as u32 {
                    let msg = Message::new(self.data.split_to(msg_len as usize).freeze());
                    self.tagged = true;
                    Some(Ok(msg))
                } else {
                    self.data.reserve(msg_len as usize - self.data.len());
                    None
                }
            }
        }
    }

    pub fn has_pending_bytes(&self) -> bool {
        !self.data.is_empty()
    }

    /// False only until the first message (Startup/SSLRequest/CancelRequest/
    /// GSSENCRequest) has been split off; true for every message after.
    pub fn tagged(&self) -> bool {
        self.tagged
    }

    /// Resets to untagged-first state, for re-reading a startup-phase message
    /// on the same socket (e.g. after a rejected SSLRequest/GSSENCRequest).
    pub fn reset_untagged(&mut self) {
        self.tagged = false;
    }

    pub fn bytes_mut(&mut self) -> &mut BytesMut {
        &mut self.data
    }
}
