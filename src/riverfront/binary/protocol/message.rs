use bytes::{Buf, Bytes};

use crate::riverfront::binary::protocol::Tag;
use crate::riverfront::Result;
use std::convert::TryInto;

/// One complete binary-wire message: 1-byte tag, 4-byte BE length exclusive
/// of the tag and of itself (covers only the payload), payload. Unlike PG
/// there is no untagged first message on this wire; every message (including
/// the handshake) carries a tag.
#[derive(Clone)]
pub struct Message {
    data: Bytes,
}

impl Message {
    pub fn new(buf: Bytes) -> Self {
        Message { data: buf }
    }

    pub fn tag(&self) -> Tag {
        Tag::new_unchecked(*self.data.get(0).expect("empty Message"))
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn body_start(&self) -> u32 {
        5
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data.chunk()
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    /// Parses the header (tag + length) of the next message in `bytes`
    /// without consuming it. Returns `None` if not enough bytes are
    /// buffered yet.
    pub fn parse_header(bytes: &[u8]) -> Result<Option<(Tag, u32)>> {
        if bytes.len() < 5 {
            return Ok(None);
        }
        let tag = Tag::new_unchecked(bytes[0]);
        let len = u32::from_be_bytes(bytes[1..5].try_into().unwrap());
        Ok(Some((tag, len)))
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            f.write_str("Message{empty}")
        } else {
            write!(f, "Message{{tag: {:?}, len: {}}}", self.tag(), self.len())
        }
    }
}
