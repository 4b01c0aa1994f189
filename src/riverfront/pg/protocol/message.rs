use bytes::{Bytes, Buf};

use crate::riverfront::pg::protocol::Tag;
use crate::riverfront::pg::protocol::message_parser::Header;

/// A single complete PostgreSQL wire protocol message: an optional 1-byte tag,
/// a 4-byte BE length (inclusive of itself), and a payload. Untagged messages
/// (Startup, SSLRequest, CancelRequest, GSSENCRequest) have no tag byte.
#[derive(Clone)]
pub struct Message {
    data: Bytes,
}

impl Message {
    pub fn new(buf: Bytes) -> Self {
        Message { data: buf }
    }

    /// tag returns the message Tag, or Tag::UNTAGGED if this is a pre-auth startup-style message.
    /// Panics if is_empty().
    pub fn tag(&self) -> Tag {
        Tag::new_unchecked(*self.data.get(0).expect("empty Message"))
    }

    /// is_empty returns true if Message was initialized with an empty buffer
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// len returns the length of the Message including optional tag byte and length frame
    pub fn len(&self) -> u32 {
        self.data.len() as u32
    }

    /// header returns the message Header or panics if self.is_empty()
    pub fn header(&self) -> Header {
        let tagged = self.tag() != Tag::UNTAGGED;
        Header::parse(self.data.chunk(), tagged)
            .expect("invalid Message")
            .expect("empty Message")
    }

    /// Offset of the first payload byte, after the tag byte (if any) and 4-byte length.
    pub fn body_start(&self) -> u32 {
        if self.tag() == Tag::UNTAGGED { 4 } else { 5 }
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data.chunk()
    }

    /// into_bytes consumes Message and returns the underlying Bytes buffer
    pub fn into_bytes(self) -> Bytes {
        self.data
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

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}
