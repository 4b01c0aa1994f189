use bytes::{BufMut, BytesMut};

use crate::riverfront::binary::protocol::{Message, Tag};

/// Builder for one or more binary-wire messages packed into a single buffer,
/// mirroring `pg::protocol::MessageBuilder`.
pub struct MessageBuilder {
    data: BytesMut,
    start: usize,
}

impl MessageBuilder {
    pub fn new(tag: Tag) -> Self {
        let mut b = MessageBuilder { data: BytesMut::with_capacity(256), start: 0 };
        b.add_new(tag);
        b
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn add_new(&mut self, tag: Tag) {
        let len = self.len();
        if len != 0 {
            self.complete_message();
            self.start = len;
        }
        self.data.put_u8(tag.as_u8());
        self.data.put_u32(0);
    }

    fn complete_message(&mut self) {
        // Exclusive length: covers only the payload, not the tag byte or
        // the 4-byte length field itself.
        let frame_len = (self.len() - self.start - 5) as u32;
        self.data[self.start + 1..self.start + 5].copy_from_slice(&frame_len.to_be_bytes());
    }

    pub fn finish(&mut self) -> Message {
        self.complete_message();
        self.start = 0;
        Message::new(std::mem::take(&mut self.data).freeze())
    }

    pub fn write_byte(&mut self, b: u8) {
        self.data.put_u8(b);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.data.put_u16(v);
    }

    pub fn write_i32(&mut self, v: i32) {
        self.data.put_i32(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.data.put_u32(v);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.data.put_u64(v);
    }

    pub fn write_uuid(&mut self, u: &uuid::Uuid) {
        self.data.extend_from_slice(u.as_bytes());
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_u32(s.len() as u32);
        self.data.extend_from_slice(s.as_bytes());
    }

    pub fn write_len_prefixed(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.data.extend_from_slice(bytes);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }
}
