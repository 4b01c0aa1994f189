use bytes::{BytesMut, BufMut};

use crate::riverfront::pg::protocol::{Tag, Message, ServerParams};
use crate::riverfront::pg::protocol::message_parser::MIN_MESSAGE_LEN;

/// A builder for constructing one or more PostgreSQL wire protocol messages in a single buffer.
/// `add_new` starts a fresh message in the same buffer (completing the previous one), so a single
/// `finish()` can hand the write path several replies (e.g. RowDescription + DataRow + CommandComplete)
/// as one contiguous write.
pub struct MessageBuilder {
    data: BytesMut,
    start: usize,
}

impl MessageBuilder {
    pub fn new(tag: Tag) -> Self {
        let mut builder = MessageBuilder { data: BytesMut::with_capacity(256), start: 0 };
        builder.add_new(tag);
        builder
    }

    pub fn reserve(&mut self, additional_size: usize) {
        self.data.reserve(additional_size)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn finish(&mut self) -> Message {
        self.complete_message();
        self.start = 0;
        Message::new(std::mem::take(&mut self.data).freeze())
    }

    pub fn add_new(&mut self, tag: Tag) {
        let len = self.len();
        if len != 0 {
            self.complete_message();
            self.start = len;
        }
        if tag != Tag::UNTAGGED {
            self.data.put_u8(tag.as_u8());
        }
        self.data.put_i32(0);
    }

    fn complete_message(&mut self) {
        let mut len = self.len();
        if len - self.start < MIN_MESSAGE_LEN as usize {
            panic!("Message too short");
        }
        let mut pos = self.start + 1;
        if self.data[self.start] == Tag::UNTAGGED.as_u8() {
            pos = self.start;
        } else {
            len -= 1;
        }
        let frame_len = (len - self.start) as i32;
        self.data[pos..pos + 4].copy_from_slice(&frame_len.to_be_bytes());
    }

    pub fn write_byte(&mut self, b: u8) {
        self.data.put_u8(b);
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
        self.write_byte(0);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn write_i16(&mut self, i: i16) {
        self.data.put_i16(i);
    }

    pub fn write_i32(&mut self, i: i32) {
        self.data.put_i32(i);
    }

    pub fn write_i64(&mut self, i: i64) {
        self.data.put_i64(i);
    }

    /// Writes a 32-bit BE length followed by the bytes, or -1 for None (SQL NULL),
    /// matching the Bind value / DataRow column wire encoding.
    pub fn write_len_prefixed(&mut self, bytes: Option<&[u8]>) {
        match bytes {
            Some(b) => {
                self.write_i32(b.len() as i32);
                self.write_bytes(b);
            }
            None => self.write_i32(-1),
        }
    }

    pub fn write_params(&mut self, params: &ServerParams) {
        for (k, v) in params.iter() {
            self.write_str(k);
            self.write_str(v);
        }
    }
}
