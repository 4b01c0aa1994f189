use crate::riverfront::binary::protocol::Message;

/// Sequential, checked reader over one message's payload bytes. Mirrors
/// `pg::protocol::MessageReader`: reads past the end set a sticky error flag
/// rather than panicking, so a whole message can be decoded and checked once
/// at the end.
pub struct MessageReader<'a> {
    msg: &'a Message,
    pos: u32,
    read_past_end: bool,
}

impl<'a> MessageReader<'a> {
    pub fn new(msg: &'a Message) -> Self {
        Self::new_at(msg, msg.body_start())
    }

    pub fn new_at(msg: &'a Message, pos: u32) -> Self {
        MessageReader { msg, pos, read_past_end: false }
    }

    pub fn has_error(&self) -> bool {
        self.read_past_end
    }

    fn remaining(&self) -> &[u8] {
        &self.msg.as_slice()[self.pos as usize..]
    }

    fn take(&mut self, n: usize) -> &[u8] {
        let slice = self.msg.as_slice();
        if self.pos as usize + n > slice.len() {
            self.read_past_end = true;
            self.pos = slice.len() as u32;
            return &[];
        }
        let out = &slice[self.pos as usize..self.pos as usize + n];
        self.pos += n as u32;
        out
    }

    pub fn read_byte(&mut self) -> u8 {
        let b = self.take(1);
        if b.is_empty() { 0 } else { b[0] }
    }

    pub fn read_i16(&mut self) -> i16 {
        let b = self.take(2);
        if b.len() < 2 { 0 } else { i16::from_be_bytes([b[0], b[1]]) }
    }

    pub fn read_u16(&mut self) -> u16 {
        self.read_i16() as u16
    }

    pub fn read_i32(&mut self) -> i32 {
        let b = self.take(4);
        if b.len() < 4 { 0 } else { i32::from_be_bytes([b[0], b[1], b[2], b[3]]) }
    }

    pub fn read_u32(&mut self) -> u32 {
        self.read_i32() as u32
    }

    pub fn read_u64(&mut self) -> u64 {
        let b = self.take(8);
        if b.len() < 8 { 0 } else { u64::from_be_bytes(b.try_into().unwrap()) }
    }

    pub fn read_uuid(&mut self) -> uuid::Uuid {
        let b = self.take(16);
        if b.len() < 16 {
            uuid::Uuid::nil()
        } else {
            uuid::Uuid::from_slice(b).unwrap_or_else(|_| uuid::Uuid::nil())
        }
    }

    /// Length-prefixed (u32 BE) UTF-8 string.
    pub fn read_str(&mut self) -> String {
        let len = self.read_u32() as usize;
        let b = self.take(len);
        String::from_utf8_lossy(b).into_owned()
    }

    pub fn read_bytes(&mut self, len: usize) -> &[u8] {
        self.take(len)
    }

    /// Length-prefixed (u32 BE) byte block.
    pub fn read_len_prefixed_bytes(&mut self) -> &[u8] {
        let len = self.read_u32() as usize;
        self.take(len)
    }

    pub fn read_to_end(&mut self) -> &[u8] {
        let rest = self.remaining();
        self.pos = self.msg.as_slice().len() as u32;
        rest
    }

    pub fn tell(&self) -> u32 {
        self.pos
    }
}
