use std::convert::TryInto;

use crate::riverfront::pg::protocol::Message;
use crate::riverfront::{Error, Result};

/// A reader for reading the typed content of a Postgres wire protocol message sequentially.
pub struct MessageReader<'a> {
    msg: &'a Message,
    pos: u32,
    read_past_end: bool,
}

impl<'a> MessageReader<'a> {
    /// Create a new Reader borrowing from the passed Message, positioned after the header.
    pub fn new(msg: &'a Message) -> Self {
        MessageReader { msg, pos: msg.body_start(), read_past_end: false }
    }

    /// Create a new Reader from the passed Message at the given offset.
    pub fn new_at(msg: &'a Message, pos: u32) -> Self {
        assert!(pos <= msg.len());
        MessageReader { msg, pos, read_past_end: false }
    }

    pub fn len(&self) -> u32 {
        self.msg.len()
    }

    pub fn error(&self) -> Result<()> {
        if self.has_error() {
            Err(Error::protocol_violation(format!("attempted to read past end of {:?}", self.msg)))
        } else {
            Ok(())
        }
    }

    pub fn has_error(&self) -> bool {
        self.read_past_end
    }

    pub fn peek(&self) -> Option<u8> {
        self.msg.as_slice().get(self.pos as usize).cloned()
    }

    pub fn read_byte(&mut self) -> u8 {
        let pos = self.pos;
        let new_pos = pos + 1;
        if new_pos > self.msg.len() {
            self.read_past_end = true;
            return 0;
        }
        let b = self.msg.as_slice()[pos as usize];
        self.pos = new_pos;
        b
    }

    pub fn read_i16(&mut self) -> i16 {
        let pos = self.pos;
        let new_pos = pos + 2;
        if new_pos > self.msg.len() {
            self.read_past_end = true;
            return 0;
        }
        let bytes = &self.msg.as_slice()[pos as usize..new_pos as usize];
        self.pos = new_pos;
        i16::from_be_bytes(bytes.try_into().unwrap())
    }

    pub fn read_i32(&mut self) -> i32 {
        let pos = self.pos;
        let new_pos = pos + 4;
        if new_pos > self.msg.len() {
            self.read_past_end = true;
            return 0;
        }
        let bytes = &self.msg.as_slice()[pos as usize..new_pos as usize];
        self.pos = new_pos;
        i32::from_be_bytes(bytes.try_into().unwrap())
    }

    pub fn read_i64(&mut self) -> i64 {
        let pos = self.pos;
        let new_pos = pos + 8;
        if new_pos > self.msg.len() {
            self.read_past_end = true;
            return 0;
        }
        let bytes = &self.msg.as_slice()[pos as usize..new_pos as usize];
        self.pos = new_pos;
        i64::from_be_bytes(bytes.try_into().unwrap())
    }

    /// Reads a 32-bit BE length followed by that many bytes of payload, as used by
    /// Bind parameter values. A length of -1 denotes SQL NULL and yields None.
    pub fn read_len_prefixed_bytes(&mut self) -> Result<Option<&'a [u8]>> {
        let len = self.read_i32();
        self.error()?;
        if len < 0 {
            return Ok(None);
        }
        Ok(Some(self.read_bytes(len as u32)?))
    }

    /// Reads and returns a null-terminated utf-8 string
    pub fn read_str(&mut self) -> Result<&'a str> {
        let bytes = self.read_null_terminated_bytes()?;
        std::str::from_utf8(bytes).map_err(Error::from)
    }

    /// Reads and returns a null-terminated slice of bytes
    pub fn read_null_terminated_bytes(&mut self) -> Result<&'a [u8]> {
        let pos = self.pos;
        let bytes = &self.msg.as_slice()[pos as usize..];
        if let Some(i) = memchr::memchr(0, bytes) {
            self.pos = pos + i as u32 + 1;
            Ok(&bytes[..i])
        } else {
            self.read_past_end = true;
            Err(self.error().unwrap_err())
        }
    }

    /// Reads and returns a slice of bytes of the specified length
    pub fn read_bytes(&mut self, len: u32) -> Result<&'a [u8]> {
        let pos = self.pos;
        let new_pos = pos + len;
        self.seek(new_pos)?;
        Ok(&self.msg.as_slice()[pos as usize..new_pos as usize])
    }

    /// Reads and returns the remainder of the message as a &[u8]
    pub fn read_to_end(&mut self) -> &'a [u8] {
        let end = self.len();
        let pos = self.pos;
        self.pos = end;
        &self.msg.as_slice()[pos as usize..end as usize]
    }

    pub fn seek(&mut self, pos: u32) -> Result<u32> {
        if pos > self.len() {
            self.read_past_end = true;
            return Err(self.error().unwrap_err());
        }
        Ok(std::mem::replace(&mut self.pos, pos))
    }

    pub fn tell(&self) -> u32 {
        self.pos
    }

    pub fn advance(&mut self, bytes: u32) -> Result<u32> {
        self.seek(self.tell() + bytes)
    }
}
