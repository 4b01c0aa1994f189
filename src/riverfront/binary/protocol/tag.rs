use std::fmt::{Debug, Display, Formatter};

/// Message-kind tag byte for the binary wire. Framing mirrors `pg::protocol`
/// (1-byte tag + 4-byte BE length inclusive of itself + payload) but the tag
/// space is this protocol's own.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Tag(u8);

impl Tag {
    pub const UNTAGGED: Tag = Tag(0);

    // Client -> server
    pub const CLIENT_HANDSHAKE: Tag = Tag::new_unchecked(b'V');
    pub const AUTH_RESPONSE: Tag = Tag::new_unchecked(b'p');
    pub const PARSE: Tag = Tag::new_unchecked(b'P');
    pub const EXECUTE: Tag = Tag::new_unchecked(b'E');
    pub const OPTIMISTIC_EXECUTE: Tag = Tag::new_unchecked(b'O');
    pub const EXECUTE_SCRIPT: Tag = Tag::new_unchecked(b'Q');
    pub const SYNC: Tag = Tag::new_unchecked(b'S');
    pub const DESCRIBE_STATEMENT: Tag = Tag::new_unchecked(b'D');
    pub const DUMP: Tag = Tag::new_unchecked(b'>');
    pub const RESTORE: Tag = Tag::new_unchecked(b'<');
    pub const RESTORE_BLOCK: Tag = Tag::new_unchecked(b'=');
    pub const RESTORE_EOF: Tag = Tag::new_unchecked(b'.');
    pub const TERMINATE: Tag = Tag::new_unchecked(b'X');

    // Server -> client
    pub const SERVER_HANDSHAKE: Tag = Tag::new_unchecked(b'v');
    pub const AUTHENTICATION_OK: Tag = Tag::new_unchecked(b'R');
    pub const SERVER_KEY_DATA: Tag = Tag::new_unchecked(b'K');
    pub const PARAMETER_STATUS: Tag = Tag::new_unchecked(b's');
    pub const COMMAND_COMPLETE: Tag = Tag::new_unchecked(b'C');
    pub const COMMAND_DATA_DESCRIPTION: Tag = Tag::new_unchecked(b'T');
    pub const STATE_DATA_DESCRIPTION: Tag = Tag::new_unchecked(b's');
    pub const DATA: Tag = Tag::new_unchecked(b'D');
    pub const READY_FOR_COMMAND: Tag = Tag::new_unchecked(b'Z');
    pub const ERROR_RESPONSE: Tag = Tag::new_unchecked(b'e');
    pub const LOG_MESSAGE: Tag = Tag::new_unchecked(b'l');
    pub const DUMP_HEADER: Tag = Tag::new_unchecked(b'@');
    pub const RESTORE_READY: Tag = Tag::new_unchecked(b'+');

    pub const fn new_unchecked(b: u8) -> Self {
        Tag(b)
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "'{}'", self.0 as char)
    }
}

impl Debug for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}
