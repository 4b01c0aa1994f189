//! Framing primitives for the proprietary binary wire protocol (Component A,
//! binary side): mirrors `pg::protocol`'s tag/message/parser/builder shapes,
//! with its own tag space and an always-tagged frame (no untagged first
//! message, unlike PG's Startup packet).

mod tag;
mod message;
mod message_parser;
mod message_reader;
mod message_builder;

pub use tag::Tag;
pub use message::Message;
pub use message_parser::MessageParser;
pub use message_reader::MessageReader;
pub use message_builder::MessageBuilder;

/// Header-block key tags carried in Parse/Execute/OptimisticExecute headers
/// and in the server's response headers (§6).
pub mod header_key {
    pub const IMPLICIT_LIMIT: u16 = 0xFF01;
    pub const IMPLICIT_TYPEIDS: u16 = 0xFF02;
    pub const IMPLICIT_TYPENAMES: u16 = 0xFF03;
    pub const ALLOW_CAPABILITIES: u16 = 0xFF04;
    pub const EXPLICIT_OBJECTIDS: u16 = 0xFF05;
    pub const SERVER_HEADER_CAPABILITIES: u16 = 0x1001;
}

/// Parses a `(u16 count, (u16 key, u32 len, bytes)×count)` header block,
/// returning the raw byte slices keyed by header key.
pub fn read_headers(r: &mut MessageReader<'_>) -> std::collections::HashMap<u16, Vec<u8>> {
    let count = r.read_u16();
    let mut out = std::collections::HashMap::with_capacity(count as usize);
    for _ in 0..count {
        let key = r.read_u16();
        let bytes = r.read_len_prefixed_bytes().to_vec();
        out.insert(key, bytes);
    }
    out
}
