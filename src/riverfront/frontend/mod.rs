//! Shared base for every frontend connection type (Component B): owns the
//! socket transport, the write-side backlog with its flush threshold, and
//! the "idle since" timestamp used for idle reaping. `PgFrontend`,
//! `BinaryFrontend` and `HttpMux` all drive one of these rather than talking
//! to `server::Transport` directly.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8};
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};
use std::sync::Mutex;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{Interest, Ready};
use tokio::net::TcpStream;

use crate::riverfront::common::{bytes_are_contiguous, bytes_to_slice_mut, coarse_monotonic_now, unsplit_bytes, AtomicRefCounted};
use crate::riverfront::config::conf;
use crate::riverfront::server::ServerTransport;
use crate::riverfront::{Error, Result};

/// Anything that can report whether it holds a complete buffered message and
/// expose its accumulation buffer, so `FrontendBase::wait_for_message` can be
/// shared between the PG and binary wire parsers without either depending on
/// the other's concrete type.
pub trait FrameParser {
    fn has_pending_bytes(&self) -> bool;
    fn bytes_mut(&mut self) -> &mut BytesMut;
    /// True once a complete message is available without needing another
    /// socket read (cheap to call repeatedly; does not consume anything).
    fn has_complete_message(&mut self) -> bool;
}

impl FrameParser for crate::riverfront::pg::protocol::MessageParser {
    fn has_pending_bytes(&self) -> bool {
        crate::riverfront::pg::protocol::MessageParser::has_pending_bytes(self)
    }
    fn bytes_mut(&mut self) -> &mut BytesMut {
        crate::riverfront::pg::protocol::MessageParser::bytes_mut(self)
    }
    fn has_complete_message(&mut self) -> bool {
        // Header::parse is cheap and does not consume the buffer; peeking
        // this way avoids re-implementing the parser's framing logic here.
        let tagged = crate::riverfront::pg::protocol::MessageParser::tagged(self);
        crate::riverfront::pg::protocol::Header::parse(self.bytes_mut().chunk(), tagged)
            .ok()
            .flatten()
            .map(|h| h.len() as usize <= self.bytes_mut().len())
            .unwrap_or(false)
    }
}

impl FrameParser for crate::riverfront::binary::protocol::MessageParser {
    fn has_pending_bytes(&self) -> bool {
        crate::riverfront::binary::protocol::MessageParser::has_pending_bytes(self)
    }
    fn bytes_mut(&mut self) -> &mut BytesMut {
        crate::riverfront::binary::protocol::MessageParser::bytes_mut(self)
    }
    fn has_complete_message(&mut self) -> bool {
        crate::riverfront::binary::protocol::Message::parse_header(self.bytes_mut().chunk())
            .ok()
            .flatten()
            .map(|(_, len)| (len as usize + 1) <= self.bytes_mut().len())
            .unwrap_or(false)
    }
}

struct RefcountAndFlags(AtomicU8);

impl RefcountAndFlags {
    const HAS_BACKLOG: u8 = 128;
    const REFCOUNT_MASK: u8 = 0x3f;

    const fn new() -> Self {
        Self(AtomicU8::new(1))
    }

    fn refcount(&self) -> u32 {
        (self.0.load(Relaxed) & Self::REFCOUNT_MASK) as u32
    }

    fn incref(&self) {
        self.0.fetch_add(1, Relaxed);
    }

    fn decref(&self) -> bool {
        let before = self.0.fetch_sub(1, Relaxed);
        (before & Self::REFCOUNT_MASK) == 1
    }

    fn has_backlog(&self) -> bool {
        (self.0.load(Relaxed) & Self::HAS_BACKLOG) != 0
    }

    fn set_has_backlog(&self, value: bool) {
        if value {
            self.0.fetch_or(Self::HAS_BACKLOG, Relaxed);
        } else {
            self.0.fetch_and(!Self::HAS_BACKLOG, Relaxed);
        }
    }
}

/// Base fields every frontend connection type embeds. Implements `write`'s
/// 100 KB auto-flush threshold (§4.A) and the idling/`is_idle` contract
/// (§4.B) directly so `pgfrontend`/`binary` don't each reimplement them.
pub struct FrontendBase {
    transport: ServerTransport,
    backlog: Mutex<VecDeque<Bytes>>,
    refcount_and_flags: RefcountAndFlags,
    id: AtomicU32,
    last_active: AtomicU32,
    started_idling_at: AtomicU32,
    idling: AtomicBool,
}

impl std::fmt::Debug for FrontendBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FrontendBase{{id: {}}}", self.id.load(Relaxed))
    }
}

impl FrontendBase {
    pub fn new(stream: TcpStream, is_localhost: bool) -> Self {
        FrontendBase {
            transport: ServerTransport::new(stream, is_localhost),
            backlog: Mutex::new(VecDeque::new()),
            refcount_and_flags: RefcountAndFlags::new(),
            id: AtomicU32::new(0),
            last_active: AtomicU32::new(coarse_monotonic_now()),
            started_idling_at: AtomicU32::new(0),
            idling: AtomicBool::new(false),
        }
    }

    pub fn transport(&self) -> &ServerTransport {
        &self.transport
    }

    pub fn id(&self) -> u32 {
        self.id.load(Relaxed)
    }

    pub fn set_id(&self, id: u32) {
        self.id.store(id, Relaxed);
    }

    pub fn last_active(&self) -> u32 {
        self.last_active.load(Relaxed)
    }

    pub fn touch(&self) {
        self.last_active.store(coarse_monotonic_now(), Relaxed);
        self.idling.store(false, Relaxed);
    }

    pub fn is_idle(&self, expiry: u32) -> bool {
        self.idling.load(Acquire) && self.started_idling_at.load(Relaxed) < expiry
    }

    pub fn close(&self) {
        self.transport.close();
    }

    /// Appends `buf` to the pending write backlog, flushing eagerly to the
    /// transport first when the backlog is currently empty. Auto-flushes
    /// once the accumulated pending size reaches `write_flush_threshold`.
    pub fn write(&self, mut buf: Bytes) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let mut backlog = self.backlog.lock().map_err(Error::from)?;
        if backlog.is_empty() {
            let n = self.transport.try_write(buf.chunk())?;
            if n < buf.remaining() {
                buf.advance(n);
            } else {
                return Ok(());
            }
        }
        if !backlog.is_empty() && bytes_are_contiguous(&buf, backlog.back().unwrap()) {
            let (merged, failed) = unsafe { unsplit_bytes(buf, backlog.pop_back().unwrap()) };
            if let Some(m) = merged {
                backlog.push_back(m);
            }
            if let Some(other) = failed {
                backlog.push_back(other);
            }
        } else {
            backlog.push_back(buf);
        }
        self.refcount_and_flags.set_has_backlog(true);

        let pending: usize = backlog.iter().map(|b| b.len()).sum();
        if pending >= conf().write_flush_threshold {
            self.flush_locked(backlog)?;
        }
        Ok(())
    }

    /// Hands the whole pending buffer to the transport now, awaiting
    /// writability if the socket isn't ready. Fails with a closed-connection
    /// error if the transport has gone away.
    pub async fn flush(&self) -> Result<()> {
        loop {
            {
                let backlog = self.backlog.lock().map_err(Error::from)?;
                if backlog.is_empty() {
                    return Ok(());
                }
                drop(backlog);
            }
            self.transport.writable().await?;
            let backlog = self.backlog.lock().map_err(Error::from)?;
            self.flush_locked(backlog)?;
        }
    }

    fn flush_locked(&self, mut backlog: std::sync::MutexGuard<'_, VecDeque<Bytes>>) -> Result<()> {
        loop {
            match backlog.front_mut() {
                Some(bytes) => {
                    let n = self.transport.try_write(bytes.chunk())?;
                    if n == 0 {
                        break;
                    } else if n < bytes.remaining() {
                        bytes.advance(n);
                    } else {
                        backlog.pop_front();
                    }
                }
                None => {
                    self.refcount_and_flags.set_has_backlog(false);
                    break;
                }
            }
        }
        Ok(())
    }

    fn try_read(&self, buf: &mut BytesMut) -> Result<usize> {
        let start = buf.len();
        let bytes = unsafe { bytes_to_slice_mut(buf) };
        let n = self.transport.try_read(&mut bytes[start..])?;
        unsafe { buf.set_len(buf.len() + n) };
        Ok(n)
    }

    /// Reads directly off the transport, without going through a
    /// wire-specific `FrameParser`, until at least `min` bytes are
    /// buffered. Used by `demux::sniff` to look at the first bytes of a
    /// freshly accepted socket before any protocol (and thus any parser
    /// type) has been chosen.
    pub async fn peek_initial_bytes(&self, min: usize) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(min.max(conf().recv_buffer_size as usize));
        loop {
            let n = self.try_read(&mut buf)?;
            if n > 0 {
                self.touch();
                if buf.len() >= min {
                    return Ok(buf);
                }
                continue;
            }
            self.transport.readable().await?;
        }
    }

    /// Reads into `buf` until `is_complete(buf)` returns true. Used by
    /// `HttpMux`, whose framing (request line + headers + optional
    /// `Content-Length` body) doesn't fit the single-length-prefix
    /// `FrameParser` contract `wait_for_message` drives.
    pub async fn read_until<F: FnMut(&[u8]) -> bool>(&self, buf: &mut BytesMut, mut is_complete: F) -> Result<()> {
        loop {
            if is_complete(buf.chunk()) {
                return Ok(());
            }
            if buf.capacity() == buf.len() {
                buf.reserve(buf.capacity().max(4096));
            }
            let n = self.try_read(buf)?;
            if n > 0 {
                self.touch();
                continue;
            }
            self.transport.readable().await?;
        }
    }

    /// Suspends until `parser` holds a complete message, reading from the
    /// transport as it becomes readable. If `report_idling` is true, records
    /// `started_idling_at` while suspended so the connection-reaper's
    /// `is_idle` predicate becomes true after the configured expiry.
    pub async fn wait_for_message<P: FrameParser>(&self, parser: &mut P, report_idling: bool) -> Result<()> {
        loop {
            if parser.bytes_mut().capacity() > parser.bytes_mut().len() {
                let n = self.try_read(parser.bytes_mut())?;
                if n > 0 {
                    self.touch();
                    if parser.has_complete_message() {
                        return Ok(());
                    }
                    continue;
                }
            }

            if report_idling {
                self.started_idling_at.store(coarse_monotonic_now(), Relaxed);
                self.idling.store(true, Release);
            }

            let interest = if self.refcount_and_flags.has_backlog() || self.transport.wants_write() {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            let ready = self.transport.ready(interest).await?;

            if ready.is_writable() {
                let backlog = self.backlog.lock().map_err(Error::from)?;
                self.flush_locked(backlog)?;
            }
            if ready.is_readable() {
                let n = self.try_read(parser.bytes_mut())?;
                if n == 0 {
                    return Err(Error::closed());
                }
                self.touch();
                if parser.has_complete_message() {
                    return Ok(());
                }
            }
        }
    }
}

impl AtomicRefCounted for FrontendBase {
    fn refcount(&self) -> u32 {
        self.refcount_and_flags.refcount()
    }
    fn incref(&self) {
        self.refcount_and_flags.incref()
    }
    fn decref(&self) -> bool {
        self.refcount_and_flags.decref()
    }
}
