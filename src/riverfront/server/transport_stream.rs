use std::io;
use std::io::{Read, Write};

use tokio::io::{Interest, Ready};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use crate::riverfront::common::{Result, Error};

pub(crate) enum TransportStream {
    TcpStream(TcpStream),
    #[cfg(unix)]
    UnixSocket(UnixStream),
}

impl TransportStream {
    pub fn new_tcp(stream: TcpStream) -> Self {
        TransportStream::TcpStream(stream)
    }

    #[cfg(unix)]
    pub fn new_unix(unix_socket: UnixStream) -> Self {
        TransportStream::UnixSocket(unix_socket)
    }

    pub fn is_unix(&self) -> bool {
        match self {
            #[cfg(unix)]
            TransportStream::UnixSocket(..) => true,
            _ => false,
        }
    }

    pub async fn readable(&self) -> Result<()> {
        match self {
            TransportStream::TcpStream(s) => s.readable().await.map_err(Error::from),
            #[cfg(unix)]
            TransportStream::UnixSocket(s) => s.readable().await.map_err(Error::from),
        }
    }

    pub async fn writable(&self) -> Result<()> {
        match self {
            TransportStream::TcpStream(s) => s.writable().await.map_err(Error::from),
            #[cfg(unix)]
            TransportStream::UnixSocket(s) => s.writable().await.map_err(Error::from),
        }
    }

    pub fn try_read(&self, buf: &mut [u8]) -> Result<usize> {
        match self {
            TransportStream::TcpStream(s) => s.try_read(buf).map_err(Error::from),
            #[cfg(unix)]
            TransportStream::UnixSocket(s) => s.try_read(buf).map_err(Error::from),
        }
    }

    pub fn try_write(&self, buf: &[u8]) -> Result<usize> {
        match self {
            TransportStream::TcpStream(s) => s.try_write(buf).map_err(Error::from),
            #[cfg(unix)]
            TransportStream::UnixSocket(s) => s.try_write(buf).map_err(Error::from),
        }
    }

    pub async fn ready(&self, interest: Interest) -> Result<Ready> {
        match self {
            TransportStream::TcpStream(s) => s.ready(interest).await.map_err(Error::from),
            #[cfg(unix)]
            TransportStream::UnixSocket(s) => s.ready(interest).await.map_err(Error::from),
        }
    }

    /// Shuts down the socket at the OS level, unblocking any task currently
    /// suspended in `readable()`/`writable()`/`ready()` on the same fd with
    /// an error rather than leaving it parked forever.
    pub fn close(&self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = match self {
                TransportStream::TcpStream(s) => s.as_raw_fd(),
                #[cfg(unix)]
                TransportStream::UnixSocket(s) => s.as_raw_fd(),
            };
            unsafe {
                libc::shutdown(fd, libc::SHUT_RDWR);
            }
        }
    }
}

/// Bridges the non-blocking `TransportStream::try_read` into `std::io::Read`
/// so rustls's `ServerConnection::read_tls`/`ClientConnection::read_tls` can
/// pull ciphertext directly off the socket. A `WouldBlock` error is passed
/// through verbatim; rustls treats it as "no more data right now".
pub(crate) struct TransportStreamReader<'a>(pub &'a TransportStream);

impl<'a> Read for TransportStreamReader<'a> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.try_read(buf).map_err(Error::into_io_error)
    }
}

pub(crate) struct TransportStreamWriter<'a>(pub &'a TransportStream);

impl<'a> Write for TransportStreamWriter<'a> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.try_write(buf).map_err(Error::into_io_error)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
