//! URI-addressed duplex channel between an application and its monitor.
//!
//! The monitor side binds, the application side connects. Two schemes are
//! supported: `ipc://<path>` (Unix sockets, the usual choice for a sibling
//! monitor process) and `tcp://<host>:<port>`. Frames are fixed-size
//! ([`FRAME_SIZE`]), so one `send`/`recv` always moves exactly one message
//! and message boundaries survive the stream transports.

use crate::{decode_frame, encode_frame, FrameError, Message, FRAME_SIZE};
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid channel uri `{uri}`: {reason}")]
    InvalidUri { uri: String, reason: &'static str },
    #[error("channel closed by peer")]
    Closed,
    #[error("receive timed out")]
    TimedOut,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("channel i/o: {0}")]
    Io(#[from] io::Error),
}

/// Channel address parsed from a URI.
enum Addr {
    Ipc(PathBuf),
    Tcp(String),
}

fn parse_uri(uri: &str) -> Result<Addr, ChannelError> {
    if let Some(path) = uri.strip_prefix("ipc://") {
        if path.is_empty() {
            return Err(ChannelError::InvalidUri {
                uri: uri.to_string(),
                reason: "empty ipc path",
            });
        }
        Ok(Addr::Ipc(PathBuf::from(path)))
    } else if let Some(addr) = uri.strip_prefix("tcp://") {
        if addr.is_empty() {
            return Err(ChannelError::InvalidUri {
                uri: uri.to_string(),
                reason: "empty tcp address",
            });
        }
        Ok(Addr::Tcp(addr.to_string()))
    } else {
        Err(ChannelError::InvalidUri {
            uri: uri.to_string(),
            reason: "unknown scheme, expected ipc:// or tcp://",
        })
    }
}

enum Stream {
    Unix(UnixStream),
    Tcp(TcpStream),
}

/// One endpoint of an established channel.
///
/// `send` and `recv` take `&self`, so a receive loop and an occasional
/// sender may share the endpoint across threads. The protocol guarantees a
/// single sender at any time; the transport does not enforce it.
pub struct Channel {
    stream: Stream,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.stream {
            Stream::Unix(_) => f.write_str("Channel(ipc)"),
            Stream::Tcp(_) => f.write_str("Channel(tcp)"),
        }
    }
}

impl Channel {
    /// Connects to a bound monitor endpoint. This is the application side.
    pub fn connect(uri: &str) -> Result<Self, ChannelError> {
        let stream = match parse_uri(uri)? {
            Addr::Ipc(path) => Stream::Unix(UnixStream::connect(path)?),
            Addr::Tcp(addr) => Stream::Tcp(TcpStream::connect(addr.as_str())?),
        };
        debug!(uri, "channel connected");
        Ok(Channel { stream })
    }

    /// Creates a connected endpoint pair inside this process.
    ///
    /// Used by the borrowed-channel constructors and by tests that drive
    /// both peers from one process.
    pub fn pair() -> io::Result<(Channel, Channel)> {
        let (a, b) = UnixStream::pair()?;
        Ok((
            Channel {
                stream: Stream::Unix(a),
            },
            Channel {
                stream: Stream::Unix(b),
            },
        ))
    }

    /// Sends one message as one frame.
    pub fn send(&self, msg: &Message) -> Result<(), ChannelError> {
        let frame = encode_frame(msg)?;
        match &self.stream {
            Stream::Unix(s) => (&*s).write_all(&frame)?,
            Stream::Tcp(s) => (&*s).write_all(&frame)?,
        }
        Ok(())
    }

    /// Receives one message, blocking until a full frame arrives or the
    /// configured read timeout elapses.
    pub fn recv(&self) -> Result<Message, ChannelError> {
        let mut frame = [0u8; FRAME_SIZE];
        let res = match &self.stream {
            Stream::Unix(s) => (&*s).read_exact(&mut frame),
            Stream::Tcp(s) => (&*s).read_exact(&mut frame),
        };
        match res {
            Ok(()) => Ok(decode_frame(&frame)?),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ChannelError::Closed),
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                Err(ChannelError::TimedOut)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Bounds how long `recv` may block. `None` blocks indefinitely.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), ChannelError> {
        match &self.stream {
            Stream::Unix(s) => s.set_read_timeout(timeout)?,
            Stream::Tcp(s) => s.set_read_timeout(timeout)?,
        }
        Ok(())
    }
}

enum ListenerInner {
    Unix(UnixListener),
    Tcp(TcpListener),
}

/// The bound (monitor) endpoint, waiting for its single application peer.
pub struct Listener {
    inner: ListenerInner,
}

impl Listener {
    /// Binds the monitor endpoint of a channel.
    ///
    /// For `ipc://` a stale socket file from a previous run is removed
    /// first, matching the rebind semantics of message-queue transports.
    pub fn bind(uri: &str) -> Result<Self, ChannelError> {
        let inner = match parse_uri(uri)? {
            Addr::Ipc(path) => {
                let _ = std::fs::remove_file(&path);
                ListenerInner::Unix(UnixListener::bind(path)?)
            }
            Addr::Tcp(addr) => ListenerInner::Tcp(TcpListener::bind(addr.as_str())?),
        };
        debug!(uri, "channel bound");
        Ok(Listener { inner })
    }

    /// Blocks until the application peer connects.
    pub fn accept(&self) -> Result<Channel, ChannelError> {
        let stream = match &self.inner {
            ListenerInner::Unix(l) => Stream::Unix(l.accept()?.0),
            ListenerInner::Tcp(l) => Stream::Tcp(l.accept()?.0),
        };
        debug!("application peer connected");
        Ok(Channel { stream })
    }

    /// The URI this listener is actually bound to. Useful with
    /// `tcp://host:0`, where the kernel picks the port.
    pub fn local_uri(&self) -> Result<String, ChannelError> {
        match &self.inner {
            ListenerInner::Unix(l) => {
                let addr = l.local_addr()?;
                let path = addr.as_pathname().unwrap_or_else(|| std::path::Path::new(""));
                Ok(format!("ipc://{}", path.display()))
            }
            ListenerInner::Tcp(l) => Ok(format!("tcp://{}", l.local_addr()?)),
        }
    }
}
