use std::fmt;
use std::io;

use bitflags::bitflags;
use thiserror::Error;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Idle timeout applied to every stream created from a URL.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Ceiling for a single `need` request.
pub const CACHE_SIZE: usize = 8192;

/// Scratch size used by seek emulation, transfers and `printf`.
pub const BLOCK_SIZE: usize = 8192;

/// Scheme tokens longer than this are truncated before matching.
pub const MAX_SCHEME_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Stream is not open")]
    Closed,

    #[error("Stream has no URL configured")]
    NotConfigured,

    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("End of stream")]
    EndOfStream,

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(Command),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation not supported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("Requested {0} bytes, cache holds at most {max}", max = CACHE_SIZE)]
    NeedTooLarge(usize),

    #[error("Wanted {wanted} bytes, only {available} available")]
    Underrun { wanted: usize, available: usize },

    #[error("Cannot seek while read-ahead data is cached")]
    CacheNotEmpty,

    #[error("Cannot seek backward from {from} to {to} without native seek")]
    BackwardSeek { from: u64, to: u64 },

    #[error("Seek target out of range")]
    SeekOutOfRange,

    #[error("Seek to {target} stalled at {reached}")]
    SeekStalled { target: u64, reached: u64 },

    #[error("Wrote {written} of {wanted} bytes")]
    ShortWrite { wanted: usize, written: usize },
}

pub type Result<T> = std::result::Result<T, StreamError>;

/// Which transport family a backend belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Http,
    File,
    Data,
    Custom,
}

bitflags! {
    /// Optional hooks a backend provides. The engine emulates whatever is missing.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const SEEK = 1 << 2;
        const NEED = 1 << 3;
        const BLOCK_READ = 1 << 4;
        const BLOCK_WRITE = 1 << 5;
    }
}

/// A configuration command, split into a namespace and a code within it.
///
/// Namespace 0 belongs to the engine; each backend owns its own namespace so
/// it can grow new commands without touching the engine.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command {
    namespace: u16,
    code: u16,
}

impl Command {
    pub const SET_URL: Command = Command::new(0, 1);
    pub const SET_TIMEOUT: Command = Command::new(0, 2);

    pub const HTTP_SET_HEADER: Command = Command::new(1, 1);
    pub const HTTP_CLEAR_HEADERS: Command = Command::new(1, 2);
    pub const HTTP_SET_CHUNK_SIZE: Command = Command::new(1, 3);

    pub const FILE_SET_MODE: Command = Command::new(2, 1);

    pub const DATA_SET_DATA: Command = Command::new(3, 1);

    pub const fn new(namespace: u16, code: u16) -> Self {
        Self { namespace, code }
    }

    pub fn namespace(&self) -> u16 {
        self.namespace
    }

    pub fn code(&self) -> u16 {
        self.code
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({}:{})", self.namespace, self.code)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.code)
    }
}

/// Argument passed along with a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arg<'a> {
    Int(u64),
    Str(&'a str),
    Bytes(&'a [u8]),
}

impl<'a> Arg<'a> {
    pub fn as_int(&self) -> Option<u64> {
        match self {
            Arg::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&'a str> {
        match self {
            Arg::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match self {
            Arg::Bytes(b) => Some(b),
            Arg::Str(s) => Some(s.as_bytes()),
            Arg::Int(_) => None,
        }
    }
}

/// Transport interface a concrete backend implements.
///
/// `raw_read`/`raw_write` may transfer fewer bytes than asked for:
/// `Ok(0)` means no progress this attempt, `Err(StreamError::EndOfStream)`
/// means the stream is finished, any other error is a hard failure.
///
/// Optional hooks are only called when the matching [`Capabilities`] flag is
/// advertised.
pub trait Backend: Send {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> Capabilities;

    fn open(&mut self) -> Result<()>;

    /// Release transport resources. Must be idempotent.
    fn close(&mut self);

    fn raw_read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(StreamError::Unsupported("read"))
    }

    fn raw_write(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(StreamError::Unsupported("write"))
    }

    /// Fused blocking read, used verbatim instead of the engine's retry loop.
    fn block_read(&mut self, _buf: &mut [u8], _timeout_ms: u64) -> Result<usize> {
        Err(StreamError::Unsupported("block read"))
    }

    /// Fused blocking write, used verbatim instead of the engine's retry loop.
    fn block_write(&mut self, _buf: &[u8], _timeout_ms: u64) -> Result<usize> {
        Err(StreamError::Unsupported("block write"))
    }

    /// Total size if known.
    fn size(&self) -> Option<u64> {
        None
    }

    fn offset(&self) -> u64;

    /// Native absolute seek.
    fn seek(&mut self, _offset: u64) -> Result<()> {
        Err(StreamError::Unsupported("seek"))
    }

    /// Zero-copy peek at the next `size` bytes without consuming them.
    fn need(&mut self, _size: usize) -> Result<&[u8]> {
        Err(StreamError::Unsupported("need"))
    }

    fn ioctl0(&mut self, _cmd: Command) -> bool {
        false
    }

    fn ioctl1(&mut self, _cmd: Command, _arg: Arg<'_>) -> bool {
        false
    }

    fn ioctl2(&mut self, _cmd: Command, _arg1: Arg<'_>, _arg2: Arg<'_>) -> bool {
        false
    }
}
