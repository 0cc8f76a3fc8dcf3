use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::blocking;
use crate::clock::{Clock, default_clock};
use crate::core::{
    Arg, Backend, BackendKind, BLOCK_SIZE, CACHE_SIZE, Capabilities, Command,
    DEFAULT_TIMEOUT_MS, Result, StreamError,
};

/// Lifecycle of a [`Stream`]. Destruction is dropping the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Created,
    Configured,
    Opened,
    Closed,
}

/// Read-ahead buffer. Valid bytes live in `data[head..head + len]`.
pub(crate) struct Cache {
    data: Option<Box<[u8]>>,
    head: usize,
    len: usize,
}

impl Cache {
    fn new() -> Self {
        Self {
            data: None,
            head: 0,
            len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Move cached bytes into `out`, oldest first.
    fn drain_into(&mut self, out: &mut [u8]) -> usize {
        let Some(data) = self.data.as_deref() else {
            return 0;
        };
        let n = self.len.min(out.len());
        out[..n].copy_from_slice(&data[self.head..self.head + n]);
        self.head += n;
        self.len -= n;
        if self.len == 0 {
            self.head = 0;
        }
        n
    }

    fn window(&self, size: usize) -> &[u8] {
        match self.data.as_deref() {
            Some(data) => &data[self.head..self.head + size],
            None => &[],
        }
    }

    /// Shift valid bytes to the buffer start, allocating on first use.
    fn compact(&mut self) -> &mut [u8] {
        let data = self
            .data
            .get_or_insert_with(|| vec![0u8; CACHE_SIZE].into_boxed_slice());
        if self.head > 0 {
            data.copy_within(self.head..self.head + self.len, 0);
            self.head = 0;
        }
        data
    }
}

/// A byte stream over any [`Backend`].
///
/// Streams are usually built with [`Stream::from_url`], which picks the
/// backend from the URL scheme and applies the default timeout. Reads are
/// served from the read-ahead cache first, then from the backend.
pub struct Stream {
    pub(crate) kind: BackendKind,
    pub(crate) backend: Box<dyn Backend>,
    pub(crate) state: State,
    pub(crate) timeout_ms: u64,
    pub(crate) cache: Cache,
    pub(crate) clock: Arc<dyn Clock>,
    url: Option<String>,
}

impl Stream {
    /// Wrap a backend. The stream starts in [`State::Created`] and needs a
    /// URL before it can be opened.
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self {
            kind: backend.kind(),
            backend,
            state: State::Created,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            cache: Cache::new(),
            clock: default_clock(),
            url: None,
        }
    }

    /// Replace the clock used for idle-timeout measurement.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == State::Opened
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.ioctl1(Command::SET_TIMEOUT, Arg::Int(ms))
    }

    pub fn set_url(&mut self, url: &str) -> Result<()> {
        self.ioctl1(Command::SET_URL, Arg::Str(url))
    }

    pub fn open(&mut self) -> Result<()> {
        match self.state {
            State::Opened => Ok(()),
            State::Created => Err(StreamError::NotConfigured),
            State::Configured | State::Closed => {
                self.backend.open()?;
                self.state = State::Opened;
                log::debug!("opened {:?} stream {}", self.kind, self.url().unwrap_or(""));
                Ok(())
            }
        }
    }

    /// Close the backend and drop any cached read-ahead. Closing twice is a no-op.
    pub fn close(&mut self) {
        self.backend.close();
        self.cache.clear();
        if self.state == State::Opened {
            self.state = State::Closed;
            log::debug!("closed {:?} stream {}", self.kind, self.url().unwrap_or(""));
        }
    }

    /// Close and release everything the stream owns.
    pub fn destroy(self) {
        drop(self);
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.state == State::Opened {
            Ok(())
        } else {
            Err(StreamError::Closed)
        }
    }

    /// Read whatever is available right now.
    ///
    /// Cached bytes are returned first without touching the backend. `Ok(0)`
    /// means the backend made no progress this time.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let cached = self.cache.drain_into(buf);
        if cached > 0 {
            return Ok(cached);
        }

        if !self.backend.capabilities().contains(Capabilities::READ) {
            return Err(StreamError::Unsupported("read"));
        }
        self.backend.raw_read(buf)
    }

    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }

        if !self.backend.capabilities().contains(Capabilities::WRITE) {
            return Err(StreamError::Unsupported("write"));
        }
        self.backend.raw_write(buf)
    }

    /// Fill `buf` completely unless the stream ends or stays idle past the timeout.
    pub fn bread(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }

        let cached = self.cache.drain_into(buf);
        if cached == buf.len() {
            return Ok(cached);
        }

        match blocking::block_read(
            self.backend.as_mut(),
            &self.clock,
            self.timeout_ms,
            &mut buf[cached..],
        ) {
            Ok(n) => Ok(cached + n),
            Err(StreamError::EndOfStream) if cached > 0 => Ok(cached),
            Err(e) => Err(e),
        }
    }

    /// Write all of `buf` unless the backend stays idle past the timeout.
    pub fn bwrite(&mut self, buf: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        if buf.is_empty() {
            return Ok(0);
        }

        blocking::block_write(self.backend.as_mut(), &self.clock, self.timeout_ms, buf)
    }

    /// Peek at the next `size` bytes without consuming them.
    ///
    /// The returned slice is exactly `size` bytes long. Bytes pulled from the
    /// backend stay cached and are handed out by the next read, even when
    /// the backend runs dry before `size` is reached.
    pub fn need(&mut self, size: usize) -> Result<&[u8]> {
        self.ensure_open()?;

        if self.backend.capabilities().contains(Capabilities::NEED) {
            return self.backend.need(size);
        }

        if size > CACHE_SIZE {
            return Err(StreamError::NeedTooLarge(size));
        }
        if size == 0 || self.cache.len() >= size {
            return Ok(self.cache.window(size));
        }

        let filled = self.cache.len();
        let buf = self.cache.compact();
        let got = match blocking::block_read(
            self.backend.as_mut(),
            &self.clock,
            self.timeout_ms,
            &mut buf[filled..size],
        ) {
            Ok(n) => n,
            Err(StreamError::EndOfStream) => 0,
            Err(e) => return Err(e),
        };
        self.cache.len += got;

        if self.cache.len() < size {
            return Err(StreamError::Underrun {
                wanted: size,
                available: self.cache.len(),
            });
        }

        Ok(self.cache.window(size))
    }

    /// Total size, when the stream is open and the backend knows it.
    pub fn size(&self) -> Option<u64> {
        if !self.is_open() {
            return None;
        }
        self.backend.size()
    }

    /// Logical position: bytes consumed by the caller so far. Zero when
    /// the stream is not open, like [`Stream::size`] reporting `None`.
    pub fn offset(&self) -> u64 {
        if !self.is_open() {
            return 0;
        }
        self.backend
            .offset()
            .saturating_sub(self.cache.len() as u64)
    }

    /// Bytes remaining before the end, when the size is known.
    pub fn left(&self) -> Option<u64> {
        self.size().map(|size| size.saturating_sub(self.offset()))
    }

    pub fn ioctl0(&mut self, cmd: Command) -> Result<()> {
        if self.backend.ioctl0(cmd) {
            Ok(())
        } else {
            Err(StreamError::UnsupportedCommand(cmd))
        }
    }

    pub fn ioctl1(&mut self, cmd: Command, arg: Arg<'_>) -> Result<()> {
        let mut handled = false;

        if cmd == Command::SET_TIMEOUT {
            self.timeout_ms = arg.as_int().ok_or_else(|| {
                StreamError::InvalidArgument("timeout must be an integer of milliseconds".into())
            })?;
            handled = true;
        }

        let url = if cmd == Command::SET_URL {
            Some(arg.as_str().ok_or_else(|| {
                StreamError::InvalidArgument("url must be a string".into())
            })?)
        } else {
            None
        };

        let accepted = self.backend.ioctl1(cmd, arg);

        if let Some(url) = url
            && accepted
        {
            self.url = Some(url.to_string());
            if self.state == State::Created {
                self.state = State::Configured;
            }
        }

        if handled || accepted {
            Ok(())
        } else {
            Err(StreamError::UnsupportedCommand(cmd))
        }
    }

    pub fn ioctl2(&mut self, cmd: Command, arg1: Arg<'_>, arg2: Arg<'_>) -> Result<()> {
        if self.backend.ioctl2(cmd, arg1, arg2) {
            Ok(())
        } else {
            Err(StreamError::UnsupportedCommand(cmd))
        }
    }

    /// Format into at most [`BLOCK_SIZE`] bytes and block-write them.
    pub fn printf(&mut self, args: fmt::Arguments<'_>) -> Result<usize> {
        let text = fmt::format(args);
        let bytes = &text.as_bytes()[..text.len().min(BLOCK_SIZE)];
        if bytes.is_empty() {
            return Ok(0);
        }
        self.bwrite(bytes)
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("url", &self.url)
            .field("timeout_ms", &self.timeout_ms)
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        self.close();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryBackend;
    use super::*;
    use std::io::SeekFrom;

    fn open_stream(backend: MemoryBackend) -> Stream {
        let mut stream = Stream::new(Box::new(backend));
        stream.set_url("mem://test").unwrap();
        stream.open().unwrap();
        stream
    }

    #[test]
    fn lifecycle_transitions() {
        let mut stream = Stream::new(Box::new(MemoryBackend::new(b"abc")));
        assert_eq!(stream.state(), State::Created);
        assert!(matches!(stream.open(), Err(StreamError::NotConfigured)));

        stream.set_url("mem://x").unwrap();
        assert_eq!(stream.state(), State::Configured);
        assert_eq!(stream.url(), Some("mem://x"));

        stream.open().unwrap();
        assert!(stream.is_open());

        stream.close();
        assert_eq!(stream.state(), State::Closed);
        stream.close();
        assert_eq!(stream.state(), State::Closed);

        stream.open().unwrap();
        assert!(stream.is_open());
    }

    #[test]
    fn failed_open_stays_configured() {
        let mut backend = MemoryBackend::new(b"abc");
        backend.fail_open = true;
        let mut stream = Stream::new(Box::new(backend));
        stream.set_url("mem://x").unwrap();

        assert!(stream.open().is_err());
        assert_eq!(stream.state(), State::Configured);
    }

    #[test]
    fn operations_after_close_fail() {
        let mut stream = open_stream(MemoryBackend::new(b"abcdef"));
        stream.close();

        let mut buf = [0u8; 4];
        assert!(matches!(stream.read(&mut buf), Err(StreamError::Closed)));
        assert!(matches!(stream.bread(&mut buf), Err(StreamError::Closed)));
        assert!(matches!(stream.write(b"x"), Err(StreamError::Closed)));
        assert!(matches!(stream.need(2), Err(StreamError::Closed)));
        assert!(matches!(
            stream.seek(SeekFrom::Start(0)),
            Err(StreamError::Closed)
        ));
        assert_eq!(stream.size(), None);
    }

    #[test]
    fn offset_resets_once_closed() {
        let mut stream = open_stream(MemoryBackend::new(b"abcdef"));
        let mut buf = [0u8; 4];
        stream.bread(&mut buf).unwrap();
        assert_eq!(stream.offset(), 4);

        stream.close();
        assert_eq!(stream.offset(), 0);
        assert_eq!(stream.left(), None);
    }

    #[test]
    fn need_peeks_without_consuming() {
        let mut stream = open_stream(MemoryBackend::new(b"0123456789").step(3));

        assert_eq!(stream.need(2).unwrap(), b"01");
        assert_eq!(stream.need(5).unwrap(), b"01234");
        assert_eq!(stream.need(5).unwrap(), b"01234");
        assert_eq!(stream.offset(), 0);

        let mut buf = [0u8; 3];
        assert_eq!(stream.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"012");
        assert_eq!(stream.offset(), 3);

        assert_eq!(stream.need(4).unwrap(), b"3456");

        let mut rest = [0u8; 7];
        assert_eq!(stream.bread(&mut rest).unwrap(), 7);
        assert_eq!(&rest, b"3456789");
    }

    #[test]
    fn need_zero_returns_empty_slice() {
        let mut stream = open_stream(MemoryBackend::new(b"abc"));
        assert!(stream.need(0).unwrap().is_empty());
    }

    #[test]
    fn need_rejects_oversized_requests() {
        let mut stream = open_stream(MemoryBackend::new(b"abc"));
        assert!(matches!(
            stream.need(CACHE_SIZE + 1),
            Err(StreamError::NeedTooLarge(_))
        ));
    }

    #[test]
    fn need_underrun_keeps_pulled_bytes() {
        let mut stream = open_stream(MemoryBackend::new(b"abc"));

        match stream.need(8) {
            Err(StreamError::Underrun { wanted, available }) => {
                assert_eq!(wanted, 8);
                assert_eq!(available, 3);
            }
            other => panic!("unexpected {other:?}"),
        }

        let mut buf = [0u8; 8];
        assert_eq!(stream.bread(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
    }

    #[test]
    fn cached_reads_skip_the_backend() {
        let mut stream = open_stream(MemoryBackend::new(b"abcdef"));
        stream.need(4).unwrap();

        let mut buf = [0u8; 2];
        assert_eq!(stream.read(&mut buf).unwrap(), 2);
        assert_eq!(stream.bread(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"cd");
        assert_eq!(stream.cache.len(), 0);
    }

    #[test]
    fn bread_combines_cache_and_backend() {
        let mut stream = open_stream(MemoryBackend::new(b"abcdefgh").step(2));
        stream.need(3).unwrap();

        let mut buf = [0u8; 6];
        assert_eq!(stream.bread(&mut buf).unwrap(), 6);
        assert_eq!(&buf, b"abcdef");
    }

    #[test]
    fn close_clears_the_cache() {
        let mut stream = open_stream(MemoryBackend::new(b"abcdef"));
        stream.need(4).unwrap();
        stream.close();
        assert!(stream.cache.is_empty());
    }

    #[test]
    fn bwrite_loops_over_partial_writes() {
        let backend = MemoryBackend::new(b"").step(3);
        let sink = backend.sink();
        let mut stream = open_stream(backend);
        assert_eq!(stream.bwrite(b"hello world").unwrap(), 11);
        assert_eq!(sink.lock().unwrap().as_slice(), b"hello world");
    }

    #[test]
    fn ioctl_timeout_is_handled_by_the_engine() {
        let mut stream = open_stream(MemoryBackend::new(b""));
        stream.ioctl1(Command::SET_TIMEOUT, Arg::Int(250)).unwrap();
        assert_eq!(stream.timeout(), Duration::from_millis(250));

        assert!(matches!(
            stream.ioctl1(Command::SET_TIMEOUT, Arg::Str("soon")),
            Err(StreamError::InvalidArgument(_))
        ));
    }

    #[test]
    fn unknown_commands_are_rejected() {
        let mut stream = open_stream(MemoryBackend::new(b""));
        let cmd = Command::new(9, 9);
        assert!(matches!(
            stream.ioctl0(cmd),
            Err(StreamError::UnsupportedCommand(c)) if c == cmd
        ));
        assert!(stream.ioctl1(cmd, Arg::Int(1)).is_err());
        assert!(stream.ioctl2(cmd, Arg::Int(1), Arg::Int(2)).is_err());
    }

    #[test]
    fn left_reports_remaining_bytes() {
        let mut stream = open_stream(MemoryBackend::new(b"abcdef"));
        let mut buf = [0u8; 2];
        stream.bread(&mut buf).unwrap();
        assert_eq!(stream.left(), Some(4));
    }

    #[test]
    fn printf_writes_formatted_text() {
        let backend = MemoryBackend::new(b"");
        let sink = backend.sink();
        let mut stream = open_stream(backend);
        assert_eq!(stream.printf(format_args!("{}-{}", "ab", 12)).unwrap(), 5);
        assert_eq!(sink.lock().unwrap().as_slice(), b"ab-12");
    }
}
