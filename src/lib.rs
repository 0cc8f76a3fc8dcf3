//! # Dhara
//!
//! Dhara (धारा - "stream" in Sanskrit) gives you one byte-stream API on top of whatever the bytes
//! actually come from: an HTTP(S) server, a local file, or a `data:` URI. You hand it a URL, it
//! picks the right backend and you get reads, writes, peeks, seeks and a pile of binary helpers.
//!
//! ## Basic usage
//!
//! ```rust
//! use dhara::Stream;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut stream = Stream::from_url("data:;base64,AAECAw==")?;
//! stream.open()?;
//!
//! let header = stream.need(2)?.to_vec();   // peek, nothing consumed
//! assert_eq!(header, [0, 1]);
//!
//! assert_eq!(stream.read_u32_be(), 0x0001_0203);
//! # Ok(())
//! # }
//! ```
//!
//! ## What it does
//!
//! Backends only have to know how to move some bytes. The engine on top of them:
//! - Blocks until a buffer is filled, giving up after the stream has been idle for too long
//! - Keeps a small read-ahead cache so you can peek at upcoming bytes with `need()`
//! - Emulates forward seeking on backends that can't seek by reading and throwing bytes away
//! - Reads and writes 8/16/24/32-bit integers in both byte orders
//! - Pipes one stream into another with `load()` / `save()`
//!
//! ## Configuring streams
//!
//! Streams are configured with commands. A few are understood by every stream, the rest belong to
//! one backend and are simply refused by the others:
//!
//! ```rust,no_run
//! use dhara::{Arg, Command, Stream};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut stream = Stream::from_url("https://example.com/large-file.bin")?;
//! stream.set_timeout(Duration::from_secs(30))?;
//! stream.ioctl2(Command::HTTP_SET_HEADER, Arg::Str("Authorization"), Arg::Str("Bearer xyz"))?;
//! stream.ioctl1(Command::HTTP_SET_CHUNK_SIZE, Arg::Int(512 * 1024))?;
//! stream.open()?;
//! # Ok(())
//! # }
//! ```
//!
//! If you need full control over a backend, build it yourself and wrap it:
//!
//! ```rust,no_run
//! use dhara::{HttpBackend, Stream};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = HttpBackend::builder()
//!     .chunk_size(1024 * 1024)
//!     .cache_chunks(64)
//!     .retry_max_attempts(5)
//!     .build();
//!
//! let mut stream = Stream::new(Box::new(backend));
//! stream.set_url("https://example.com/large-file.bin")?;
//! stream.open()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Using with standard I/O libraries
//!
//! Wrap a stream in [`StreamAdapter`] to get `std::io::Read`, `Write` and `Seek`.
//!
//! ## Using it from C
//!
//! Build with `--features capi` to get C bindings:
//!
//! ```c
//! #include <dhara.h>
//!
//! dhara_stream_t* s = dhara_stream_create("https://example.com/data.bin");
//! if (!s || dhara_stream_open(s) != 0) {
//!     fprintf(stderr, "Error: %s\n", dhara_last_error());
//!     return 1;
//! }
//!
//! char buffer[1024];
//! ssize_t n = dhara_stream_bread(s, buffer, sizeof(buffer));
//!
//! dhara_stream_destroy(s);
//! ```
//!
//! ## Some things to know
//!
//! `need()` and the seek emulation don't mix: seeking while peeked bytes are still cached is an
//! error. Read them first (or close the stream).
//!
//! Backward seeks only work on backends that seek natively (files, data URIs, HTTP). Anything
//! else can only move forward.
//!
//! The HTTP backend needs servers to support Range requests. A 200 in reply to a range request
//! is an error.
//!
//! ## Feature flags
//!
//! - `curl` (default): use libcurl for HTTP
//! - `reqwest`: use reqwest instead of curl (don't enable both)
//! - `capi`: build the C API

mod blocking;
pub mod clock;
pub mod codec;
pub mod core;
pub mod data;
pub mod file;
pub mod http;
pub mod plug;
pub mod registry;
mod seek;
pub mod stream;
mod transfer;

pub use clock::*;
pub use crate::core::*;
pub use data::*;
pub use file::*;
pub use http::*;
pub use plug::*;
pub use registry::*;
pub use stream::{State, Stream};

#[cfg(feature = "capi")]
pub mod ffi;

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::thread;

use crate::clock::IdleTimer;

fn into_io_error(err: StreamError) -> io::Error {
    match err {
        StreamError::Io(e) => e,
        StreamError::EndOfStream | StreamError::Underrun { .. } => {
            io::Error::new(io::ErrorKind::UnexpectedEof, err)
        }
        StreamError::SeekOutOfRange | StreamError::BackwardSeek { .. } => {
            io::Error::new(io::ErrorKind::InvalidInput, err)
        }
        StreamError::Unsupported(_) => io::Error::new(io::ErrorKind::Unsupported, err),
        other => io::Error::other(other),
    }
}

/// `std::io` view of a [`Stream`].
///
/// `read` waits until at least one byte arrives (or the stream's timeout
/// passes) and reports the end of the stream as `Ok(0)`.
pub struct StreamAdapter {
    inner: Stream,
}

impl StreamAdapter {
    pub fn new(stream: Stream) -> Self {
        Self { inner: stream }
    }

    pub fn get_ref(&self) -> &Stream {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut Stream {
        &mut self.inner
    }

    pub fn into_inner(self) -> Stream {
        self.inner
    }
}

impl From<Stream> for StreamAdapter {
    fn from(stream: Stream) -> Self {
        Self::new(stream)
    }
}

impl Read for StreamAdapter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut timer = IdleTimer::start(&self.inner.clock, self.inner.timeout_ms);
        loop {
            match self.inner.read(buf) {
                Ok(0) => {
                    if timer.expired() {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("no data for {}ms", timer.idle_ms()),
                        ));
                    }
                    thread::yield_now();
                }
                Ok(n) => {
                    timer.progress();
                    return Ok(n);
                }
                Err(StreamError::EndOfStream) => return Ok(0),
                Err(e) => return Err(into_io_error(e)),
            }
        }
    }
}

impl Write for StreamAdapter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.bwrite(buf).map_err(into_io_error)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for StreamAdapter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner.seek(pos).map_err(into_io_error)
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.inner.offset())
    }
}
