use crate::core::{
    Arg, Backend, BackendKind, Command, DEFAULT_TIMEOUT_MS, MAX_SCHEME_LEN, Result, StreamError,
};
use crate::data::DataBackend;
use crate::file::FileBackend;
use crate::http::HttpBackend;
use crate::stream::Stream;

/// One row of the protocol table.
pub struct Protocol {
    pub scheme: &'static str,
    pub kind: BackendKind,
    pub create: fn() -> Box<dyn Backend>,
}

fn create_http() -> Box<dyn Backend> {
    Box::new(HttpBackend::new())
}

fn create_file() -> Box<dyn Backend> {
    Box::new(FileBackend::new())
}

fn create_data() -> Box<dyn Backend> {
    Box::new(DataBackend::new())
}

/// Known schemes, matched in order.
pub static PROTOCOLS: &[Protocol] = &[
    Protocol {
        scheme: "http",
        kind: BackendKind::Http,
        create: create_http,
    },
    Protocol {
        scheme: "https",
        kind: BackendKind::Http,
        create: create_http,
    },
    Protocol {
        scheme: "file",
        kind: BackendKind::File,
        create: create_file,
    },
    Protocol {
        scheme: "data",
        kind: BackendKind::Data,
        create: create_data,
    },
];

static FILE_FALLBACK: Protocol = Protocol {
    scheme: "file",
    kind: BackendKind::File,
    create: create_file,
};

/// Length of the `file://` prefix removed before a file backend sees the URL.
const FILE_PREFIX_LEN: usize = 7;

/// The bytes before the first `:`, cut off at [`MAX_SCHEME_LEN`].
pub fn scheme_of(url: &str) -> &[u8] {
    let bytes = url.as_bytes();
    let end = bytes
        .iter()
        .take(MAX_SCHEME_LEN)
        .position(|&b| b == b':')
        .unwrap_or(bytes.len().min(MAX_SCHEME_LEN));
    &bytes[..end]
}

/// Find the protocol that handles `url`. Bare absolute paths go to the file backend.
pub fn resolve(url: &str) -> Option<&'static Protocol> {
    let scheme = scheme_of(url);
    PROTOCOLS
        .iter()
        .find(|p| p.scheme.as_bytes() == scheme)
        .or_else(|| url.starts_with('/').then_some(&FILE_FALLBACK))
}

impl Stream {
    /// Build a configured (not yet opened) stream for `url`.
    ///
    /// `file://` URLs lose their first seven characters, so `file:///tmp/x`
    /// becomes `/tmp/x`. Other spellings are passed through unchecked.
    pub fn from_url(url: &str) -> Result<Stream> {
        let protocol =
            resolve(url).ok_or_else(|| StreamError::UnsupportedProtocol(url.to_string()))?;

        let target = if protocol.kind == BackendKind::File && !url.starts_with('/') {
            url.get(FILE_PREFIX_LEN..).unwrap_or("")
        } else {
            url
        };

        log::debug!("resolved {} to {:?} backend", url, protocol.kind);

        let mut stream = Stream::new((protocol.create)());
        stream.ioctl1(Command::SET_URL, Arg::Str(target))?;
        stream.ioctl1(Command::SET_TIMEOUT, Arg::Int(DEFAULT_TIMEOUT_MS))?;
        Ok(stream)
    }
}
