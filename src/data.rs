use base64::{Engine, engine::general_purpose};
use percent_encoding::percent_decode_str;

use crate::core::{Arg, Backend, BackendKind, Capabilities, Command, Result, StreamError};

const DEFAULT_MIME: &str = "text/plain;charset=US-ASCII";
const BASE64_MARKER: &str = ";base64";

/// Decode a `data:[<mediatype>][;base64],<payload>` URI into its media type and bytes.
pub fn parse_data_uri(uri: &str) -> Result<(String, Vec<u8>)> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| StreamError::InvalidArgument(format!("not a data URI: {uri}")))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| StreamError::InvalidArgument("data URI has no ',' separator".into()))?;

    let split = meta.len().saturating_sub(BASE64_MARKER.len());
    let (mime, is_base64) = match meta.get(split..) {
        Some(tail) if tail.eq_ignore_ascii_case(BASE64_MARKER) => (&meta[..split], true),
        _ => (meta, false),
    };

    let mime = if mime.is_empty() { DEFAULT_MIME } else { mime };
    let raw: Vec<u8> = percent_decode_str(payload).collect();
    let data = if is_base64 {
        general_purpose::STANDARD
            .decode(&raw)
            .map_err(|e| StreamError::Protocol(format!("bad base64 payload: {e}")))?
    } else {
        raw
    };

    Ok((mime.to_string(), data))
}

/// In-memory backend fed from a data URI or from [`Command::DATA_SET_DATA`].
pub struct DataBackend {
    url: Option<String>,
    preset: Option<Vec<u8>>,
    mime: String,
    data: Vec<u8>,
    pos: usize,
    opened: bool,
}

impl DataBackend {
    pub fn new() -> Self {
        Self {
            url: None,
            preset: None,
            mime: DEFAULT_MIME.to_string(),
            data: Vec::new(),
            pos: 0,
            opened: false,
        }
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// Current contents, including anything written since open.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }
}

impl Default for DataBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for DataBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Data
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::READ | Capabilities::WRITE | Capabilities::SEEK | Capabilities::NEED
    }

    fn open(&mut self) -> Result<()> {
        if let Some(preset) = &self.preset {
            self.data = preset.clone();
        } else {
            let url = self.url.as_deref().ok_or(StreamError::NotConfigured)?;
            let (mime, data) = parse_data_uri(url)?;
            self.mime = mime;
            self.data = data;
        }
        self.pos = 0;
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) {
        self.opened = false;
    }

    fn raw_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.remaining() == 0 {
            return Err(StreamError::EndOfStream);
        }
        let n = buf.len().min(self.remaining());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn raw_write(&mut self, buf: &[u8]) -> Result<usize> {
        let end = self.pos + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.pos..end].copy_from_slice(buf);
        self.pos = end;
        Ok(buf.len())
    }

    fn size(&self) -> Option<u64> {
        self.opened.then_some(self.data.len() as u64)
    }

    fn offset(&self) -> u64 {
        self.pos as u64
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        if offset > self.data.len() as u64 {
            return Err(StreamError::SeekOutOfRange);
        }
        self.pos = offset as usize;
        Ok(())
    }

    fn need(&mut self, size: usize) -> Result<&[u8]> {
        if size > self.remaining() {
            return Err(StreamError::Underrun {
                wanted: size,
                available: self.remaining(),
            });
        }
        Ok(&self.data[self.pos..self.pos + size])
    }

    fn ioctl1(&mut self, cmd: Command, arg: Arg<'_>) -> bool {
        match cmd {
            Command::SET_URL => match arg.as_str() {
                Some(url) if url.starts_with("data:") => {
                    self.url = Some(url.to_string());
                    self.preset = None;
                    true
                }
                _ => false,
            },
            Command::DATA_SET_DATA => match arg.as_bytes() {
                Some(bytes) => {
                    self.preset = Some(bytes.to_vec());
                    true
                }
                None => false,
            },
            _ => false,
        }
    }
}
