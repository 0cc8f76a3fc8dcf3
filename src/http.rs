use std::num::NonZeroUsize;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lru::LruCache;

use crate::core::{Arg, Backend, BackendKind, Capabilities, Command, Result, StreamError};
use crate::plug::{BlockingHttp, HttpResponse, build_default_transport};

#[derive(Clone, Debug)]
pub struct HttpConfig {
    pub chunk_size: u64,
    pub cache_chunks: usize,
    pub retry_max_attempts: usize,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            chunk_size: 256 * 1024,
            cache_chunks: 16,
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_millis(50),
            retry_max_delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_millis(crate::core::DEFAULT_TIMEOUT_MS),
            user_agent: format!("dhara/{}", crate::core::VERSION),
        }
    }
}

fn retry_delay(base: Duration, max: Duration, attempt: usize) -> Duration {
    let shift = attempt.min(20);
    let mult = 1u32.checked_shl(shift as u32).unwrap_or(u32::MAX);
    let delay = base.checked_mul(mult).unwrap_or(max);
    if delay > max { max } else { delay }
}

fn chunk_capacity(entries: usize) -> NonZeroUsize {
    NonZeroUsize::new(entries).unwrap_or(NonZeroUsize::MIN)
}

/// HTTP(S) backend reading fixed-size ranges on demand.
///
/// Recently fetched ranges are kept in a small LRU so that re-reading an
/// area after a seek does not hit the network again. Writing is not
/// supported.
pub struct HttpBackend {
    url: Option<Arc<str>>,
    config: HttpConfig,
    transport: Option<Arc<dyn BlockingHttp>>,
    custom_transport: bool,
    transport_stale: bool,
    headers: Vec<(String, String)>,
    chunks: LruCache<u64, Arc<[u8]>>,
    size: Option<u64>,
    offset: u64,
    opened: bool,
}

impl HttpBackend {
    pub fn new() -> Self {
        HttpBackendBuilder::new().build()
    }

    pub fn builder() -> HttpBackendBuilder {
        HttpBackendBuilder::new()
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    fn with_retry<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(v) => return Ok(v),
                Err(StreamError::Network(err)) => {
                    if attempt >= self.config.retry_max_attempts {
                        return Err(StreamError::Network(err));
                    }
                    log::warn!("{} failed ({}), retry {}", what, err, attempt + 1);
                }
                Err(e) => return Err(e),
            }

            let delay = retry_delay(
                self.config.retry_base_delay,
                self.config.retry_max_delay,
                attempt,
            );
            thread::sleep(delay);
            attempt += 1;
        }
    }

    fn transport(&self) -> Result<&Arc<dyn BlockingHttp>> {
        self.transport.as_ref().ok_or(StreamError::Closed)
    }

    fn fetch_chunk(&mut self, index: u64) -> Result<Arc<[u8]>> {
        if let Some(chunk) = self.chunks.get(&index).cloned() {
            log::trace!("chunk {} served from cache", index);
            return Ok(chunk);
        }

        let url = self.url.clone().ok_or(StreamError::NotConfigured)?;
        let transport = Arc::clone(self.transport()?);
        let start = index * self.config.chunk_size;
        let end = start + self.config.chunk_size - 1;

        log::debug!("fetching bytes {}-{} of {}", start, end, url);
        let response: HttpResponse = self.with_retry("range request", || {
            transport.get_range(&url, &self.headers, start, end)
        })?;

        if self.size.is_none() {
            self.size = response.total_length();
        }

        let data: Arc<[u8]> = response.data.into();
        self.chunks.put(index, Arc::clone(&data));
        Ok(data)
    }
}

impl Default for HttpBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for HttpBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Http
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::READ | Capabilities::SEEK
    }

    fn open(&mut self) -> Result<()> {
        let url = self.url.clone().ok_or(StreamError::NotConfigured)?;

        let transport = match &self.transport {
            Some(transport) if !self.transport_stale => Arc::clone(transport),
            _ => {
                let transport = build_default_transport(&self.config)?;
                self.transport = Some(Arc::clone(&transport));
                self.transport_stale = false;
                transport
            }
        };

        self.size = self.with_retry("HEAD request", || {
            transport.get_content_length(&url, &self.headers)
        })?;
        self.offset = 0;
        self.chunks.clear();
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) {
        if self.opened {
            self.chunks.clear();
            self.opened = false;
        }
    }

    fn raw_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.opened {
            return Err(StreamError::Closed);
        }
        if self.size.is_some_and(|size| self.offset >= size) {
            return Err(StreamError::EndOfStream);
        }

        let index = self.offset / self.config.chunk_size;
        let chunk = self.fetch_chunk(index)?;
        let within = (self.offset - index * self.config.chunk_size) as usize;

        if within >= chunk.len() {
            // a short range means the resource ends inside this chunk
            if self.size.is_none() {
                self.size = Some(index * self.config.chunk_size + chunk.len() as u64);
            }
            return Err(StreamError::EndOfStream);
        }

        let n = buf.len().min(chunk.len() - within);
        buf[..n].copy_from_slice(&chunk[within..within + n]);
        self.offset += n as u64;
        Ok(n)
    }

    fn size(&self) -> Option<u64> {
        if self.opened { self.size } else { None }
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        if !self.opened {
            return Err(StreamError::Closed);
        }
        if self.size.is_some_and(|size| offset > size) {
            return Err(StreamError::SeekOutOfRange);
        }
        self.offset = offset;
        Ok(())
    }

    fn ioctl0(&mut self, cmd: Command) -> bool {
        if cmd == Command::HTTP_CLEAR_HEADERS {
            self.headers.clear();
            return true;
        }
        false
    }

    fn ioctl1(&mut self, cmd: Command, arg: Arg<'_>) -> bool {
        match cmd {
            Command::SET_URL => match arg.as_str() {
                Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                    self.url = Some(Arc::from(url));
                    self.chunks.clear();
                    self.size = None;
                    true
                }
                _ => false,
            },
            Command::SET_TIMEOUT => match arg.as_int() {
                Some(ms) => {
                    self.config.read_timeout = Duration::from_millis(ms);
                    if !self.custom_transport {
                        // the live transport keeps serving reads; the next open rebuilds it
                        self.transport_stale = true;
                    }
                    true
                }
                None => false,
            },
            Command::HTTP_SET_CHUNK_SIZE => match arg.as_int() {
                Some(size) if size > 0 => {
                    self.config.chunk_size = size;
                    self.chunks.clear();
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }

    fn ioctl2(&mut self, cmd: Command, arg1: Arg<'_>, arg2: Arg<'_>) -> bool {
        if cmd != Command::HTTP_SET_HEADER {
            return false;
        }
        let (Some(name), Some(value)) = (arg1.as_str(), arg2.as_str()) else {
            return false;
        };

        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
        true
    }
}

pub struct HttpBackendBuilder {
    config: HttpConfig,
    transport: Option<Arc<dyn BlockingHttp>>,
}

impl Default for HttpBackendBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpBackendBuilder {
    pub fn new() -> Self {
        Self {
            config: HttpConfig::default(),
            transport: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn BlockingHttp>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.config.chunk_size = chunk_size.max(1);
        self
    }

    pub fn cache_chunks(mut self, entries: usize) -> Self {
        self.config.cache_chunks = entries;
        self
    }

    pub fn retry_max_attempts(mut self, attempts: usize) -> Self {
        self.config.retry_max_attempts = attempts;
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry_base_delay = delay;
        self
    }

    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.config.retry_max_delay = delay;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> HttpBackend {
        HttpBackend {
            url: None,
            chunks: LruCache::new(chunk_capacity(self.config.cache_chunks)),
            config: self.config,
            custom_transport: self.transport.is_some(),
            transport_stale: false,
            transport: self.transport,
            headers: Vec::new(),
            size: None,
            offset: 0,
            opened: false,
        }
    }
}
