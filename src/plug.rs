use crate::core::{Result, StreamError};
use crate::http::HttpConfig;
use std::sync::Arc;

#[cfg(all(not(feature = "reqwest"), feature = "curl"))]
use ahash::{HashMap, HashMapExt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub data: Vec<u8>,
    pub status: u16,
    pub content_length: Option<u64>,
    /// `(first, last, complete length)` from a `Content-Range` header.
    pub content_range: Option<(u64, u64, Option<u64>)>,
}

impl HttpResponse {
    pub fn new(
        data: Vec<u8>,
        status: u16,
        content_length: Option<u64>,
        content_range: Option<(u64, u64, Option<u64>)>,
    ) -> Self {
        Self {
            data,
            status,
            content_length,
            content_range,
        }
    }

    /// Complete resource length advertised by a ranged response.
    pub fn total_length(&self) -> Option<u64> {
        self.content_range.and_then(|(_, _, total)| total)
    }
}

/// A single request the transport is asked to perform.
#[derive(Debug, Clone, Copy)]
pub struct HttpRequest<'a> {
    pub url: &'a str,
    pub headers: &'a [(String, String)],
    /// Inclusive byte range.
    pub range: Option<(u64, u64)>,
    pub head_only: bool,
}

/// Blocking HTTP transport used by the HTTP backend.
pub trait BlockingHttp: Send + Sync {
    fn execute(&self, request: &HttpRequest<'_>) -> Result<HttpResponse>;

    fn get_content_length(&self, url: &str, headers: &[(String, String)]) -> Result<Option<u64>> {
        let response = self.execute(&HttpRequest {
            url,
            headers,
            range: None,
            head_only: true,
        })?;

        if (200..300).contains(&response.status) {
            return Ok(response.content_length);
        }
        Ok(None)
    }

    fn get_range(
        &self,
        url: &str,
        headers: &[(String, String)],
        start: u64,
        end: u64,
    ) -> Result<HttpResponse> {
        let response = self.execute(&HttpRequest {
            url,
            headers,
            range: Some((start, end)),
            head_only: false,
        })?;
        check_range_response(start, response)
    }
}

/// Enforce strict Range semantics on a response to `bytes=start-...`.
pub fn check_range_response(start: u64, response: HttpResponse) -> Result<HttpResponse> {
    if response.status == 416 {
        return Ok(HttpResponse {
            data: Vec::new(),
            ..response
        });
    }

    if response.status == 200 {
        return Err(StreamError::Protocol(
            "Server does not support Range requests (returned 200 instead of 206)".into(),
        ));
    }

    if response.status != 206 {
        return Err(StreamError::Network(format!(
            "HTTP error: {}",
            response.status
        )));
    }

    if let Some((resp_start, _, _)) = response.content_range
        && resp_start != start
    {
        return Err(StreamError::Protocol(
            "Server returned incorrect range start".into(),
        ));
    }

    Ok(response)
}

/// Parse `bytes first-last/total`, where total may be `*`.
pub fn parse_content_range(header: &str) -> Option<(u64, u64, Option<u64>)> {
    let (unit, spec) = header.trim().split_once(' ')?;
    if unit != "bytes" {
        return None;
    }

    let (range, total) = spec.trim().split_once('/')?;
    let (first, last) = range.split_once('-')?;
    let first = first.parse::<u64>().ok()?;
    let last = last.parse::<u64>().ok()?;
    let total = total.parse::<u64>().ok();

    Some((first, last, total))
}

#[cfg(all(not(feature = "reqwest"), not(feature = "curl")))]
compile_error!("Enable either `curl` (default) or `reqwest` feature.");

pub(crate) fn build_default_transport(config: &HttpConfig) -> Result<Arc<dyn BlockingHttp>> {
    #[cfg(feature = "reqwest")]
    {
        Ok(Arc::new(ReqwestBlockingTransport::new(config)?))
    }
    #[cfg(all(not(feature = "reqwest"), feature = "curl"))]
    {
        Ok(Arc::new(CurlBlockingTransport::new(config)))
    }
}

#[cfg(feature = "reqwest")]
struct ReqwestBlockingTransport {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "reqwest")]
impl ReqwestBlockingTransport {
    fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.read_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| StreamError::Network(e.to_string()))?;

        Ok(Self { client })
    }
}

#[cfg(feature = "reqwest")]
impl BlockingHttp for ReqwestBlockingTransport {
    fn execute(&self, request: &HttpRequest<'_>) -> Result<HttpResponse> {
        let mut builder = if request.head_only {
            self.client.head(request.url)
        } else {
            self.client.get(request.url)
        };

        for (name, value) in request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some((start, end)) = request.range {
            builder = builder.header("Range", format!("bytes={start}-{end}"));
        }

        let response = builder
            .send()
            .map_err(|e| StreamError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let content_length = response.content_length();
        let content_range = response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range);

        let data = if request.head_only {
            Vec::new()
        } else {
            response
                .bytes()
                .map_err(|e| StreamError::Network(e.to_string()))?
                .to_vec()
        };

        Ok(HttpResponse::new(data, status, content_length, content_range))
    }
}

#[cfg(all(not(feature = "reqwest"), feature = "curl"))]
struct CurlBlockingTransport {
    connect_timeout: std::time::Duration,
    read_timeout: std::time::Duration,
    user_agent: String,
}

#[cfg(all(not(feature = "reqwest"), feature = "curl"))]
impl CurlBlockingTransport {
    fn new(config: &HttpConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
            user_agent: config.user_agent.clone(),
        }
    }
}

#[cfg(all(not(feature = "reqwest"), feature = "curl"))]
fn curl_err(e: curl::Error) -> StreamError {
    StreamError::Network(e.to_string())
}

#[cfg(all(not(feature = "reqwest"), feature = "curl"))]
impl BlockingHttp for CurlBlockingTransport {
    fn execute(&self, request: &HttpRequest<'_>) -> Result<HttpResponse> {
        let mut easy = curl::easy::Easy::new();
        easy.url(request.url).map_err(curl_err)?;
        easy.connect_timeout(self.connect_timeout).map_err(curl_err)?;
        easy.timeout(self.read_timeout).map_err(curl_err)?;
        easy.follow_location(true).map_err(curl_err)?;
        easy.useragent(&self.user_agent).map_err(curl_err)?;

        if request.head_only {
            easy.nobody(true).map_err(curl_err)?;
        }

        if let Some((start, end)) = request.range {
            easy.range(&format!("{start}-{end}")).map_err(curl_err)?;
        }

        if !request.headers.is_empty() {
            let mut list = curl::easy::List::new();
            for (name, value) in request.headers {
                list.append(&format!("{name}: {value}")).map_err(curl_err)?;
            }
            easy.http_headers(list).map_err(curl_err)?;
        }

        let mut data = Vec::new();
        let mut headers = HashMap::<String, String>::new();

        {
            let mut transfer = easy.transfer();
            transfer
                .write_function(|chunk| {
                    data.extend_from_slice(chunk);
                    Ok(chunk.len())
                })
                .map_err(curl_err)?;

            transfer
                .header_function(|header| {
                    if let Ok(line) = std::str::from_utf8(header) {
                        let line = line.trim();
                        if let Some((name, value)) = line.split_once(':') {
                            headers.insert(name.trim().to_ascii_lowercase(), value.trim().into());
                        }
                    }
                    true
                })
                .map_err(curl_err)?;

            transfer.perform().map_err(curl_err)?;
        }

        let status = easy.response_code().map_err(curl_err)? as u16;
        let content_length = headers
            .get("content-length")
            .and_then(|v| v.parse::<u64>().ok());
        let content_range = headers
            .get("content-range")
            .and_then(|value| parse_content_range(value));

        Ok(HttpResponse::new(data, status, content_length, content_range))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, range: Option<(u64, u64, Option<u64>)>) -> HttpResponse {
        HttpResponse::new(vec![1, 2, 3], status, Some(3), range)
    }

    #[test]
    fn content_range_parsing() {
        assert_eq!(
            parse_content_range("bytes 0-99/1234"),
            Some((0, 99, Some(1234)))
        );
        assert_eq!(parse_content_range("bytes 10-19/*"), Some((10, 19, None)));
        assert_eq!(parse_content_range("items 0-1/2"), None);
        assert_eq!(parse_content_range("bytes nonsense"), None);
    }

    #[test]
    fn range_responses_are_checked() {
        assert!(check_range_response(0, response(206, Some((0, 2, Some(3))))).is_ok());
        assert!(matches!(
            check_range_response(0, response(200, None)),
            Err(StreamError::Protocol(_))
        ));
        assert!(matches!(
            check_range_response(5, response(206, Some((0, 2, None)))),
            Err(StreamError::Protocol(_))
        ));
        assert!(matches!(
            check_range_response(0, response(503, None)),
            Err(StreamError::Network(_))
        ));

        let unsatisfiable = check_range_response(100, response(416, None)).unwrap();
        assert!(unsatisfiable.data.is_empty());
    }
}
