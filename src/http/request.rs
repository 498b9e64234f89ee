//! HTTP/1.1 request parsing using the [`httparse`] crate.

use std::collections::HashMap;

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("request exceeds maximum allowed size of {max_bytes} bytes")]
    TooLarge { max_bytes: usize },

    #[error("invalid Content-Length: {value:?}")]
    InvalidContentLength { value: String },

    #[error("conflicting Content-Length values")]
    ConflictingContentLength,

    #[error("unsupported Transfer-Encoding: {value:?}")]
    UnsupportedTransferEncoding { value: String },
}

/// An HTTP request as seen by every stage of the chain.
///
/// The request target is kept twice: [`uri`](Self::uri) is the exact string
/// from the request line (path plus `?query`), which is what the response cache
/// keys on, while [`path`](Self::path) has the query stripped and is what the
/// router matches against.
///
/// # Examples
///
/// ```
/// use rttp_chain::http::Request;
///
/// let raw = b"GET /hello?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.uri(), "/hello?name=world");
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_param("name"), Some("world"));
/// assert_eq!(request.headers().get("host"), Some("localhost"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    uri: String,
    path: String,
    query: Option<String>,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    body: Bytes,
    params: HashMap<String, String>,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Builds an HTTP/1.1 request with no headers and an empty body.
    ///
    /// Used by handlers that synthesize requests and by tests; the server goes
    /// through [`Request::parse`].
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let (path, query) = split_target(&uri);
        let params = query.as_deref().map(parse_query_string).unwrap_or_default();
        Self {
            method,
            path,
            query,
            uri,
            version: 1,
            headers: Headers::new(),
            body: Bytes::new(),
            params,
        }
    }

    /// Shorthand for `Request::new(Method::Get, uri)`.
    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::Get, uri)
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Parse a raw HTTP/1.1 request from a byte slice.
    ///
    /// Returns the parsed `Request` and the byte offset at which the body begins
    /// in `buf`. The body is the `Content-Length` bytes after the header block, or
    /// as many of them as `buf` holds.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] — more data is needed to complete the request headers.
    /// - [`RequestError::Parse`] — the data is malformed and cannot be parsed.
    /// - [`RequestError::MissingField`] — a required field (method, path, version) is absent.
    /// - Any error from [`content_length`](Self::content_length).
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let (mut request, body_offset) = Self::parse_head(buf)?;
        let body_len = request.content_length()?.unwrap_or(0);
        let end = buf.len().min(body_offset.saturating_add(body_len));
        request.body = Bytes::copy_from_slice(&buf[body_offset..end]);
        Ok((request, body_offset))
    }

    /// Parse only the request line and headers; the body is left empty.
    ///
    /// The server uses this while a body is still arriving, so buffered body bytes
    /// are not copied on every read.
    pub(crate) fn parse_head(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let Some(raw_method) = raw_req.method else {
            return Err(RequestError::MissingField { field: "method" });
        };
        let Ok(method) = raw_method.parse::<Method>();

        let uri = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?
            .to_owned();

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let mut request = Self::new(method, uri);
        request.version = version;
        request.headers = header_map;

        Ok((request, body_offset))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request target exactly as received, query string included.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The request path, without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    pub(crate) fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    /// The declared body length, or `None` when no `Content-Length` is present.
    ///
    /// Only chunk-free, length-delimited bodies are supported, so any
    /// `Transfer-Encoding` is rejected rather than guessed at.
    ///
    /// # Errors
    ///
    /// - [`RequestError::UnsupportedTransferEncoding`] — a `Transfer-Encoding` header is present.
    /// - [`RequestError::InvalidContentLength`] — a value is not a plain decimal number.
    /// - [`RequestError::ConflictingContentLength`] — repeated values disagree.
    pub fn content_length(&self) -> Result<Option<usize>, RequestError> {
        if let Some(value) = self.headers.get("transfer-encoding") {
            return Err(RequestError::UnsupportedTransferEncoding {
                value: value.to_owned(),
            });
        }

        let mut declared = None;
        for raw in self.headers.get_all("content-length") {
            // A single header may also carry a comma-separated list (RFC 9110 §8.6).
            for value in raw.split(',') {
                let value = value.trim();
                let len = parse_decimal(value).ok_or_else(|| RequestError::InvalidContentLength {
                    value: value.to_owned(),
                })?;
                match declared {
                    Some(prev) if prev != len => return Err(RequestError::ConflictingContentLength),
                    _ => declared = Some(len),
                }
            }
        }
        Ok(declared)
    }
}

// Digits only: no sign, no whitespace, no empty string.
fn parse_decimal(value: &str) -> Option<usize> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

// Split a request target into path and optional query at the first `?`.
fn split_target(target: &str) -> (String, Option<String>) {
    match target.split_once('?') {
        Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
        None => (target.to_owned(), None),
    }
}

/// Parses `key=value&key2=value2`; `+` decodes to a space, no percent-decoding.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key.replace('+', " "), value.replace('+', " "))
        })
        .collect()
}
