//! Request and response frames.
//!
//! The reader side is split into the same steps the aggregator's dispatcher
//! walks through (request line, headers, body) so the caller decides when to
//! stop parsing. The writer side renders a complete response, always with
//! the `Lamport-Clock`, `Content-Length` and `Connection: close` headers.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Header carrying the sender's Lamport counter.
pub const CLOCK_HEADER: &str = "Lamport-Clock";

/// Header carrying the body length in bytes.
pub const CONTENT_LENGTH_HEADER: &str = "Content-Length";

const HTTP_VERSION: &str = "HTTP/1.1";

/// Request method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// Read the merged state
    Get,
    /// Merge a reading into the state
    Put,
    /// Anything else, kept verbatim for logging
    Other(String),
}

impl Method {
    /// Classify a method token. Matching is exact, as in HTTP.
    #[must_use]
    pub fn parse(token: &str) -> Self {
        match token {
            "GET" => Method::Get,
            "PUT" => Method::Put,
            other => Method::Other(other.to_string()),
        }
    }

    /// The method token as it appears on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Other(token) => token,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First line of a request: `<METHOD> <target> HTTP/1.1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    /// Request method
    pub method: Method,
    /// Request target (path), `/` when omitted
    pub target: String,
}

impl RequestLine {
    /// Parse a request line. Returns `None` for an empty or blank line.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let method = Method::parse(parts.next()?);
        let target = parts.next().unwrap_or("/").to_string();
        Some(Self { method, target })
    }
}

/// Ordered header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Create an empty header list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`, compared case-insensitively.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Number of header lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over headers in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Declared body length, if any.
    ///
    /// # Errors
    ///
    /// Returns error if the header is present but not a non-negative integer.
    pub fn content_length(&self) -> Result<Option<usize>, FrameError> {
        self.get(CONTENT_LENGTH_HEADER)
            .map(|raw| {
                raw.trim()
                    .parse::<usize>()
                    .map_err(|_| FrameError::InvalidContentLength(raw.to_string()))
            })
            .transpose()
    }

    /// Peer's Lamport counter. Missing or malformed values read as `None`.
    #[must_use]
    pub fn clock(&self) -> Option<u64> {
        self.get(CLOCK_HEADER)
            .and_then(|raw| raw.trim().parse::<u64>().ok())
    }
}

/// A fully read request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Parsed request line
    pub line: RequestLine,
    /// Header lines
    pub headers: Headers,
    /// Body bytes; `None` when absent or zero-length
    pub body: Option<Vec<u8>>,
}

/// Response status codes used by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// 200
    Ok,
    /// 201
    Created,
    /// 204
    NoContent,
    /// 400
    BadRequest,
    /// 413
    PayloadTooLarge,
    /// 500
    InternalServerError,
}

impl Status {
    /// Numeric status code.
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::Created => 201,
            Status::NoContent => 204,
            Status::BadRequest => 400,
            Status::PayloadTooLarge => 413,
            Status::InternalServerError => 500,
        }
    }

    /// Reason phrase.
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Created => "Created",
            Status::NoContent => "No Content",
            Status::BadRequest => "Bad Request",
            Status::PayloadTooLarge => "Payload Too Large",
            Status::InternalServerError => "Internal Server Error",
        }
    }

    /// Map a numeric code back to a status.
    #[must_use]
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            200 => Some(Status::Ok),
            201 => Some(Status::Created),
            204 => Some(Status::NoContent),
            400 => Some(Status::BadRequest),
            413 => Some(Status::PayloadTooLarge),
            500 => Some(Status::InternalServerError),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

/// A response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status line
    pub status: Status,
    /// Header lines
    pub headers: Headers,
    /// Body bytes
    pub body: Vec<u8>,
}

impl Response {
    /// Build a response stamped with the responder's clock value.
    #[must_use]
    pub fn new(status: Status, clock: u64, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        let mut headers = Headers::new();
        headers.insert(CLOCK_HEADER, clock.to_string());
        headers.insert(CONTENT_LENGTH_HEADER, body.len().to_string());
        headers.insert("Connection", "close");
        Self {
            status,
            headers,
            body,
        }
    }

    /// Lamport counter carried by this response.
    #[must_use]
    pub fn clock(&self) -> Option<u64> {
        self.headers.clock()
    }

    /// Body as text, replacing invalid UTF-8.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Render the frame to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("{HTTP_VERSION} {}\r\n", self.status);
        for (name, value) in self.headers.iter() {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }

    /// Write the frame and flush.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying writer fails.
    pub async fn write_to<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.to_bytes()).await?;
        writer.flush().await
    }

    /// Parse a complete response frame.
    ///
    /// # Errors
    ///
    /// Returns error if the status line or headers are malformed, or the body
    /// is shorter than the declared `Content-Length`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let split = find_head_end(bytes).ok_or(FrameError::UnterminatedHead)?;
        let head = std::str::from_utf8(&bytes[..split.head_len]).map_err(|_| FrameError::InvalidUtf8)?;
        let rest = &bytes[split.body_start..];

        let mut lines = head.lines();
        let status_line = lines.next().unwrap_or_default();
        let code = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|c| c.parse::<u16>().ok())
            .ok_or_else(|| FrameError::MalformedStatusLine(status_line.to_string()))?;
        let status = Status::from_code(code).ok_or(FrameError::UnknownStatus(code))?;

        let mut headers = Headers::new();
        for line in lines {
            let (name, value) = parse_header_line(line)?;
            headers.insert(name, value);
        }

        let body = match headers.content_length()? {
            Some(len) if rest.len() < len => {
                return Err(FrameError::TruncatedBody {
                    expected: len,
                    actual: rest.len(),
                })
            }
            Some(len) => rest[..len].to_vec(),
            None => rest.to_vec(),
        };

        Ok(Self {
            status,
            headers,
            body,
        })
    }
}

struct HeadSplit {
    head_len: usize,
    body_start: usize,
}

fn find_head_end(bytes: &[u8]) -> Option<HeadSplit> {
    if let Some(pos) = bytes.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some(HeadSplit {
            head_len: pos,
            body_start: pos + 4,
        });
    }
    bytes
        .windows(2)
        .position(|w| w == b"\n\n")
        .map(|pos| HeadSplit {
            head_len: pos,
            body_start: pos + 2,
        })
}

fn parse_header_line(line: &str) -> Result<(String, String), FrameError> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| FrameError::MalformedHeader(line.to_string()))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(FrameError::MalformedHeader(line.to_string()));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Limits applied while reading a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Longest accepted line, in bytes, including the terminator
    pub max_line_bytes: usize,
    /// Most header lines accepted
    pub max_headers: usize,
    /// Largest accepted body
    pub max_body_bytes: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_line_bytes: 8 * 1024,
            max_headers: 100,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Incremental request reader over a buffered byte stream.
pub struct FrameReader<R> {
    inner: R,
    limits: FrameLimits,
}

impl<R> FrameReader<R>
where
    R: AsyncBufRead + Unpin,
{
    /// Wrap a buffered reader.
    pub fn new(inner: R, limits: FrameLimits) -> Self {
        Self { inner, limits }
    }

    /// Give back the reader, including anything still buffered.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read the request line.
    ///
    /// Returns `Ok(None)` when the peer sent an empty line or closed the
    /// connection before sending anything.
    ///
    /// # Errors
    ///
    /// Returns error on I/O failure, an over-long line or invalid UTF-8.
    pub async fn read_request_line(&mut self) -> Result<Option<RequestLine>, FrameError> {
        let line = self.read_line().await?;
        Ok(line.as_deref().and_then(RequestLine::parse))
    }

    /// Read header lines up to the blank separator line.
    ///
    /// A peer that closes its side before the blank line ends the headers.
    ///
    /// # Errors
    ///
    /// Returns error on I/O failure or malformed header lines.
    pub async fn read_headers(&mut self) -> Result<Headers, FrameError> {
        let mut headers = Headers::new();
        while let Some(line) = self.read_line().await? {
            if line.is_empty() {
                break;
            }
            if headers.len() >= self.limits.max_headers {
                return Err(FrameError::TooManyHeaders(self.limits.max_headers));
            }
            let (name, value) = parse_header_line(&line)?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    /// Read exactly `len` body bytes.
    ///
    /// # Errors
    ///
    /// Returns error if `len` exceeds the body limit or the peer closes the
    /// connection early.
    pub async fn read_body(&mut self, len: usize) -> Result<Vec<u8>, FrameError> {
        if len > self.limits.max_body_bytes {
            return Err(FrameError::BodyTooLarge {
                limit: self.limits.max_body_bytes,
                declared: len,
            });
        }

        let mut body = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self.inner.read(&mut body[filled..]).await?;
            if n == 0 {
                return Err(FrameError::TruncatedBody {
                    expected: len,
                    actual: filled,
                });
            }
            filled += n;
        }
        Ok(body)
    }

    /// Read one line without its terminator. `None` at end of stream.
    async fn read_line(&mut self) -> Result<Option<String>, FrameError> {
        let mut buf = Vec::new();
        let limit = u64::try_from(self.limits.max_line_bytes).unwrap_or(u64::MAX);
        let n = (&mut self.inner)
            .take(limit)
            .read_until(b'\n', &mut buf)
            .await?;

        if n == 0 {
            return Ok(None);
        }
        if buf.last() != Some(&b'\n') && n >= self.limits.max_line_bytes {
            return Err(FrameError::LineTooLong(self.limits.max_line_bytes));
        }

        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        String::from_utf8(buf)
            .map(Some)
            .map_err(|_| FrameError::InvalidUtf8)
    }
}

/// Errors raised while reading or parsing frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Underlying stream failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Line exceeded the configured limit
    #[error("line longer than {0} bytes")]
    LineTooLong(usize),
    /// Frame text was not UTF-8
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
    /// Header line without a `:` separator or with an empty name
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
    /// Too many header lines
    #[error("more than {0} header lines")]
    TooManyHeaders(usize),
    /// `Content-Length` was not a non-negative integer
    #[error("invalid Content-Length: {0:?}")]
    InvalidContentLength(String),
    /// Declared body exceeds the configured limit
    #[error("body of {declared} bytes exceeds limit of {limit}")]
    BodyTooLarge {
        /// Configured limit
        limit: usize,
        /// Declared length
        declared: usize,
    },
    /// Peer closed before sending the whole body
    #[error("body truncated: expected {expected} bytes, got {actual}")]
    TruncatedBody {
        /// Declared length
        expected: usize,
        /// Bytes received
        actual: usize,
    },
    /// Response head had no blank-line terminator
    #[error("frame head is not terminated by a blank line")]
    UnterminatedHead,
    /// Response status line could not be parsed
    #[error("malformed status line: {0:?}")]
    MalformedStatusLine(String),
    /// Response status code is not one this protocol uses
    #[error("unknown status code {0}")]
    UnknownStatus(u16),
}

impl FrameError {
    /// Status to answer with, or `None` when the connection is beyond
    /// saving and should just be dropped.
    #[must_use]
    pub fn status(&self) -> Option<Status> {
        match self {
            FrameError::Io(_) | FrameError::TruncatedBody { .. } => None,
            FrameError::BodyTooLarge { .. } => Some(Status::PayloadTooLarge),
            FrameError::LineTooLong(_)
            | FrameError::InvalidUtf8
            | FrameError::MalformedHeader(_)
            | FrameError::TooManyHeaders(_)
            | FrameError::InvalidContentLength(_)
            | FrameError::UnterminatedHead
            | FrameError::MalformedStatusLine(_)
            | FrameError::UnknownStatus(_) => Some(Status::BadRequest),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(bytes: &[u8]) -> FrameReader<&[u8]> {
        FrameReader::new(bytes, FrameLimits::default())
    }

    #[tokio::test]
    async fn reads_put_request_in_steps() {
        let raw = b"PUT /data HTTP/1.1\r\nHost: localhost\r\ncontent-length: 13\r\nLamport-Clock: 7\r\n\r\n{\"temp\":\"20\"}";
        let mut frames = reader(raw);

        let line = frames.read_request_line().await.unwrap().unwrap();
        assert_eq!(line.method, Method::Put);
        assert_eq!(line.target, "/data");

        let headers = frames.read_headers().await.unwrap();
        assert_eq!(headers.get("Host"), Some("localhost"));
        assert_eq!(headers.content_length().unwrap(), Some(13));
        assert_eq!(headers.clock(), Some(7));

        let body = frames.read_body(13).await.unwrap();
        assert_eq!(body, b"{\"temp\":\"20\"}");
    }

    #[tokio::test]
    async fn empty_request_line_reads_as_none() {
        assert!(reader(b"\r\n").read_request_line().await.unwrap().is_none());
        assert!(reader(b"").read_request_line().await.unwrap().is_none());
        assert!(reader(b"   \r\n").read_request_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bare_newlines_are_accepted() {
        let mut frames = reader(b"GET / HTTP/1.1\nLamport-Clock: 3\n\n");

        let line = frames.read_request_line().await.unwrap().unwrap();
        assert_eq!(line.method, Method::Get);
        assert_eq!(frames.read_headers().await.unwrap().clock(), Some(3));
    }

    #[tokio::test]
    async fn unknown_method_is_kept() {
        let line = reader(b"DELETE /data HTTP/1.1\r\n")
            .read_request_line()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.method, Method::Other("DELETE".to_string()));
        assert_eq!(line.method.to_string(), "DELETE");
    }

    #[tokio::test]
    async fn malformed_header_is_bad_request() {
        let mut frames = reader(b"no separator here\r\n\r\n");
        let err = frames.read_headers().await.unwrap_err();
        assert!(matches!(err, FrameError::MalformedHeader(_)));
        assert_eq!(err.status(), Some(Status::BadRequest));
    }

    #[tokio::test]
    async fn oversized_body_is_rejected_before_reading() {
        let limits = FrameLimits {
            max_body_bytes: 4,
            ..FrameLimits::default()
        };
        let mut frames = FrameReader::new(&b"0123456789"[..], limits);
        let err = frames.read_body(10).await.unwrap_err();
        assert_eq!(err.status(), Some(Status::PayloadTooLarge));
    }

    #[tokio::test]
    async fn truncated_body_drops_connection() {
        let err = reader(b"abc").read_body(10).await.unwrap_err();
        assert!(matches!(
            err,
            FrameError::TruncatedBody {
                expected: 10,
                actual: 3
            }
        ));
        assert_eq!(err.status(), None);
    }

    #[tokio::test]
    async fn over_long_line_is_rejected() {
        let limits = FrameLimits {
            max_line_bytes: 8,
            ..FrameLimits::default()
        };
        let mut frames = FrameReader::new(&b"GET /a/very/long/path HTTP/1.1\r\n"[..], limits);
        let err = frames.read_request_line().await.unwrap_err();
        assert!(matches!(err, FrameError::LineTooLong(8)));
    }

    #[test]
    fn invalid_content_length() {
        let mut headers = Headers::new();
        headers.insert("Content-Length", "ten");
        assert!(matches!(
            headers.content_length(),
            Err(FrameError::InvalidContentLength(_))
        ));
    }

    #[test]
    fn malformed_clock_is_ignored() {
        let mut headers = Headers::new();
        headers.insert("Lamport-Clock", "-1");
        assert_eq!(headers.clock(), None);
    }

    #[tokio::test]
    async fn response_renders_required_headers() {
        let response = Response::new(Status::Created, 4, "Data successfully updated");
        let mut out = Vec::new();
        response.write_to(&mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 201 Created\r\n"));
        assert!(text.contains("Lamport-Clock: 4\r\n"));
        assert!(text.contains("Content-Length: 25\r\n"));
        assert!(text.ends_with("\r\n\r\nData successfully updated"));
    }

    #[test]
    fn content_length_counts_bytes_not_chars() {
        let response = Response::new(Status::Ok, 1, "{\"t\":\"20°\"}");
        assert_eq!(
            response.headers.content_length().unwrap(),
            Some(response.body.len())
        );
        assert_eq!(response.body.len(), 12);
    }

    #[test]
    fn parse_rendered_response() {
        let original = Response::new(Status::Ok, 12, "{\"temp\":\"21\"}");
        let parsed = Response::from_bytes(&original.to_bytes()).unwrap();

        assert_eq!(parsed.status, Status::Ok);
        assert_eq!(parsed.clock(), Some(12));
        assert_eq!(parsed.body_text(), "{\"temp\":\"21\"}");
    }

    #[test]
    fn parse_rejects_unknown_status() {
        let err = Response::from_bytes(b"HTTP/1.1 418 I'm a teapot\r\n\r\n").unwrap_err();
        assert!(matches!(err, FrameError::UnknownStatus(418)));
    }
}
