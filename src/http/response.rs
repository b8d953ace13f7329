use std::fmt;
use std::io::{self, Read};
use std::path::Path;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWrite};

use crate::http::headers::Headers;

/// HTTP status codes.
///
/// The codes the server emits itself have a named variant; handlers can send
/// anything else through [`StatusCode::Custom`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 100 Continue
    Continue,
    /// 200 OK
    Ok,
    /// 201 Created
    Created,
    /// 204 No Content
    NoContent,
    /// 301 Moved Permanently
    MovedPermanently,
    /// 304 Not Modified
    NotModified,
    /// 400 Bad Request
    BadRequest,
    /// 403 Forbidden
    Forbidden,
    /// 404 Not Found
    NotFound,
    /// 405 Method Not Allowed
    MethodNotAllowed,
    /// 408 Request Timeout
    RequestTimeout,
    /// 413 Content Too Large
    ContentTooLarge,
    /// 500 Internal Server Error
    InternalServerError,
    /// 501 Not Implemented
    NotImplemented,
    /// 503 Service Unavailable
    ServiceUnavailable,
    /// 505 HTTP Version Not Supported
    HttpVersionNotSupported,
    /// Any other code with its reason phrase.
    Custom(u16, &'static str),
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use hppt::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::Custom(418, "I'm a teapot").as_u16(), 418);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Continue => 100,
            StatusCode::Ok => 200,
            StatusCode::Created => 201,
            StatusCode::NoContent => 204,
            StatusCode::MovedPermanently => 301,
            StatusCode::NotModified => 304,
            StatusCode::BadRequest => 400,
            StatusCode::Forbidden => 403,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::RequestTimeout => 408,
            StatusCode::ContentTooLarge => 413,
            StatusCode::InternalServerError => 500,
            StatusCode::NotImplemented => 501,
            StatusCode::ServiceUnavailable => 503,
            StatusCode::HttpVersionNotSupported => 505,
            StatusCode::Custom(code, _) => *code,
        }
    }

    /// Returns the reason phrase sent on the status line.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Continue => "Continue",
            StatusCode::Ok => "OK",
            StatusCode::Created => "Created",
            StatusCode::NoContent => "No Content",
            StatusCode::MovedPermanently => "Moved Permanently",
            StatusCode::NotModified => "Not Modified",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::RequestTimeout => "Request Timeout",
            StatusCode::ContentTooLarge => "Content Too Large",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::NotImplemented => "Not Implemented",
            StatusCode::ServiceUnavailable => "Service Unavailable",
            StatusCode::HttpVersionNotSupported => "HTTP Version Not Supported",
            StatusCode::Custom(_, reason) => reason,
        }
    }

    /// Looks up a named status code.
    pub fn from_u16(code: u16) -> Option<Self> {
        let status = match code {
            100 => StatusCode::Continue,
            200 => StatusCode::Ok,
            201 => StatusCode::Created,
            204 => StatusCode::NoContent,
            301 => StatusCode::MovedPermanently,
            304 => StatusCode::NotModified,
            400 => StatusCode::BadRequest,
            403 => StatusCode::Forbidden,
            404 => StatusCode::NotFound,
            405 => StatusCode::MethodNotAllowed,
            408 => StatusCode::RequestTimeout,
            413 => StatusCode::ContentTooLarge,
            500 => StatusCode::InternalServerError,
            501 => StatusCode::NotImplemented,
            503 => StatusCode::ServiceUnavailable,
            505 => StatusCode::HttpVersionNotSupported,
            _ => return None,
        };
        Some(status)
    }

    /// 1xx, 204 and 304 responses never carry a body.
    pub fn allows_body(&self) -> bool {
        let code = self.as_u16();
        !(100..200).contains(&code) && code != 204 && code != 304
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.reason_phrase())
    }
}

/// Body produced lazily, one chunk at a time, with no length known upfront.
pub struct BodyStream(Box<dyn Iterator<Item = Bytes> + Send>);

impl BodyStream {
    pub fn new<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
        I::IntoIter: Send + 'static,
    {
        Self(Box::new(chunks.into_iter()))
    }
}

impl Iterator for BodyStream {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.0.next()
    }
}

impl fmt::Debug for BodyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BodyStream(..)")
    }
}

const FILE_CHUNK: u64 = 64 * 1024;

/// An open file sent as the body, its length fixed when it was opened.
#[derive(Debug)]
pub struct FileBody {
    file: std::fs::File,
    len: u64,
    remaining: u64,
}

impl FileBody {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        Ok(Self {
            file: file.into_std().await,
            len,
            remaining: len,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies what is left of the file to `stream`. A file that shrank
    /// since it was opened is an `UnexpectedEof` error.
    pub(crate) async fn copy_to<W>(self, stream: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let remaining = self.remaining;
        let mut reader = tokio::fs::File::from_std(self.file).take(remaining);
        let copied = tokio::io::copy(&mut reader, stream).await?;
        if copied < remaining {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shrank while being sent",
            ));
        }
        Ok(())
    }
}

/// Blocking reads of up to 64 KiB; stops early if the file shrank.
impl Iterator for FileBody {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.remaining == 0 {
            return None;
        }
        let mut buf = vec![0; self.remaining.min(FILE_CHUNK) as usize];
        match self.file.read(&mut buf) {
            Ok(0) | Err(_) => {
                self.remaining = 0;
                None
            }
            Ok(n) => {
                self.remaining -= n as u64;
                buf.truncate(n);
                Some(Bytes::from(buf))
            }
        }
    }
}

#[derive(Debug, Default)]
pub enum ResponseBody {
    #[default]
    Empty,
    /// Body with a known length.
    Full(Bytes),
    /// Body of unknown length.
    Stream(BodyStream),
    /// File contents, read as they are written out.
    File(FileBody),
}

impl ResponseBody {
    /// Length of the body if it is known before writing it.
    pub fn len(&self) -> Option<u64> {
        match self {
            ResponseBody::Empty => Some(0),
            ResponseBody::Full(bytes) => Some(bytes.len() as u64),
            ResponseBody::Stream(_) => None,
            ResponseBody::File(file) => Some(file.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

impl From<Bytes> for ResponseBody {
    fn from(bytes: Bytes) -> Self {
        ResponseBody::Full(bytes)
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(bytes: Vec<u8>) -> Self {
        ResponseBody::Full(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for ResponseBody {
    fn from(bytes: &'static [u8]) -> Self {
        ResponseBody::Full(Bytes::from_static(bytes))
    }
}

impl From<&'static str> for ResponseBody {
    fn from(s: &'static str) -> Self {
        ResponseBody::Full(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for ResponseBody {
    fn from(s: String) -> Self {
        ResponseBody::Full(Bytes::from(s))
    }
}

impl From<BodyStream> for ResponseBody {
    fn from(stream: BodyStream) -> Self {
        ResponseBody::Stream(stream)
    }
}

impl From<FileBody> for ResponseBody {
    fn from(file: FileBody) -> Self {
        ResponseBody::File(file)
    }
}

/// An HTTP response as produced by a handler.
///
/// Framing headers (`Content-Length`, `Transfer-Encoding`) are normally left
/// out; the [`ResponseWriter`](crate::http::writer::ResponseWriter) adds them
/// from the body.
#[derive(Debug)]
pub struct Response {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: ResponseBody,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```
/// # use hppt::http::response::{ResponseBuilder, StatusCode};
/// let response = ResponseBuilder::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body("{}")
///     .build();
/// assert_eq!(response.headers.get("content-type"), Some("application/json"));
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    headers: Headers,
    body: ResponseBody,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: ResponseBody::Empty,
        }
    }

    /// Appends a header; repeated names are kept.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<ResponseBody>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> Response {
        Response {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        ResponseBuilder::new(status).build()
    }

    /// Creates a simple 200 OK response with the given body.
    pub fn ok(body: impl Into<ResponseBody>) -> Self {
        ResponseBuilder::new(StatusCode::Ok).body(body).build()
    }

    /// Plain text response whose body names the status, e.g. `404 Not Found`.
    pub fn error(status: StatusCode) -> Self {
        ResponseBuilder::new(status)
            .header("Content-Type", "text/plain")
            .body(format!("{}\n", status))
            .build()
    }

    /// Creates a 404 Not Found response.
    pub fn not_found() -> Self {
        Self::error(StatusCode::NotFound)
    }

    /// Creates a 500 Internal Server Error response.
    pub fn internal_error() -> Self {
        Self::error(StatusCode::InternalServerError)
    }
}
