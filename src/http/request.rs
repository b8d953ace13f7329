use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::task::Poll;

use bytes::{Bytes, BytesMut};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::http::headers::{Headers, is_token};
use crate::http::parser::ParseError;

/// Longest method token accepted on a request line.
pub const MAX_METHOD_LEN: usize = 32;

/// HTTP request methods.
///
/// The registered methods get their own variant, any other valid token is
/// kept as an [`Method::Extension`]. Which methods a server accepts is
/// decided by its configured method set, not by this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// TRACE - Message loop-back test
    TRACE,
    /// CONNECT - Establish a tunnel
    CONNECT,
    /// Any other method token, case preserved.
    Extension(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::TRACE => "TRACE",
            Method::CONNECT => "CONNECT",
            Method::Extension(token) => token,
        }
    }

    /// Methods accepted when no method set is configured.
    pub fn defaults() -> Vec<Method> {
        vec![
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
            Method::PATCH,
        ]
    }
}

impl FromStr for Method {
    type Err = ParseError;

    /// Parses a method token. Methods are case-sensitive, so `get` is an
    /// extension method rather than `GET`.
    ///
    /// ```
    /// # use hppt::http::request::Method;
    /// assert_eq!("GET".parse::<Method>(), Ok(Method::GET));
    /// assert_eq!("PURGE".parse::<Method>(), Ok(Method::Extension("PURGE".into())));
    /// assert!("GE T".parse::<Method>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let method = match s {
            "GET" => Method::GET,
            "HEAD" => Method::HEAD,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "DELETE" => Method::DELETE,
            "OPTIONS" => Method::OPTIONS,
            "PATCH" => Method::PATCH,
            "TRACE" => Method::TRACE,
            "CONNECT" => Method::CONNECT,
            _ if s.len() <= MAX_METHOD_LEN && is_token(s.as_bytes()) => {
                Method::Extension(s.to_string())
            }
            _ => return Err(ParseError::BadRequestLine),
        };
        Ok(method)
    }
}

impl TryFrom<String> for Method {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported protocol versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Version {
    Http10,
    #[default]
    Http11,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }

    /// `(major, minor)`
    pub fn as_tuple(&self) -> (u8, u8) {
        match self {
            Version::Http10 => (1, 0),
            Version::Http11 => (1, 1),
        }
    }

    /// Parses the version token of a request line.
    ///
    /// Anything that is not `HTTP/<digit>.<digit>` is a malformed request
    /// line, well formed versions other than 1.0 and 1.1 are unsupported.
    pub fn parse(token: &[u8]) -> Result<Self, ParseError> {
        match token {
            b"HTTP/1.1" => Ok(Version::Http11),
            b"HTTP/1.0" => Ok(Version::Http10),
            [b'H', b'T', b'T', b'P', b'/', major, b'.', minor]
                if major.is_ascii_digit() && minor.is_ascii_digit() =>
            {
                Err(ParseError::UnsupportedVersion)
            }
            _ => Err(ParseError::BadRequestLine),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded body pieces queued between the parser and a [`Body`].
const BODY_QUEUE: usize = 16;

/// What the parser passes to a streaming [`Body`].
#[derive(Debug)]
enum Frame {
    Data(Bytes),
    /// The body ended; carries the chunked trailer fields, if any.
    End(Headers),
    Failed(ParseError),
}

#[derive(Debug)]
enum Source {
    Buffered(VecDeque<Bytes>),
    Streaming(mpsc::Receiver<Frame>),
}

/// Request body, handed out piece by piece as it is decoded.
///
/// Bodies of parsed requests stream: the handler receives the request as soon
/// as its headers are complete and pulls the body while the connection is
/// still reading it. A body is single-pass and cannot be restarted.
///
/// A streaming body that ends without the parser reporting its end yields
/// [`ParseError::TruncatedBody`].
#[derive(Debug)]
pub struct Body {
    source: Source,
    trailers: Headers,
    ended: bool,
}

impl Body {
    /// An empty, already complete body.
    pub fn new() -> Self {
        Self::buffered(VecDeque::new())
    }

    fn buffered(chunks: VecDeque<Bytes>) -> Self {
        Self {
            source: Source::Buffered(chunks),
            trailers: Headers::new(),
            ended: false,
        }
    }

    /// A body fed by the parser through the returned sender.
    pub(crate) fn channel() -> (BodySender, Body) {
        // One slot stays free for the final frame.
        let (tx, rx) = mpsc::channel(BODY_QUEUE + 1);
        let body = Self {
            source: Source::Streaming(rx),
            trailers: Headers::new(),
            ended: false,
        };
        (BodySender { tx: Some(tx) }, body)
    }

    /// Waits for the next piece of the body. `None` once it has ended.
    pub async fn chunk(&mut self) -> Option<Result<Bytes, ParseError>> {
        match &mut self.source {
            Source::Buffered(chunks) => chunks.pop_front().map(Ok),
            Source::Streaming(_) if self.ended => None,
            Source::Streaming(rx) => {
                let frame = rx.recv().await;
                self.accept(frame)
            }
        }
    }

    /// Takes the next piece if it has already been decoded.
    ///
    /// `Poll::Pending` means the connection has to receive more bytes first.
    pub fn try_chunk(&mut self) -> Poll<Option<Result<Bytes, ParseError>>> {
        match &mut self.source {
            Source::Buffered(chunks) => Poll::Ready(chunks.pop_front().map(Ok)),
            Source::Streaming(_) if self.ended => Poll::Ready(None),
            Source::Streaming(rx) => match rx.try_recv() {
                Ok(frame) => Poll::Ready(self.accept(Some(frame))),
                Err(TryRecvError::Empty) => Poll::Pending,
                Err(TryRecvError::Disconnected) => Poll::Ready(self.accept(None)),
            },
        }
    }

    /// Reads the rest of the body into one buffer.
    pub async fn read_all(&mut self) -> Result<Bytes, ParseError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.chunk().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Trailer fields of a chunked body. Empty until the body has ended.
    pub fn trailers(&self) -> &Headers {
        &self.trailers
    }

    fn accept(&mut self, frame: Option<Frame>) -> Option<Result<Bytes, ParseError>> {
        match frame {
            Some(Frame::Data(chunk)) => Some(Ok(chunk)),
            Some(Frame::End(trailers)) => {
                self.ended = true;
                self.trailers = trailers;
                None
            }
            Some(Frame::Failed(err)) => {
                self.ended = true;
                Some(Err(err))
            }
            None => {
                self.ended = true;
                Some(Err(ParseError::TruncatedBody))
            }
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<Bytes> for Body {
    fn from_iter<I: IntoIterator<Item = Bytes>>(iter: I) -> Self {
        Self::buffered(iter.into_iter().filter(|c| !c.is_empty()).collect())
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        std::iter::once(bytes).collect()
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::from(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self {
        Body::from(Bytes::from_static(bytes))
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Body::from(s.as_bytes())
    }
}

/// The parser's end of a streaming [`Body`].
#[derive(Debug)]
pub(crate) struct BodySender {
    /// `None` once the body is being discarded.
    tx: Option<mpsc::Sender<Frame>>,
}

impl BodySender {
    /// True if another piece can be queued without waiting for the reader.
    pub(crate) fn has_room(&self) -> bool {
        match &self.tx {
            Some(tx) => tx.is_closed() || tx.capacity() > 1,
            None => true,
        }
    }

    /// Waits until [`has_room`](Self::has_room) holds.
    pub(crate) async fn ready(&self) {
        if let Some(tx) = &self.tx {
            // Dropping the permits hands the slots back.
            let _ = tx.reserve_many(2).await;
        }
    }

    /// Queues decoded data. Dropped if the reader has gone away.
    pub(crate) fn send(&self, chunk: Bytes) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(Frame::Data(chunk));
        }
    }

    pub(crate) fn end(self, trailers: Headers) {
        self.finish(Frame::End(trailers));
    }

    pub(crate) fn fail(self, err: ParseError) {
        self.finish(Frame::Failed(err));
    }

    /// Stops passing data on; the reader sees a truncated body.
    pub(crate) fn discard(&mut self) {
        self.tx = None;
    }

    fn finish(self, frame: Frame) {
        if let Some(tx) = self.tx {
            let _ = tx.try_send(frame);
        }
    }
}

/// A parsed HTTP request.
///
/// Produced by the parser once the request line and the headers have been
/// read and validated. The body may still be arriving.
#[derive(Debug)]
pub struct Request {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// The raw request-target (e.g. "/index.html?lang=en")
    pub target: String,
    pub version: Version,
    pub headers: Headers,
    /// `None` when the request framed no body
    pub body: Option<Body>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// The target up to the query string.
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(path, _)| path)
    }

    /// The query string, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }

    /// Determines whether the connection should remain open after the response.
    ///
    /// HTTP/1.1 connections persist unless the client sent `Connection: close`,
    /// HTTP/1.0 connections close unless it sent `Connection: keep-alive`.
    pub fn keep_alive(&self) -> bool {
        match self.version {
            Version::Http11 => !self.headers.has_token("Connection", "close"),
            Version::Http10 => self.headers.has_token("Connection", "keep-alive"),
        }
    }

    /// The client waits for `100 Continue` before sending its body.
    pub fn expects_continue(&self) -> bool {
        self.version == Version::Http11
            && self
                .headers
                .get("Expect")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("100-continue"))
    }
}

/// Builder for constructing Request objects.
pub struct RequestBuilder {
    method: Option<Method>,
    target: Option<String>,
    version: Version,
    headers: Headers,
    body: Option<Body>,
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: None,
            target: None,
            version: Version::Http11,
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn build(self) -> Result<Request, &'static str> {
        Ok(Request {
            method: self.method.ok_or("method missing")?,
            target: self.target.ok_or("target missing")?,
            version: self.version,
            headers: self.headers,
            body: self.body,
        })
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}
