//! Response serialization.
//!
//! [`ResponseWriter`] checks a [`Response`]'s framing once, when it is
//! created, then hands out the wire bytes as a sequence of chunks. Writing
//! them to a socket is left to the caller, or to [`ResponseWriter::write_to`].

use std::fmt;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::headers::{Headers, is_token};
use crate::http::request::Version;
use crate::http::response::{Response, ResponseBody, StatusCode};

const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// A response that cannot be framed as given. These are handler bugs and
/// are reported to the caller instead of being sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// The same framing header was set more than once.
    DuplicateHeader(&'static str),
    /// Both `Content-Length` and `Transfer-Encoding` were set.
    ConflictingFraming,
    InvalidContentLength,
    /// `Content-Length` does not match the body.
    LengthMismatch { declared: u64, actual: u64 },
    /// `Content-Length` was set on a streamed body.
    LengthWithStream,
    /// A transfer coding other than `chunked`, or any coding on HTTP/1.0.
    UnsupportedTransferEncoding,
    /// A body, or body framing, on a status that never has one.
    BodyNotAllowed(u16),
    /// A header name that is not a token, or a value with control bytes.
    InvalidHeader(String),
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramingError::DuplicateHeader(name) => write!(f, "duplicate {} header", name),
            FramingError::ConflictingFraming => {
                f.write_str("both Content-Length and Transfer-Encoding set")
            }
            FramingError::InvalidContentLength => f.write_str("invalid Content-Length"),
            FramingError::LengthMismatch { declared, actual } => write!(
                f,
                "Content-Length is {} but the body has {} bytes",
                declared, actual
            ),
            FramingError::LengthWithStream => f.write_str("Content-Length set on a streamed body"),
            FramingError::UnsupportedTransferEncoding => {
                f.write_str("unsupported Transfer-Encoding")
            }
            FramingError::BodyNotAllowed(code) => write!(f, "status {} cannot have a body", code),
            FramingError::InvalidHeader(name) => write!(f, "invalid header {:?}", name),
        }
    }
}

impl std::error::Error for FramingError {}

/// How the end of the body is signalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    /// No body at all.
    None,
    Length(u64),
    Chunked,
    /// Body runs until the connection is closed.
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    Head,
    Body,
    Done,
}

#[derive(Debug)]
pub struct ResponseWriter {
    status: StatusCode,
    version: Version,
    headers: Headers,
    body: ResponseBody,
    framing: Framing,
    /// The framing header still has to be added.
    add_framing: bool,
    head_request: bool,
    keep_alive: bool,
    state: WriteState,
}

impl ResponseWriter {
    /// Validates the response's framing for a request of `version`.
    ///
    /// The connection is kept alive for HTTP/1.1 and closed for HTTP/1.0
    /// unless [`keep_alive`](Self::keep_alive) says otherwise.
    pub fn new(response: Response, version: Version) -> Result<Self, FramingError> {
        let Response {
            status,
            headers,
            body,
        } = response;

        for (name, value) in headers.iter() {
            if !is_token(name.as_bytes())
                || value.bytes().any(|b| b.is_ascii_control() && b != b'\t')
            {
                return Err(FramingError::InvalidHeader(name.to_string()));
            }
        }

        let (framing, add_framing) = framing(status, version, &headers, &body)?;

        Ok(Self {
            status,
            version,
            headers,
            body,
            framing,
            add_framing,
            head_request: false,
            keep_alive: version == Version::Http11,
            state: WriteState::Head,
        })
    }

    /// Answering a HEAD request: send the headers a GET would get, no body.
    pub fn head_request(mut self, head_request: bool) -> Self {
        self.head_request = head_request;
        self
    }

    /// Whether the connection stays open after this response.
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// True if the connection has to be closed once the response is written.
    pub fn must_close(&self) -> bool {
        self.framing == Framing::Close
            || !self.keep_alive
            || self.headers.has_token("Connection", "close")
    }

    /// Collects the complete wire representation.
    pub fn into_bytes(self) -> Vec<u8> {
        let mut buf = Vec::new();
        for chunk in self {
            buf.extend_from_slice(&chunk);
        }
        buf
    }

    /// Writes the remaining chunks to `stream` and flushes it.
    ///
    /// File bodies are copied with tokio's file I/O rather than read on the
    /// calling thread.
    pub async fn write_to<W>(&mut self, stream: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        if matches!(self.body, ResponseBody::File(_)) && matches!(self.framing, Framing::Length(_)) {
            if self.state == WriteState::Head {
                let head = self.start();
                stream.write_all(&head).await?;
            }
            if self.state == WriteState::Body {
                self.state = WriteState::Done;
                if let ResponseBody::File(file) = std::mem::take(&mut self.body) {
                    file.copy_to(stream).await?;
                }
            }
        }

        for chunk in self.by_ref() {
            stream.write_all(&chunk).await?;
        }
        stream.flush().await
    }

    /// Produces the head and moves on to the body, if one is sent.
    fn start(&mut self) -> Bytes {
        self.state = if self.head_request || self.framing == Framing::None {
            WriteState::Done
        } else {
            WriteState::Body
        };
        self.head()
    }

    fn head(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256);
        buf.extend_from_slice(
            format!(
                "{} {} {}\r\n",
                self.version,
                self.status.as_u16(),
                self.status.reason_phrase()
            )
            .as_bytes(),
        );

        // A closing connection says so, whatever the handler put there.
        let closing = self.must_close();
        let mut close_sent = false;
        for (name, value) in self.headers.iter() {
            if closing && name.eq_ignore_ascii_case("Connection") {
                if !close_sent {
                    put_header(&mut buf, name, "close");
                    close_sent = true;
                }
                continue;
            }
            put_header(&mut buf, name, value);
        }

        if self.add_framing {
            match self.framing {
                Framing::Length(len) => put_header(&mut buf, "Content-Length", &len.to_string()),
                Framing::Chunked => put_header(&mut buf, "Transfer-Encoding", "chunked"),
                Framing::None | Framing::Close => {}
            }
        }

        if closing {
            if !close_sent {
                put_header(&mut buf, "Connection", "close");
            }
        } else if self.version == Version::Http10 && !self.headers.contains("Connection") {
            put_header(&mut buf, "Connection", "keep-alive");
        }

        buf.extend_from_slice(b"\r\n");
        buf.freeze()
    }

    fn next_body_chunk(&mut self) -> Option<Bytes> {
        match &mut self.body {
            ResponseBody::Empty => None,
            ResponseBody::Full(bytes) => {
                let bytes = std::mem::take(bytes);
                (!bytes.is_empty()).then_some(bytes)
            }
            ResponseBody::Stream(stream) => stream.find(|chunk| !chunk.is_empty()),
            ResponseBody::File(file) => file.next(),
        }
    }
}

impl Iterator for ResponseWriter {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        match self.state {
            WriteState::Head => Some(self.start()),
            WriteState::Body => match self.next_body_chunk() {
                Some(chunk) if self.framing == Framing::Chunked => Some(encode_chunk(&chunk)),
                Some(chunk) => Some(chunk),
                None => {
                    self.state = WriteState::Done;
                    (self.framing == Framing::Chunked).then(|| Bytes::from_static(LAST_CHUNK))
                }
            },
            WriteState::Done => None,
        }
    }
}

/// Picks the framing and whether the writer has to add its header.
fn framing(
    status: StatusCode,
    version: Version,
    headers: &Headers,
    body: &ResponseBody,
) -> Result<(Framing, bool), FramingError> {
    let lengths = headers.count("Content-Length");
    let encodings = headers.count("Transfer-Encoding");
    if lengths > 1 {
        return Err(FramingError::DuplicateHeader("Content-Length"));
    }
    if encodings > 1 {
        return Err(FramingError::DuplicateHeader("Transfer-Encoding"));
    }
    if lengths == 1 && encodings == 1 {
        return Err(FramingError::ConflictingFraming);
    }

    if !status.allows_body() {
        let not_allowed = FramingError::BodyNotAllowed(status.as_u16());
        // A 304 may announce the length of the representation it stands for.
        let length_ok = lengths == 0 || status == StatusCode::NotModified;
        if !body.is_empty() || encodings > 0 || !length_ok {
            return Err(not_allowed);
        }
        return Ok((Framing::None, false));
    }

    if encodings == 1 {
        let chunked = headers
            .get("Transfer-Encoding")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("chunked"));
        if !chunked || version == Version::Http10 {
            return Err(FramingError::UnsupportedTransferEncoding);
        }
        return Ok((Framing::Chunked, false));
    }

    match (body.len(), headers.get("Content-Length")) {
        (Some(actual), Some(declared)) => {
            let declared = declared.trim();
            if declared.is_empty() || !declared.bytes().all(|b| b.is_ascii_digit()) {
                return Err(FramingError::InvalidContentLength);
            }
            let declared: u64 = declared
                .parse()
                .map_err(|_| FramingError::InvalidContentLength)?;
            if declared != actual {
                return Err(FramingError::LengthMismatch { declared, actual });
            }
            Ok((Framing::Length(actual), false))
        }
        (Some(actual), None) => Ok((Framing::Length(actual), true)),
        (None, Some(_)) => Err(FramingError::LengthWithStream),
        (None, None) if version == Version::Http11 => Ok((Framing::Chunked, true)),
        (None, None) => Ok((Framing::Close, false)),
    }
}

fn put_header(buf: &mut BytesMut, name: &str, value: &str) {
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(b": ");
    buf.extend_from_slice(value.as_bytes());
    buf.extend_from_slice(b"\r\n");
}

fn encode_chunk(chunk: &[u8]) -> Bytes {
    let size = format!("{:x}\r\n", chunk.len());
    let mut buf = BytesMut::with_capacity(size.len() + chunk.len() + 2);
    buf.extend_from_slice(size.as_bytes());
    buf.extend_from_slice(chunk);
    buf.extend_from_slice(b"\r\n");
    buf.freeze()
}
