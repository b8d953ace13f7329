//! Incremental HTTP/1.x request parser.
//!
//! [`RequestParser`] is fed bytes in whatever pieces the connection delivers
//! them and answers with a [`ParseOutcome`]. It keeps its progress between
//! calls, so already parsed lines are never looked at again, and splitting
//! the input differently never changes the result.
//!
//! A request is returned as soon as its headers are complete. Its body is
//! decoded by later `feed` calls and passed to the request's
//! [`Body`](crate::http::request::Body) as it arrives.

use std::fmt;

use bytes::BytesMut;

use crate::config::Limits;
use crate::http::body::{BodyProgress, BodyReader};
use crate::http::cursor::ByteCursor;
use crate::http::headers::{Headers, is_token};
use crate::http::request::{Body, BodySender, Method, Request, Version};
use crate::http::response::StatusCode;

/// Smallest receive buffer; leaves room for chunk-size lines whatever the
/// header limits are.
const MIN_BUFFER: usize = 4096;

/// Reasons a request is rejected. All of them end the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    BadRequestLine,
    MalformedHeader,
    /// Both `Content-Length` and `Transfer-Encoding`, or framing headers
    /// that disagree with themselves.
    AmbiguousBodyFraming,
    /// A line, the header section or the body is over its limit.
    TooLarge,
    /// The peer closed the connection before the body was complete.
    TruncatedBody,
    BadChunkFraming,
    /// A line feed without a preceding carriage return.
    BadLineEnding,
    Timeout,
    /// A well formed version other than HTTP/1.0 and HTTP/1.1.
    UnsupportedVersion,
    /// A method outside the configured method set.
    UnsupportedMethod,
}

impl ParseError {
    /// Status of the best-effort response sent before closing.
    pub fn status(&self) -> StatusCode {
        match self {
            ParseError::TooLarge => StatusCode::ContentTooLarge,
            ParseError::Timeout => StatusCode::RequestTimeout,
            ParseError::UnsupportedVersion => StatusCode::HttpVersionNotSupported,
            ParseError::UnsupportedMethod => StatusCode::NotImplemented,
            ParseError::BadRequestLine
            | ParseError::MalformedHeader
            | ParseError::AmbiguousBodyFraming
            | ParseError::TruncatedBody
            | ParseError::BadChunkFraming
            | ParseError::BadLineEnding => StatusCode::BadRequest,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ParseError::BadRequestLine => "malformed request line",
            ParseError::MalformedHeader => "malformed header field",
            ParseError::AmbiguousBodyFraming => "ambiguous body framing",
            ParseError::TooLarge => "request too large",
            ParseError::TruncatedBody => "connection closed before end of body",
            ParseError::BadChunkFraming => "malformed chunked encoding",
            ParseError::BadLineEnding => "line not terminated by CRLF",
            ParseError::Timeout => "timed out",
            ParseError::UnsupportedVersion => "unsupported HTTP version",
            ParseError::UnsupportedMethod => "unsupported method",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ParseError {}

/// Result of feeding bytes to the parser.
#[derive(Debug)]
pub enum ParseOutcome {
    /// No new request yet; any body being received continues.
    NeedMore,
    /// A request whose headers are complete. Its body, if any, follows
    /// through further `feed` calls.
    Request(Request),
    /// The request was rejected; the connection must be closed.
    Error(ParseError),
}

#[derive(Debug)]
enum Phase {
    RequestLine,
    Headers(Request),
    Body(Streaming),
    Complete,
    Failed(ParseError),
}

/// A body being decoded for a request that has been handed off.
#[derive(Debug)]
struct Streaming {
    reader: BodyReader,
    sender: BodySender,
    expects_continue: bool,
}

/// Where [`RequestParser::advance`] stopped.
enum Step {
    Request(Request),
    NeedMore,
    /// The body reader has not caught up with the decoded data.
    Blocked,
    BodyDone,
}

/// Resumable request parser, one per connection.
#[derive(Debug)]
pub struct RequestParser {
    limits: Limits,
    cursor: ByteCursor,
    /// Input left over once a request completed, parsed by the next `feed`.
    backlog: BytesMut,
    phase: Phase,
    /// Bytes of the current header section consumed so far.
    section_len: usize,
    /// Version from the current request line.
    version: Option<Version>,
}

impl RequestParser {
    pub fn new(limits: Limits) -> Self {
        let buffer = limits
            .max_header_size
            .max(limits.max_request_line + 2)
            .max(MIN_BUFFER);
        Self {
            limits,
            cursor: ByteCursor::new(buffer),
            backlog: BytesMut::new(),
            phase: Phase::RequestLine,
            section_len: 0,
            version: None,
        }
    }

    /// Feeds newly received bytes and parses as far as they allow.
    ///
    /// Once a request is returned, bytes following it are kept but not parsed
    /// until the next call, which may pass an empty slice to pick them up.
    /// The same holds for bytes following the end of a body. While the
    /// request's `Body` has a full queue, decoding pauses and input is kept.
    /// After an error every further call returns the same error.
    pub fn feed(&mut self, bytes: &[u8]) -> ParseOutcome {
        match self.phase {
            Phase::Failed(err) => return ParseOutcome::Error(err),
            Phase::Complete => {
                self.phase = Phase::RequestLine;
                self.section_len = 0;
                self.version = None;
            }
            _ => {}
        }

        let joined;
        let mut input = if self.backlog.is_empty() {
            bytes
        } else {
            self.backlog.extend_from_slice(bytes);
            joined = self.backlog.split();
            &joined[..]
        };

        loop {
            let n = self.cursor.room().min(input.len());
            if let Err(err) = self.cursor.append(&input[..n]) {
                return self.fail(err);
            }
            input = &input[n..];

            match self.advance() {
                Ok(Step::Request(request)) => {
                    self.backlog.extend_from_slice(input);
                    tracing::debug!(
                        method = %request.method,
                        target = %request.target,
                        "Request parsed"
                    );
                    return ParseOutcome::Request(request);
                }
                Ok(Step::Blocked | Step::BodyDone) => {
                    self.backlog.extend_from_slice(input);
                    return ParseOutcome::NeedMore;
                }
                Ok(Step::NeedMore) if input.is_empty() => return ParseOutcome::NeedMore,
                Ok(Step::NeedMore) if self.cursor.room() == 0 => {
                    return self.fail(ParseError::TooLarge);
                }
                Ok(Step::NeedMore) => {}
                Err(err) => return self.fail(err),
            }
        }
    }

    /// Reports the end of the input stream.
    ///
    /// Succeeds if no request was in progress.
    pub fn finish(&mut self) -> Result<(), ParseError> {
        let result = match &self.phase {
            Phase::Failed(err) => Err(*err),
            Phase::RequestLine | Phase::Complete => {
                if self.cursor.is_empty() && self.backlog.is_empty() {
                    Ok(())
                } else {
                    Err(ParseError::BadRequestLine)
                }
            }
            Phase::Headers(_) => Err(ParseError::MalformedHeader),
            Phase::Body(body) => body.reader.finish(),
        };
        if let Err(err) = result {
            self.fail(err);
        }
        result
    }

    /// True while part of a request has been received.
    pub fn in_progress(&self) -> bool {
        match self.phase {
            Phase::Headers(_) | Phase::Body(_) => true,
            Phase::RequestLine => !self.cursor.is_empty(),
            Phase::Complete | Phase::Failed(_) => false,
        }
    }

    /// Version of the request being parsed, or of the one that failed, once
    /// its request line was accepted.
    pub fn version(&self) -> Option<Version> {
        self.version
    }

    /// True if received bytes are waiting to be parsed.
    pub fn has_buffered(&self) -> bool {
        !self.cursor.is_empty() || !self.backlog.is_empty()
    }

    /// True while the body of a handed off request is being decoded.
    pub fn reading_body(&self) -> bool {
        matches!(self.phase, Phase::Body(_))
    }

    /// True if decoding paused because the request's `Body` has not been
    /// read far enough.
    pub fn body_blocked(&self) -> bool {
        match &self.phase {
            Phase::Body(body) => !body.sender.has_room(),
            _ => false,
        }
    }

    /// Waits until the request's `Body` has room for more decoded data.
    pub async fn body_ready(&self) {
        if let Phase::Body(body) = &self.phase {
            body.sender.ready().await;
        }
    }

    /// Decodes the rest of the current body without passing it on, so the
    /// next request can be reached. The `Body`, if still held, is cut short.
    pub fn discard_body(&mut self) {
        if let Phase::Body(body) = &mut self.phase {
            body.sender.discard();
        }
    }

    /// True if the client waits for `100 Continue` before sending the body
    /// of the request just returned.
    pub fn expects_continue(&self) -> bool {
        match &self.phase {
            Phase::Body(body) => {
                body.expects_continue
                    && body.reader.received() == 0
                    && self.cursor.is_empty()
                    && self.backlog.is_empty()
            }
            _ => false,
        }
    }

    fn fail(&mut self, err: ParseError) -> ParseOutcome {
        tracing::debug!(error = %err, "Rejecting request");
        if let Phase::Body(body) = std::mem::replace(&mut self.phase, Phase::Failed(err)) {
            body.sender.fail(err);
        }
        self.cursor.clear();
        self.backlog.clear();
        ParseOutcome::Error(err)
    }

    /// Runs the state machine until it needs more bytes, a request's headers
    /// are done or a body ends.
    ///
    /// On error the phase is left as `Complete`; the caller marks it failed.
    fn advance(&mut self) -> Result<Step, ParseError> {
        loop {
            self.phase = match std::mem::replace(&mut self.phase, Phase::Complete) {
                Phase::RequestLine => match self.request_line()? {
                    Some(request) => Phase::Headers(request),
                    None => {
                        self.phase = Phase::RequestLine;
                        return Ok(Step::NeedMore);
                    }
                },
                Phase::Headers(mut request) => match self.header_line(&mut request)? {
                    HeaderStep::Field => Phase::Headers(request),
                    HeaderStep::NeedMore => {
                        self.phase = Phase::Headers(request);
                        return Ok(Step::NeedMore);
                    }
                    HeaderStep::End => {
                        if let Some(reader) = self.body_reader(&request.headers)? {
                            let (sender, body) = Body::channel();
                            request.body = Some(body);
                            self.phase = Phase::Body(Streaming {
                                reader,
                                sender,
                                expects_continue: request.expects_continue(),
                            });
                        }
                        return Ok(Step::Request(request));
                    }
                },
                Phase::Body(mut body) => {
                    if !body.sender.has_room() {
                        self.phase = Phase::Body(body);
                        return Ok(Step::Blocked);
                    }
                    match body.reader.decode(&mut self.cursor) {
                        Ok(BodyProgress::Chunk(chunk)) => {
                            body.sender.send(chunk);
                            Phase::Body(body)
                        }
                        Ok(BodyProgress::NeedMore) => {
                            self.phase = Phase::Body(body);
                            return Ok(Step::NeedMore);
                        }
                        Ok(BodyProgress::Done) => {
                            let trailers = body.reader.take_trailers();
                            body.sender.end(trailers);
                            return Ok(Step::BodyDone);
                        }
                        Err(err) => {
                            body.sender.fail(err);
                            return Err(err);
                        }
                    }
                }
                phase @ (Phase::Complete | Phase::Failed(_)) => {
                    self.phase = phase;
                    return Ok(Step::NeedMore);
                }
            };
        }
    }

    fn request_line(&mut self) -> Result<Option<Request>, ParseError> {
        loop {
            let Some(line) = self.cursor.peek_line(self.limits.max_request_line)? else {
                return Ok(None);
            };
            let len = line.len();
            if len == 0 {
                // Stray CRLF between requests.
                self.cursor.consume(2);
                continue;
            }

            let (method, target, version) = parse_request_line(line)?;
            if !self.limits.methods.contains(&method) {
                return Err(ParseError::UnsupportedMethod);
            }
            self.cursor.consume(len + 2);
            self.section_len = len + 2;
            self.version = Some(version);

            return Ok(Some(Request {
                method,
                target,
                version,
                headers: Headers::new(),
                body: None,
            }));
        }
    }

    fn header_line(&mut self, request: &mut Request) -> Result<HeaderStep, ParseError> {
        let budget = self.limits.max_header_size.saturating_sub(self.section_len);
        if budget < 2 {
            return Err(ParseError::TooLarge);
        }
        let Some(line) = self.cursor.peek_line(budget - 2)? else {
            return Ok(HeaderStep::NeedMore);
        };
        let len = line.len();
        if len == 0 {
            self.cursor.consume(2);
            self.section_len += 2;
            return Ok(HeaderStep::End);
        }

        let (name, value) = parse_header_line(line)?;
        if request.headers.len() >= self.limits.max_headers {
            return Err(ParseError::TooLarge);
        }
        self.cursor.consume(len + 2);
        self.section_len += len + 2;
        request.headers.append(name, value);
        Ok(HeaderStep::Field)
    }

    /// Decides how the body is framed.
    fn body_reader(&self, headers: &Headers) -> Result<Option<BodyReader>, ParseError> {
        let limits = &self.limits;
        let has_length = headers.contains("Content-Length");

        if headers.contains("Transfer-Encoding") {
            if has_length {
                return Err(ParseError::AmbiguousBodyFraming);
            }
            let codings: Vec<&str> = headers
                .get_all("Transfer-Encoding")
                .flat_map(|v| v.split(','))
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .collect();
            let chunked = codings
                .iter()
                .filter(|c| c.eq_ignore_ascii_case("chunked"))
                .count();
            let last_is_chunked = codings
                .last()
                .is_some_and(|c| c.eq_ignore_ascii_case("chunked"));
            if chunked != 1 || !last_is_chunked {
                return Err(ParseError::AmbiguousBodyFraming);
            }
            return Ok(Some(BodyReader::chunked(
                limits.max_body_size,
                limits.max_header_size,
                limits.max_headers,
            )));
        }

        if !has_length {
            return Ok(None);
        }

        let mut declared = None;
        for value in headers.get_all("Content-Length").flat_map(|v| v.split(',')) {
            let value = value.trim();
            if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ParseError::MalformedHeader);
            }
            // All digits, so the only possible failure is overflow.
            let len: u64 = value.parse().map_err(|_| ParseError::TooLarge)?;
            match declared {
                Some(previous) if previous != len => {
                    return Err(ParseError::AmbiguousBodyFraming);
                }
                _ => declared = Some(len),
            }
        }

        match declared {
            None | Some(0) => Ok(None),
            Some(len) => BodyReader::fixed(len, limits.max_body_size).map(Some),
        }
    }
}

enum HeaderStep {
    Field,
    End,
    NeedMore,
}

/// Splits `METHOD SP TARGET SP HTTP/X.Y`.
fn parse_request_line(line: &[u8]) -> Result<(Method, String, Version), ParseError> {
    let mut parts = line.split(|&b| b == b' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ParseError::BadRequestLine);
    };

    if target.is_empty() || !target.iter().all(u8::is_ascii_graphic) {
        return Err(ParseError::BadRequestLine);
    }
    let version = Version::parse(version)?;
    let method = std::str::from_utf8(method)
        .map_err(|_| ParseError::BadRequestLine)?
        .parse::<Method>()?;
    let target = String::from_utf8(target.to_vec()).map_err(|_| ParseError::BadRequestLine)?;

    Ok((method, target, version))
}

/// Parses `name ":" OWS value OWS`. Shared with chunked trailers.
pub(crate) fn parse_header_line(line: &[u8]) -> Result<(String, String), ParseError> {
    // Obsolete line folding.
    if matches!(line.first(), Some(b' ' | b'\t')) {
        return Err(ParseError::MalformedHeader);
    }
    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or(ParseError::MalformedHeader)?;
    let (name, value) = (&line[..colon], &line[colon + 1..]);

    if !is_token(name) {
        return Err(ParseError::MalformedHeader);
    }
    let value = trim_ows(value);
    if value.iter().any(|&b| b.is_ascii_control() && b != b'\t') {
        return Err(ParseError::MalformedHeader);
    }

    let name = String::from_utf8(name.to_vec()).map_err(|_| ParseError::MalformedHeader)?;
    let value = String::from_utf8(value.to_vec()).map_err(|_| ParseError::MalformedHeader)?;
    Ok((name, value))
}

fn trim_ows(mut value: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = value {
        value = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = value {
        value = rest;
    }
    value
}
