use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::handler::Handler;
use crate::http::parser::{ParseError, ParseOutcome, RequestParser};
use crate::http::request::{Method, Request, Version};
use crate::http::response::Response;
use crate::http::timer::{ConnectionTimer, Deadline};
use crate::http::writer::ResponseWriter;

const READ_BUFFER: usize = 8192;
const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// What waiting on the client produced.
enum Incoming<T> {
    Ready(T),
    /// The client went away, or went silent.
    Closed,
    /// The request is unusable; answer with an error and close.
    Rejected(ParseError),
}

/// Result of one timed read.
enum Read {
    /// New bytes were fed to the parser.
    Fed(ParseOutcome),
    TimedOut(Deadline),
    /// End of stream, as reported by the parser.
    Eof(Result<(), ParseError>),
}

/// Drives one client connection: reads requests, hands them to the handler
/// and writes the responses until either side closes.
///
/// A request reaches the handler once its headers are in. Its body is read
/// from the socket while the handler runs, only as fast as the handler
/// consumes it.
pub struct Connection<S, H> {
    stream: S,
    parser: RequestParser,
    timer: ConnectionTimer,
    handler: Arc<H>,
    buffer: Vec<u8>,
}

impl<S, H> Connection<S, H>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Handler,
{
    pub fn new(stream: S, cfg: &Config, handler: Arc<H>) -> Self {
        Self {
            stream,
            parser: RequestParser::new(cfg.limits.clone()),
            timer: ConnectionTimer::new(cfg.timeouts.idle(), cfg.timeouts.request(), now()),
            handler,
            buffer: vec![0; READ_BUFFER],
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            let request = match self.read_request().await? {
                Incoming::Ready(request) => request,
                Incoming::Closed => break,
                Incoming::Rejected(err) => {
                    let version = self.parser.version().unwrap_or(Version::Http11);
                    self.reject(err, version).await;
                    break;
                }
            };

            let version = request.version;
            let head_request = request.method == Method::HEAD;
            let keep_alive = request.keep_alive();
            let method = request.method.clone();
            let target = request.target.clone();

            if self.parser.expects_continue() {
                debug!("Sending 100 Continue");
                self.stream.write_all(CONTINUE).await?;
                self.stream.flush().await?;
            }

            let response = match self.serve(request).await? {
                Incoming::Ready(response) => response,
                Incoming::Closed => break,
                Incoming::Rejected(err) => {
                    self.reject(err, version).await;
                    break;
                }
            };
            let status = response.status;

            let writer = match ResponseWriter::new(response, version) {
                Ok(writer) => writer,
                Err(err) => {
                    error!(%method, %target, error = %err, "Handler returned an invalid response");
                    ResponseWriter::new(Response::internal_error(), version)?
                }
            };
            let mut writer = writer.head_request(head_request).keep_alive(keep_alive);

            writer
                .write_to(&mut self.stream)
                .await
                .context("Failed to write response")?;
            self.timer.record_activity(now());
            info!(%method, %target, status = status.as_u16(), "Request served");

            if writer.must_close() || !self.skip_body().await? {
                break;
            }
        }

        if let Err(err) = self.stream.shutdown().await {
            debug!(error = %err, "Shutdown failed");
        }
        Ok(())
    }

    /// Reads until a request's headers are parsed, the input is rejected,
    /// or the client closes or times out.
    async fn read_request(&mut self) -> anyhow::Result<Incoming<Request>> {
        let mut outcome = if self.parser.has_buffered() {
            self.parser.feed(&[])
        } else {
            ParseOutcome::NeedMore
        };

        loop {
            match outcome {
                ParseOutcome::Request(request) => return Ok(Incoming::Ready(request)),
                ParseOutcome::Error(err) => {
                    self.timer.finish_request();
                    return Ok(Incoming::Rejected(err));
                }
                ParseOutcome::NeedMore => {}
            }

            outcome = match self.read().await? {
                Read::Fed(outcome) => outcome,
                Read::TimedOut(deadline) => return Ok(self.timed_out(deadline)),
                Read::Eof(Ok(())) => {
                    debug!("Client closed connection");
                    return Ok(Incoming::Closed);
                }
                Read::Eof(Err(err)) => return Ok(Incoming::Rejected(err)),
            };
        }
    }

    /// Runs the handler, feeding it the request body as it arrives.
    async fn serve(&mut self, request: Request) -> anyhow::Result<Incoming<Response>> {
        let handler = Arc::clone(&self.handler);
        let response = handler.handle(request);
        tokio::pin!(response);

        // Body bytes that came in with the headers.
        if self.parser.reading_body() {
            if let ParseOutcome::Error(err) = self.parser.feed(&[]) {
                return Ok(Incoming::Rejected(err));
            }
        }

        loop {
            if !self.parser.reading_body() {
                self.timer.finish_request();
                return Ok(Incoming::Ready(response.await));
            }

            tokio::select! {
                response = &mut response => return Ok(Incoming::Ready(response)),
                read = self.read_body() => {
                    if let Some(stop) = read? {
                        return Ok(stop);
                    }
                }
            }
        }
    }

    /// Moves the body forward by one read, or by one wait for the handler
    /// to make room. `Some` ends the request.
    async fn read_body<T>(&mut self) -> anyhow::Result<Option<Incoming<T>>> {
        if self.parser.body_blocked() {
            self.parser.body_ready().await;
            return Ok(match self.parser.feed(&[]) {
                ParseOutcome::Error(err) => Some(Incoming::Rejected(err)),
                _ => None,
            });
        }

        Ok(match self.read().await? {
            Read::Fed(ParseOutcome::Error(err)) | Read::Eof(Err(err)) => {
                Some(Incoming::Rejected(err))
            }
            Read::Fed(_) => None,
            Read::TimedOut(deadline) => Some(self.timed_out(deadline)),
            Read::Eof(Ok(())) => Some(Incoming::Closed),
        })
    }

    /// Reads past whatever the handler left of the request body. False if
    /// the connection cannot be reused.
    async fn skip_body(&mut self) -> anyhow::Result<bool> {
        if !self.parser.reading_body() {
            return Ok(true);
        }
        debug!("Discarding unread request body");
        self.parser.discard_body();
        if let ParseOutcome::Error(_) = self.parser.feed(&[]) {
            return Ok(false);
        }

        while self.parser.reading_body() {
            match self.read().await? {
                Read::Fed(ParseOutcome::Error(_)) | Read::TimedOut(_) | Read::Eof(_) => {
                    return Ok(false);
                }
                Read::Fed(_) => {}
            }
        }
        self.timer.finish_request();
        Ok(true)
    }

    /// Waits for bytes until the next deadline and feeds them to the parser.
    async fn read(&mut self) -> anyhow::Result<Read> {
        loop {
            if self.parser.in_progress() {
                self.timer.start_request(now());
            }

            let deadline = tokio::time::Instant::from_std(self.timer.next_deadline());
            let read = tokio::time::timeout_at(deadline, self.stream.read(&mut self.buffer)).await;
            let n = match read {
                Ok(n) => n.context("Failed to read from connection")?,
                Err(_) => match self.timer.expired(now()) {
                    Some(deadline) => return Ok(Read::TimedOut(deadline)),
                    None => continue,
                },
            };

            if n == 0 {
                return Ok(Read::Eof(self.parser.finish()));
            }
            self.timer.record_activity(now());
            return Ok(Read::Fed(self.parser.feed(&self.buffer[..n])));
        }
    }

    /// A silent client is dropped without a response. One still sending,
    /// but too slowly, gets a 408.
    fn timed_out<T>(&self, deadline: Deadline) -> Incoming<T> {
        match deadline {
            Deadline::Request if self.parser.in_progress() => {
                Incoming::Rejected(ParseError::Timeout)
            }
            _ => {
                debug!(?deadline, "Closing silent connection");
                Incoming::Closed
            }
        }
    }

    /// Best-effort error response; the connection is closed afterwards
    /// whatever happens here.
    async fn reject(&mut self, err: ParseError, version: Version) {
        let status = err.status();
        warn!(error = %err, status = status.as_u16(), "Rejecting request");

        let mut writer = match ResponseWriter::new(Response::error(status), version) {
            Ok(writer) => writer.keep_alive(false),
            Err(err) => {
                error!(error = %err, "Cannot frame error response");
                return;
            }
        };
        if let Err(err) = writer.write_to(&mut self.stream).await {
            debug!(error = %err, "Failed to send error response");
        }
    }
}

/// Current time on tokio's clock, so paused test clocks apply to the timer.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}
