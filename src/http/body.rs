//! Incremental request body decoding.
//!
//! A [`BodyReader`] is created by the parser once the headers have declared
//! how the body is framed. It is then handed the connection's [`ByteCursor`]
//! each time more bytes arrive and hands back body data as it is decoded,
//! without buffering the whole body itself.

use bytes::Bytes;

use crate::http::cursor::ByteCursor;
use crate::http::headers::Headers;
use crate::http::parser::{ParseError, parse_header_line};

/// Longest chunk-size line, extensions included.
const MAX_CHUNK_LINE: usize = 1024;
/// 16 hex digits is the most a `u64` can hold.
const MAX_CHUNK_SIZE_DIGITS: usize = 16;

/// Trailer fields that would change how the message is framed or routed.
const FORBIDDEN_TRAILERS: [&str; 3] = ["Content-Length", "Transfer-Encoding", "Host"];

/// Result of one [`BodyReader::decode`] call.
#[derive(Debug, PartialEq, Eq)]
pub enum BodyProgress {
    /// Decoded body bytes.
    Chunk(Bytes),
    /// The cursor holds no further decodable bytes.
    NeedMore,
    /// The body, and any trailer section, has been read completely.
    Done,
}

#[derive(Debug)]
pub struct BodyReader {
    mode: Mode,
    max_body_size: u64,
    received: u64,
}

#[derive(Debug)]
enum Mode {
    Fixed { remaining: u64 },
    Chunked(ChunkedDecoder),
}

impl BodyReader {
    /// Reader for a body of exactly `len` bytes.
    pub fn fixed(len: u64, max_body_size: u64) -> Result<Self, ParseError> {
        if len > max_body_size {
            return Err(ParseError::TooLarge);
        }
        Ok(Self {
            mode: Mode::Fixed { remaining: len },
            max_body_size,
            received: 0,
        })
    }

    /// Reader for a chunked body.
    ///
    /// `max_trailer_size` and `max_trailers` bound the trailer section the
    /// same way the header limits bound the header section.
    pub fn chunked(max_body_size: u64, max_trailer_size: usize, max_trailers: usize) -> Self {
        Self {
            mode: Mode::Chunked(ChunkedDecoder {
                state: ChunkState::Size,
                trailers: Headers::new(),
                max_trailer_size,
                max_trailers,
            }),
            max_body_size,
            received: 0,
        }
    }

    /// Decoded body bytes so far.
    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn is_done(&self) -> bool {
        match &self.mode {
            Mode::Fixed { remaining } => *remaining == 0,
            Mode::Chunked(decoder) => decoder.state == ChunkState::Done,
        }
    }

    /// Decodes as much as the cursor allows, up to one piece of body data.
    ///
    /// Framing bytes are consumed from the cursor; data is split off it
    /// without copying.
    pub fn decode(&mut self, cursor: &mut ByteCursor) -> Result<BodyProgress, ParseError> {
        match &mut self.mode {
            Mode::Fixed { remaining } => {
                if *remaining == 0 {
                    return Ok(BodyProgress::Done);
                }
                if cursor.is_empty() {
                    return Ok(BodyProgress::NeedMore);
                }
                let n = (*remaining).min(cursor.remaining_len() as u64);
                if self.received + n > self.max_body_size {
                    return Err(ParseError::TooLarge);
                }
                *remaining -= n;
                self.received += n;
                Ok(BodyProgress::Chunk(cursor.take(n as usize)))
            }
            Mode::Chunked(decoder) => decoder.decode(cursor, &mut self.received, self.max_body_size),
        }
    }

    /// Called when the peer closed the connection.
    pub fn finish(&self) -> Result<(), ParseError> {
        if self.is_done() {
            Ok(())
        } else {
            Err(ParseError::TruncatedBody)
        }
    }

    /// Trailer fields received after the last chunk.
    pub fn take_trailers(&mut self) -> Headers {
        match &mut self.mode {
            Mode::Fixed { .. } => Headers::new(),
            Mode::Chunked(decoder) => std::mem::take(&mut decoder.trailers),
        }
    }
}

#[derive(Debug)]
struct ChunkedDecoder {
    state: ChunkState,
    trailers: Headers,
    max_trailer_size: usize,
    max_trailers: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    /// Expecting `<hex-size>[;ext]CRLF`.
    Size,
    Data { remaining: u64 },
    /// Expecting the CRLF closing a chunk's data.
    DataEnd,
    /// After the last chunk; `section_len` bytes of trailers read.
    Trailers { section_len: usize },
    Done,
}

impl ChunkedDecoder {
    fn decode(
        &mut self,
        cursor: &mut ByteCursor,
        received: &mut u64,
        max_body_size: u64,
    ) -> Result<BodyProgress, ParseError> {
        loop {
            match self.state {
                ChunkState::Size => {
                    let line = match cursor.peek_line(MAX_CHUNK_LINE) {
                        Ok(Some(line)) => line,
                        Ok(None) => return Ok(BodyProgress::NeedMore),
                        Err(_) => return Err(ParseError::BadChunkFraming),
                    };
                    let len = line.len();
                    let size = parse_chunk_size(line)?;
                    cursor.consume(len + 2);

                    if size == 0 {
                        self.state = ChunkState::Trailers { section_len: 0 };
                        continue;
                    }
                    match received.checked_add(size) {
                        Some(total) if total <= max_body_size => {}
                        _ => return Err(ParseError::TooLarge),
                    }
                    self.state = ChunkState::Data { remaining: size };
                }
                ChunkState::Data { remaining } => {
                    if cursor.is_empty() {
                        return Ok(BodyProgress::NeedMore);
                    }
                    let n = remaining.min(cursor.remaining_len() as u64);
                    *received += n;
                    self.state = if n == remaining {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data { remaining: remaining - n }
                    };
                    return Ok(BodyProgress::Chunk(cursor.take(n as usize)));
                }
                ChunkState::DataEnd => match cursor.as_slice() {
                    [] | [b'\r'] => return Ok(BodyProgress::NeedMore),
                    [b'\r', b'\n', ..] => {
                        cursor.consume(2);
                        self.state = ChunkState::Size;
                    }
                    _ => return Err(ParseError::BadChunkFraming),
                },
                ChunkState::Trailers { section_len } => {
                    let budget = self.max_trailer_size.saturating_sub(section_len);
                    if budget < 2 {
                        return Err(ParseError::TooLarge);
                    }
                    let Some(line) = cursor.peek_line(budget - 2)? else {
                        return Ok(BodyProgress::NeedMore);
                    };
                    let len = line.len();
                    if len == 0 {
                        cursor.consume(2);
                        self.state = ChunkState::Done;
                        return Ok(BodyProgress::Done);
                    }

                    let (name, value) = parse_header_line(line)?;
                    cursor.consume(len + 2);
                    self.state = ChunkState::Trailers {
                        section_len: section_len + len + 2,
                    };

                    if FORBIDDEN_TRAILERS.iter().any(|f| f.eq_ignore_ascii_case(&name)) {
                        tracing::debug!(trailer = %name, "Dropping framing trailer field");
                        continue;
                    }
                    if self.trailers.len() >= self.max_trailers {
                        return Err(ParseError::TooLarge);
                    }
                    self.trailers.append(name, value);
                }
                ChunkState::Done => return Ok(BodyProgress::Done),
            }
        }
    }
}

/// Parses the size out of a chunk-size line, ignoring extensions.
fn parse_chunk_size(line: &[u8]) -> Result<u64, ParseError> {
    let (size, ext) = match line.iter().position(|&b| b == b';') {
        Some(i) => line.split_at(i),
        None => (line, &[][..]),
    };
    let size = size.trim_ascii_end();

    if size.is_empty()
        || size.len() > MAX_CHUNK_SIZE_DIGITS
        || !size.iter().all(u8::is_ascii_hexdigit)
        || ext.iter().any(|&b| b.is_ascii_control() && b != b'\t')
    {
        return Err(ParseError::BadChunkFraming);
    }

    // Only hex digits, so this is valid UTF-8 that fits a u64.
    std::str::from_utf8(size)
        .ok()
        .and_then(|s| u64::from_str_radix(s, 16).ok())
        .ok_or(ParseError::BadChunkFraming)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(bytes: &[u8]) -> ByteCursor {
        let mut cursor = ByteCursor::new(4096);
        cursor.append(bytes).unwrap();
        cursor
    }

    fn drain(reader: &mut BodyReader, cursor: &mut ByteCursor) -> Result<(Vec<u8>, bool), ParseError> {
        let mut body = Vec::new();
        loop {
            match reader.decode(cursor)? {
                BodyProgress::Chunk(chunk) => body.extend_from_slice(&chunk),
                BodyProgress::NeedMore => return Ok((body, false)),
                BodyProgress::Done => return Ok((body, true)),
            }
        }
    }

    #[test]
    fn chunk_sizes() {
        assert_eq!(parse_chunk_size(b"4"), Ok(4));
        assert_eq!(parse_chunk_size(b"1aF"), Ok(0x1af));
        assert_eq!(parse_chunk_size(b"10;name=value"), Ok(16));
        assert_eq!(parse_chunk_size(b"10 ;name"), Ok(16));
        assert_eq!(parse_chunk_size(b"ffffffffffffffff"), Ok(u64::MAX));
        assert_eq!(parse_chunk_size(b""), Err(ParseError::BadChunkFraming));
        assert_eq!(parse_chunk_size(b"0x10"), Err(ParseError::BadChunkFraming));
        assert_eq!(parse_chunk_size(b"-1"), Err(ParseError::BadChunkFraming));
        assert_eq!(
            parse_chunk_size(b"10000000000000000"),
            Err(ParseError::BadChunkFraming)
        );
    }

    #[test]
    fn fixed_length_stops_at_declared_length() {
        let mut reader = BodyReader::fixed(5, 1024).unwrap();
        let mut cursor = cursor(b"hel");
        assert_eq!(drain(&mut reader, &mut cursor), Ok((b"hel".to_vec(), false)));
        assert_eq!(reader.finish(), Err(ParseError::TruncatedBody));

        cursor.append(b"loGET").unwrap();
        assert_eq!(drain(&mut reader, &mut cursor), Ok((b"lo".to_vec(), true)));
        assert_eq!(reader.finish(), Ok(()));
        assert_eq!(cursor.as_slice(), b"GET");
    }

    #[test]
    fn fixed_length_over_limit() {
        assert_eq!(BodyReader::fixed(11, 10).unwrap_err(), ParseError::TooLarge);
    }

    #[test]
    fn chunked_with_trailers() {
        let mut reader = BodyReader::chunked(1024, 1024, 10);
        let mut cursor = cursor(b"3;x=y\r\nabc\r\n0\r\nExpires: never\r\nContent-Length: 3\r\n\r\n");
        assert_eq!(drain(&mut reader, &mut cursor), Ok((b"abc".to_vec(), true)));

        let trailers = reader.take_trailers();
        assert_eq!(trailers.len(), 1);
        assert_eq!(trailers.get("expires"), Some("never"));
    }

    #[test]
    fn chunked_missing_data_crlf() {
        let mut reader = BodyReader::chunked(1024, 1024, 10);
        let mut cursor = cursor(b"3\r\nabcX\r\n");
        assert_eq!(drain(&mut reader, &mut cursor), Err(ParseError::BadChunkFraming));
    }

    #[test]
    fn chunked_body_limit_checked_at_size_line() {
        let mut reader = BodyReader::chunked(8, 1024, 10);
        let mut cursor = cursor(b"5\r\nhello\r\n5\r\n");
        assert_eq!(drain(&mut reader, &mut cursor), Err(ParseError::TooLarge));
        assert_eq!(reader.received(), 5);
    }

    #[test]
    fn chunk_size_line_too_long() {
        let mut reader = BodyReader::chunked(1024, 1024, 10);
        let mut line = vec![b'1'];
        line.extend(std::iter::repeat_n(b';', MAX_CHUNK_LINE + 1));
        let mut cursor = cursor(&line);
        assert_eq!(drain(&mut reader, &mut cursor), Err(ParseError::BadChunkFraming));
    }
}
