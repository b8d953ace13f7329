//! Receive buffer shared by the request parser and the body reader.

use bytes::{Buf, Bytes, BytesMut};

use crate::http::parser::ParseError;

/// Growable buffer over bytes received from a connection.
///
/// Bytes are appended as they arrive and consumed from the front once they
/// have been interpreted. The number of unconsumed bytes is capped, so a peer
/// can never make the buffer grow past `limit`.
#[derive(Debug)]
pub struct ByteCursor {
    buf: BytesMut,
    /// Bytes of `buf` already searched for a line feed.
    scanned: usize,
    limit: usize,
}

impl ByteCursor {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(limit.min(4096)),
            scanned: 0,
            limit,
        }
    }

    /// Adds newly received bytes.
    ///
    /// Fails with [`ParseError::TooLarge`] instead of truncating when the
    /// unconsumed data would exceed the limit.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), ParseError> {
        if bytes.len() > self.room() {
            return Err(ParseError::TooLarge);
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Number of bytes that can still be appended.
    pub fn room(&self) -> usize {
        self.limit.saturating_sub(self.buf.len())
    }

    /// Returns the next CRLF terminated line, without the CRLF.
    ///
    /// `Ok(None)` means the line end has not been received yet. Lines longer
    /// than `max_len` fail with [`ParseError::TooLarge`] as soon as enough
    /// bytes have arrived to tell, whether or not the line end is buffered.
    /// A line feed that is not preceded by a carriage return is rejected.
    pub fn peek_line(&mut self, max_len: usize) -> Result<Option<&[u8]>, ParseError> {
        let unscanned = &self.buf[self.scanned..];
        match unscanned.iter().position(|&b| b == b'\n') {
            Some(offset) => {
                let lf = self.scanned + offset;
                if lf > max_len.saturating_add(1) {
                    return Err(ParseError::TooLarge);
                }
                if lf == 0 || self.buf[lf - 1] != b'\r' {
                    return Err(ParseError::BadLineEnding);
                }
                // Stay at the line end until it is consumed.
                self.scanned = lf;
                Ok(Some(&self.buf[..lf - 1]))
            }
            None if self.buf.len() > max_len.saturating_add(1) => Err(ParseError::TooLarge),
            None => {
                self.scanned = self.buf.len();
                Ok(None)
            }
        }
    }

    /// Discards the first `n` interpreted bytes.
    pub fn consume(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.advance(n);
        self.scanned = self.scanned.saturating_sub(n);
    }

    /// Splits off the first `n` bytes without copying them.
    pub fn take(&mut self, n: usize) -> Bytes {
        let n = n.min(self.buf.len());
        self.scanned = self.scanned.saturating_sub(n);
        self.buf.split_to(n).freeze()
    }

    pub fn remaining_len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.scanned = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_is_returned_once_terminated() {
        let mut cursor = ByteCursor::new(64);
        cursor.append(b"GET / HT").unwrap();
        assert_eq!(cursor.peek_line(64).unwrap(), None);

        cursor.append(b"TP/1.1\r").unwrap();
        assert_eq!(cursor.peek_line(64).unwrap(), None);

        cursor.append(b"\nHost").unwrap();
        assert_eq!(cursor.peek_line(64).unwrap(), Some(&b"GET / HTTP/1.1"[..]));
        // Peeking again does not move past the line.
        assert_eq!(cursor.peek_line(64).unwrap(), Some(&b"GET / HTTP/1.1"[..]));

        cursor.consume(16);
        assert_eq!(cursor.as_slice(), b"Host");
        assert_eq!(cursor.peek_line(64).unwrap(), None);
    }

    #[test]
    fn bare_line_feed_is_rejected() {
        let mut cursor = ByteCursor::new(64);
        cursor.append(b"GET / HTTP/1.1\n").unwrap();
        assert_eq!(cursor.peek_line(64), Err(ParseError::BadLineEnding));

        let mut cursor = ByteCursor::new(64);
        cursor.append(b"\n").unwrap();
        assert_eq!(cursor.peek_line(64), Err(ParseError::BadLineEnding));
    }

    #[test]
    fn append_past_limit_fails() {
        let mut cursor = ByteCursor::new(8);
        cursor.append(b"12345").unwrap();
        assert_eq!(cursor.room(), 3);
        assert_eq!(cursor.append(b"6789"), Err(ParseError::TooLarge));
        // Nothing was appended.
        assert_eq!(cursor.remaining_len(), 5);

        cursor.consume(5);
        cursor.append(b"12345678").unwrap();
    }

    #[test]
    fn long_line_is_rejected_before_its_end() {
        let mut cursor = ByteCursor::new(64);
        cursor.append(b"0123456789\r").unwrap();
        assert_eq!(cursor.peek_line(10).unwrap(), None);
        cursor.append(b"x").unwrap();
        assert_eq!(cursor.peek_line(10), Err(ParseError::TooLarge));

        let mut cursor = ByteCursor::new(64);
        cursor.append(b"0123456789x\r\n").unwrap();
        assert_eq!(cursor.peek_line(10), Err(ParseError::TooLarge));

        let mut cursor = ByteCursor::new(64);
        cursor.append(b"0123456789\r\n").unwrap();
        assert_eq!(cursor.peek_line(10).unwrap(), Some(&b"0123456789"[..]));
    }

    #[test]
    fn take_splits_prefix() {
        let mut cursor = ByteCursor::new(64);
        cursor.append(b"Wikipedia\r\n").unwrap();
        let chunk = cursor.take(4);
        assert_eq!(&chunk[..], b"Wiki");
        assert_eq!(cursor.peek_line(64).unwrap(), Some(&b"pedia"[..]));
    }
}
