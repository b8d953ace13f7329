//! HTTP/1.x protocol implementation.
//!
//! The parsing and serialization halves never touch a socket: they are fed
//! bytes and hand back progress, so a request may arrive in any number of
//! reads. Only [`connection`] performs I/O.
//!
//! # Architecture
//!
//! - **`cursor`**: receive buffer with CRLF line scanning
//! - **`parser`**: resumable request parser built on the cursor
//! - **`body`**: `Content-Length` and chunked body decoding
//! - **`headers`**: ordered, case-insensitive header list
//! - **`request`**: request, method, version and body types
//! - **`response`**: response representation with builder pattern
//! - **`writer`**: response framing and serialization
//! - **`timer`**: idle and per-request deadlines
//! - **`connection`**: the per-connection read/handle/write loop
//! - **`mime`**: MIME type detection based on file extensions
//!
//! # Parser State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │ RequestLine │ ← Skip empty lines, parse METHOD SP TARGET SP VERSION
//!        └──────┬──────┘
//!               │ Request line parsed
//!               ▼
//!        ┌─────────────┐
//!        │   Headers   │ ← One field per line until the blank line
//!        └──────┬──────┘
//!               │ Request handed off
//!               │ Framing: none ─────────────┐
//!               │ Content-Length / chunked   │
//!               ▼                            │
//!        ┌─────────────┐                     │
//!        │    Body     │ ← BodyReader → Body │
//!        └──────┬──────┘                     │
//!               │ Body complete              │
//!               ▼                            ▼
//!        ┌─────────────────────────────────────┐
//!        │              Complete               │ → next feed starts a new request
//!        └─────────────────────────────────────┘
//!
//!   Any error ──→ Failed (terminal, connection is closed)
//! ```
//!
//! # Example
//!
//! ```
//! use hppt::config::Limits;
//! use hppt::http::parser::{ParseOutcome, RequestParser};
//! use hppt::http::request::Method;
//!
//! let mut parser = RequestParser::new(Limits::default());
//! assert!(matches!(parser.feed(b"GET /index.html HTTP/1.1\r\nHo"), ParseOutcome::NeedMore));
//!
//! match parser.feed(b"st: example.com\r\n\r\n") {
//!     ParseOutcome::Request(req) => {
//!         assert_eq!(req.method, Method::GET);
//!         assert_eq!(req.header("host"), Some("example.com"));
//!     }
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

pub mod body;
pub mod connection;
pub mod cursor;
pub mod headers;
pub mod mime;
pub mod parser;
pub mod request;
pub mod response;
pub mod timer;
pub mod writer;
