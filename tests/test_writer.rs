use bytes::Bytes;
use hppt::http::request::Version;
use hppt::http::response::{BodyStream, Response, ResponseBuilder, StatusCode};
use hppt::http::writer::{FramingError, ResponseWriter};

fn wire(response: Response, version: Version) -> String {
    let bytes = ResponseWriter::new(response, version).unwrap().into_bytes();
    String::from_utf8(bytes).unwrap()
}

fn stream(parts: &[&'static str]) -> BodyStream {
    let chunks: Vec<Bytes> = parts.iter().map(|p| Bytes::from_static(p.as_bytes())).collect();
    BodyStream::new(chunks)
}

/// Minimal response parser for checking the writer's output.
fn parse_response(bytes: &[u8]) -> (u16, Vec<(String, String)>, Vec<u8>) {
    let end = bytes
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("head terminator");
    let head = std::str::from_utf8(&bytes[..end]).unwrap();
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap();
    let mut parts = status_line.splitn(3, ' ');
    assert_eq!(parts.next(), Some("HTTP/1.1"));
    let status = parts.next().unwrap().parse().unwrap();

    let headers: Vec<(String, String)> = lines
        .map(|line| {
            let (name, value) = line.split_once(':').unwrap();
            (name.to_string(), value.trim().to_string())
        })
        .collect();

    let body = bytes[end + 4..].to_vec();
    let declared: usize = headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case("Content-Length"))
        .map(|(_, v)| v.parse().unwrap())
        .expect("Content-Length");
    assert_eq!(declared, body.len());

    (status, headers, body)
}

#[test]
fn test_writer_end_to_end_example() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", "text/plain")
        .body("hi")
        .build();

    assert_eq!(
        wire(response, Version::Http11),
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nhi"
    );
}

#[test]
fn test_fixed_length_response_round_trip() {
    let cases: Vec<(StatusCode, Vec<(&str, &str)>, &[u8])> = vec![
        (StatusCode::Ok, vec![("Content-Type", "text/html")], &b"<h1>hello</h1>"[..]),
        (StatusCode::NotFound, vec![], &b""[..]),
        (
            StatusCode::Custom(418, "I'm a teapot"),
            vec![("X-A", "1"), ("X-B", "two words"), ("X-A", "3")],
            &b"short and stout\r\n\r\n"[..],
        ),
    ];

    for (status, headers, body) in cases {
        let mut builder = ResponseBuilder::new(status);
        for (name, value) in &headers {
            builder = builder.header(*name, *value);
        }
        let bytes = ResponseWriter::new(builder.body(body.to_vec()).build(), Version::Http11)
            .unwrap()
            .into_bytes();

        let (parsed_status, parsed_headers, parsed_body) = parse_response(&bytes);
        assert_eq!(parsed_status, status.as_u16());
        assert_eq!(parsed_body, body);

        let without_framing: Vec<(String, String)> = parsed_headers
            .into_iter()
            .filter(|(n, _)| !n.eq_ignore_ascii_case("Content-Length"))
            .collect();
        let expected: Vec<(String, String)> = headers
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();
        assert_eq!(without_framing, expected);
    }
}

#[test]
fn test_stream_body_is_chunked_on_http11() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .body(stream(&["Wiki", "", "pedia"]))
        .build();
    let writer = ResponseWriter::new(response, Version::Http11).unwrap();
    assert!(!writer.must_close());

    let chunks: Vec<Bytes> = writer.collect();
    assert_eq!(
        chunks,
        vec![
            Bytes::from_static(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n"),
            Bytes::from_static(b"4\r\nWiki\r\n"),
            Bytes::from_static(b"5\r\npedia\r\n"),
            Bytes::from_static(b"0\r\n\r\n"),
        ]
    );
}

#[test]
fn test_stream_body_on_http10_is_delimited_by_close() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .body(stream(&["Wiki", "pedia"]))
        .build();
    let writer = ResponseWriter::new(response, Version::Http10)
        .unwrap()
        .keep_alive(true);
    assert!(writer.must_close());

    let bytes = writer.into_bytes();
    assert_eq!(
        String::from_utf8(bytes).unwrap(),
        "HTTP/1.0 200 OK\r\nConnection: close\r\n\r\nWikipedia"
    );
}

#[test]
fn test_http10_keep_alive_is_announced() {
    let writer = ResponseWriter::new(Response::ok("x"), Version::Http10)
        .unwrap()
        .keep_alive(true);
    assert!(!writer.must_close());
    assert_eq!(
        String::from_utf8(writer.into_bytes()).unwrap(),
        "HTTP/1.0 200 OK\r\nContent-Length: 1\r\nConnection: keep-alive\r\n\r\nx"
    );
}

#[test]
fn test_http10_closes_by_default() {
    let writer = ResponseWriter::new(Response::ok("x"), Version::Http10).unwrap();
    assert!(writer.must_close());
    assert!(
        String::from_utf8(writer.into_bytes())
            .unwrap()
            .contains("\r\nConnection: close\r\n")
    );
}

#[test]
fn test_connection_close_when_not_keeping_alive() {
    let writer = ResponseWriter::new(Response::ok("x"), Version::Http11)
        .unwrap()
        .keep_alive(false);
    assert!(writer.must_close());
    assert_eq!(
        String::from_utf8(writer.into_bytes()).unwrap(),
        "HTTP/1.1 200 OK\r\nContent-Length: 1\r\nConnection: close\r\n\r\nx"
    );
}

#[test]
fn test_handler_connection_close_is_honoured() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Connection", "close")
        .build();
    let writer = ResponseWriter::new(response, Version::Http11).unwrap();
    assert!(writer.must_close());
    assert_eq!(
        String::from_utf8(writer.into_bytes()).unwrap(),
        "HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 0\r\n\r\n"
    );
}

#[test]
fn test_closing_overrides_handler_keep_alive() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Connection", "keep-alive")
        .body(stream(&["abc"]))
        .build();
    let writer = ResponseWriter::new(response, Version::Http10)
        .unwrap()
        .keep_alive(true);
    assert!(writer.must_close());
    assert_eq!(
        String::from_utf8(writer.into_bytes()).unwrap(),
        "HTTP/1.0 200 OK\r\nConnection: close\r\n\r\nabc"
    );

    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Connection", "keep-alive")
        .header("Connection", "upgrade")
        .body("x")
        .build();
    let writer = ResponseWriter::new(response, Version::Http11)
        .unwrap()
        .keep_alive(false);
    assert_eq!(
        String::from_utf8(writer.into_bytes()).unwrap(),
        "HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 1\r\n\r\nx"
    );
}

#[test]
fn test_head_response_has_framing_but_no_body() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", "text/plain")
        .body("hi")
        .build();
    let writer = ResponseWriter::new(response, Version::Http11)
        .unwrap()
        .head_request(true);

    assert_eq!(
        String::from_utf8(writer.into_bytes()).unwrap(),
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\n"
    );
}

#[test]
fn test_head_response_with_stream_body() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .body(stream(&["never sent"]))
        .build();
    let writer = ResponseWriter::new(response, Version::Http11)
        .unwrap()
        .head_request(true);

    assert_eq!(
        String::from_utf8(writer.into_bytes()).unwrap(),
        "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n"
    );
}

#[test]
fn test_bodyless_statuses_have_no_framing() {
    assert_eq!(
        wire(Response::new(StatusCode::NoContent), Version::Http11),
        "HTTP/1.1 204 No Content\r\n\r\n"
    );
    assert_eq!(
        wire(Response::new(StatusCode::Continue), Version::Http11),
        "HTTP/1.1 100 Continue\r\n\r\n"
    );

    let not_modified = ResponseBuilder::new(StatusCode::NotModified)
        .header("Content-Length", "1234")
        .build();
    assert_eq!(
        wire(not_modified, Version::Http11),
        "HTTP/1.1 304 Not Modified\r\nContent-Length: 1234\r\n\r\n"
    );
}

#[test]
fn test_body_on_bodyless_status_is_rejected() {
    let response = ResponseBuilder::new(StatusCode::NoContent).body("oops").build();
    assert_eq!(
        ResponseWriter::new(response, Version::Http11).unwrap_err(),
        FramingError::BodyNotAllowed(204)
    );

    let response = ResponseBuilder::new(StatusCode::NoContent)
        .header("Content-Length", "0")
        .build();
    assert_eq!(
        ResponseWriter::new(response, Version::Http11).unwrap_err(),
        FramingError::BodyNotAllowed(204)
    );
}

#[test]
fn test_matching_handler_content_length_is_kept() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("content-length", "2")
        .body("hi")
        .build();
    assert_eq!(
        wire(response, Version::Http11),
        "HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nhi"
    );
}

#[test]
fn test_handler_chunked_encoding_is_kept() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Transfer-Encoding", "chunked")
        .body("hi")
        .build();
    assert_eq!(
        wire(response, Version::Http11),
        "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nhi\r\n0\r\n\r\n"
    );
}

#[test]
fn test_framing_errors() {
    let cases = vec![
        (
            ResponseBuilder::new(StatusCode::Ok).header("Content-Length", "3").body("hi"),
            Version::Http11,
            FramingError::LengthMismatch { declared: 3, actual: 2 },
        ),
        (
            ResponseBuilder::new(StatusCode::Ok).header("Content-Length", "two").body("hi"),
            Version::Http11,
            FramingError::InvalidContentLength,
        ),
        (
            ResponseBuilder::new(StatusCode::Ok)
                .header("Content-Length", "2")
                .header("Content-Length", "2")
                .body("hi"),
            Version::Http11,
            FramingError::DuplicateHeader("Content-Length"),
        ),
        (
            ResponseBuilder::new(StatusCode::Ok)
                .header("Content-Length", "2")
                .header("Transfer-Encoding", "chunked")
                .body("hi"),
            Version::Http11,
            FramingError::ConflictingFraming,
        ),
        (
            ResponseBuilder::new(StatusCode::Ok)
                .header("Content-Length", "4")
                .body(stream(&["Wiki"])),
            Version::Http11,
            FramingError::LengthWithStream,
        ),
        (
            ResponseBuilder::new(StatusCode::Ok).header("Transfer-Encoding", "gzip"),
            Version::Http11,
            FramingError::UnsupportedTransferEncoding,
        ),
        (
            ResponseBuilder::new(StatusCode::Ok).header("Transfer-Encoding", "chunked"),
            Version::Http10,
            FramingError::UnsupportedTransferEncoding,
        ),
        (
            ResponseBuilder::new(StatusCode::Ok).header("Bad Name", "x"),
            Version::Http11,
            FramingError::InvalidHeader("Bad Name".to_string()),
        ),
        (
            ResponseBuilder::new(StatusCode::Ok).header("X-Split", "a\r\nInjected: yes"),
            Version::Http11,
            FramingError::InvalidHeader("X-Split".to_string()),
        ),
    ];

    for (builder, version, expected) in cases {
        let err = ResponseWriter::new(builder.build(), version).unwrap_err();
        assert_eq!(err, expected);
    }
}

#[test]
fn test_framing_error_display() {
    let err = FramingError::LengthMismatch { declared: 3, actual: 2 };
    assert_eq!(err.to_string(), "Content-Length is 3 but the body has 2 bytes");
}

#[tokio::test]
async fn test_write_to_async_stream() {
    let mut writer = ResponseWriter::new(Response::ok("hello"), Version::Http11).unwrap();
    let mut out: Vec<u8> = Vec::new();
    writer.write_to(&mut out).await.unwrap();

    assert_eq!(out, b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");
    // Everything was drained.
    assert_eq!(writer.next(), None);
}
