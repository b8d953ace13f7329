//! CGI/1.1 script execution.
//!
//! The script runs with the request described in its environment. What it
//! prints is a header section, a blank line and the body. A script that
//! exits with an error is answered with `400 Bad Request`, its output
//! still sent as the body.

use std::path::Path;
use std::process::Stdio;

use bytes::Bytes;
use tokio::process::Command;
use tracing::{debug, error};

use crate::http::headers::{Headers, is_token};
use crate::http::request::Request;
use crate::http::response::{Response, ResponseBuilder, StatusCode};

const SERVER_SOFTWARE: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Headers a script may not set; the response writer owns them.
const RESERVED: [&str; 3] = ["Content-Length", "Transfer-Encoding", "Connection"];

/// Runs `script` for `request` and turns its output into a response.
///
/// The exit status decides the status line, so the whole output is
/// collected before anything is sent.
pub async fn run(request: &Request, script: &Path) -> Response {
    let output = match command(request, script).output().await {
        Ok(output) => output,
        Err(err) => {
            error!(script = %script.display(), error = %err, "Failed to run CGI script");
            return Response::internal_error();
        }
    };

    let (headers, body) = split_output(&output.stdout);
    let mut status = if output.status.success() {
        StatusCode::Ok
    } else {
        debug!(script = %script.display(), status = %output.status, "CGI script failed");
        StatusCode::BadRequest
    };

    let mut response = ResponseBuilder::new(StatusCode::Ok);
    for (name, value) in headers.iter() {
        if name.eq_ignore_ascii_case("Status") {
            if output.status.success() {
                status = parse_status(value).unwrap_or(status);
            }
            continue;
        }
        if RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name)) {
            continue;
        }
        response = response.header(name, value);
    }

    let mut response = response.body(body).build();
    response.status = status;
    response
}

fn command(request: &Request, script: &Path) -> Command {
    let mut cmd = Command::new(script);
    cmd.env_clear()
        .env("SERVER_SOFTWARE", SERVER_SOFTWARE)
        .env("GATEWAY_INTERFACE", "CGI/1.1")
        .env("SERVER_PROTOCOL", request.version.as_str())
        .env("REQUEST_METHOD", request.method.as_str())
        .env("SCRIPT_NAME", request.path())
        .env("QUERY_STRING", request.query().unwrap_or(""))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    if let Some(path) = std::env::var_os("PATH") {
        cmd.env("PATH", path);
    }
    cmd
}

/// Splits script output at the first blank line. Output without one is
/// all body.
fn split_output(stdout: &[u8]) -> (Headers, Bytes) {
    let mut headers = Headers::new();

    let mut pos = 0;
    loop {
        let Some(len) = stdout[pos..].iter().position(|&b| b == b'\n') else {
            return (Headers::new(), Bytes::copy_from_slice(stdout));
        };
        let line = &stdout[pos..pos + len];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        pos += len + 1;

        if line.is_empty() {
            return (headers, Bytes::copy_from_slice(&stdout[pos..]));
        }

        let Some(field) = std::str::from_utf8(line).ok().and_then(|l| l.split_once(':')) else {
            return (Headers::new(), Bytes::copy_from_slice(stdout));
        };
        let (name, value) = field;
        let value = value.trim();
        if is_token(name.as_bytes()) && !value.bytes().any(|b| b.is_ascii_control()) {
            headers.append(name, value);
        } else {
            debug!(name, "Dropping invalid CGI header");
        }
    }
}

fn parse_status(value: &str) -> Option<StatusCode> {
    let code = value.split_whitespace().next()?.parse().ok()?;
    StatusCode::from_u16(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_is_split_at_blank_line() {
        let (headers, body) = split_output(b"Content-Type:text/html\r\n\r\n<h1>hi</h1>\r\n");
        assert_eq!(headers.get("Content-Type"), Some("text/html"));
        assert_eq!(&body[..], b"<h1>hi</h1>\r\n");

        let (headers, body) = split_output(b"X-A: 1\nX-B: 2\n\nbody");
        assert_eq!(headers.len(), 2);
        assert_eq!(&body[..], b"body");
    }

    #[test]
    fn output_without_headers_is_body() {
        let (headers, body) = split_output(b"just text\n");
        assert!(headers.is_empty());
        assert_eq!(&body[..], b"just text\n");
    }

    #[test]
    fn status_header_is_parsed() {
        assert_eq!(parse_status("404 Not Found"), Some(StatusCode::NotFound));
        assert_eq!(parse_status("nope"), None);
    }
}
