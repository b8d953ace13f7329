#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use hppt::handler::{Handler, StaticFiles};
use hppt::http::request::{Method, Request, RequestBuilder};
use hppt::http::response::{Response, ResponseBody, StatusCode};
use tokio::sync::Mutex;

// Writing a script while another test forks can leave the write handle open
// in the child, making exec fail with ETXTBSY. The tests take turns.
static SERIAL: Mutex<()> = Mutex::const_new(());

const ADDITION: &str = r#"#!/bin/sh
field() {
    printf '%s\n' "$QUERY_STRING" | tr '&' '\n' | sed -n "s/^$1=//p"
}
num1=$(field num1)
num2=$(field num2)

printf 'Content-Type:text/html\r\n'
printf '\r\n'
printf '<h1>Addition Results</h1>\r\n'

for n in "$num1" "$num2"; do
    case "$n" in
        '' | *[!0-9]*)
            printf '<p>Sorry, we cannot turn your inputs into integers.</p>\r\n'
            exit 1
            ;;
    esac
done

printf '<p>%s + %s = %s</p>\r\n' "$num1" "$num2" "$((num1 + num2))"
"#;

const ENVIRONMENT: &str = r#"#!/bin/sh
printf 'Content-Type: text/plain\n\n'
printf '%s|%s|%s|%s|%s\n' "$REQUEST_METHOD" "$QUERY_STRING" "$SERVER_SOFTWARE" "$GATEWAY_INTERFACE" "$SERVER_PROTOCOL"
"#;

/// Document root with a `cgi-bin` of shell scripts, removed on drop.
struct Site(PathBuf);

impl Site {
    fn new(name: &str) -> Self {
        let root = std::env::temp_dir().join(format!("hppt-cgi-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(root.join("cgi-bin")).unwrap();
        for (file, script) in [("addition.sh", ADDITION), ("env.sh", ENVIRONMENT)] {
            let path = root.join("cgi-bin").join(file);
            std::fs::write(&path, script).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        Site(root)
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for Site {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn get(target: &str) -> Request {
    RequestBuilder::new()
        .method(Method::GET)
        .target(target)
        .build()
        .unwrap()
}

fn body(response: &Response) -> &[u8] {
    match &response.body {
        ResponseBody::Full(bytes) => bytes,
        other => panic!("unexpected body {:?}", other),
    }
}

#[tokio::test]
async fn test_cgi_addition_success() {
    let _serial = SERIAL.lock().await;
    let site = Site::new("success");
    let files = StaticFiles::new(site.path()).unwrap().with_cgi(true);

    let response = files.handle(get("/cgi-bin/addition.sh?num1=1&num2=10")).await;

    assert_eq!(response.status, StatusCode::Ok);
    assert_eq!(response.headers.get("Content-Type"), Some("text/html"));
    assert_eq!(
        body(&response),
        b"<h1>Addition Results</h1>\r\n<p>1 + 10 = 11</p>\r\n"
    );
}

#[tokio::test]
async fn test_cgi_addition_fail() {
    let _serial = SERIAL.lock().await;
    let site = Site::new("fail");
    let files = StaticFiles::new(site.path()).unwrap().with_cgi(true);

    let response = files.handle(get("/cgi-bin/addition.sh?num1=banana&num2=pie")).await;

    assert_eq!(response.status, StatusCode::BadRequest);
    assert_eq!(response.headers.get("Content-Type"), Some("text/html"));
    assert_eq!(
        body(&response),
        b"<h1>Addition Results</h1>\r\n<p>Sorry, we cannot turn your inputs into integers.</p>\r\n"
    );
}

#[tokio::test]
async fn test_cgi_environment() {
    let _serial = SERIAL.lock().await;
    let site = Site::new("env");
    let files = StaticFiles::new(site.path()).unwrap().with_cgi(true);

    let response = files.handle(get("/cgi-bin/env.sh?a=1")).await;

    assert_eq!(response.status, StatusCode::Ok);
    let expected = format!(
        "GET|a=1|hppt/{}|CGI/1.1|HTTP/1.1\n",
        env!("CARGO_PKG_VERSION")
    );
    assert_eq!(body(&response), expected.as_bytes());
}

#[tokio::test]
async fn test_cgi_disabled_serves_script_source() {
    let _serial = SERIAL.lock().await;
    let site = Site::new("disabled");
    let files = StaticFiles::new(site.path()).unwrap();

    let response = files.handle(get("/cgi-bin/env.sh")).await;

    assert_eq!(response.status, StatusCode::Ok);
    assert!(matches!(response.body, ResponseBody::File(_)));
}
