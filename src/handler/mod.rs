//! Request handlers.
//!
//! A [`Handler`] turns a [`Request`] into a [`Response`]. The request
//! arrives once its headers are in; its body is pulled from `Request::body`
//! while the connection is still receiving it. The
//! connection driver owns everything else: parsing, framing, keep-alive
//! and timeouts.
//!
//! Any async closure taking a `Request` is a handler:
//!
//! ```
//! # use hppt::handler::Handler;
//! # use hppt::http::response::Response;
//! # use hppt::http::request::Request;
//! fn assert_handler<H: Handler>(_: &H) {}
//!
//! let hello = |_req: Request| async { Response::ok("hello\n") };
//! assert_handler(&hello);
//! ```

pub mod cgi;
pub mod static_files;

use std::future::Future;

use crate::http::request::Request;
use crate::http::response::Response;

pub use static_files::StaticFiles;

pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: Request) -> impl Future<Output = Response> + Send;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send,
{
    fn handle(&self, request: Request) -> impl Future<Output = Response> + Send {
        self(request)
    }
}
