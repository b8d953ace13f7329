//! hppt - incremental HTTP/1.1 server
//!
//! Core library: request parsing, response framing and the connection
//! driver, plus a static file handler.

pub mod config;
pub mod handler;
pub mod http;
pub mod server;
