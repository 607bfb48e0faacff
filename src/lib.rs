//! Plow - HTTP/1.x and WebSocket stack
//!
//! Core library: wire parsers and codecs, the server connection loop, the
//! client round tripper with proxy traversal, and the WebSocket layer.

pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod net;
pub mod proxy;
pub mod server;
pub mod ws;

pub use context::Context;
pub use error::{Error, ErrorKind, Result};
