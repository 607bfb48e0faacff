//! HTTP/1.x wire protocol.
//!
//! The layers, leaves first:
//!
//! - **`line`**: bounded line reads, token charset, Title-Case names
//! - **`parser`**: request/status lines and header blocks
//! - **`header`**, **`cookie`**, **`cookie_jar`**: header and cookie model
//! - **`framing`**, **`chunked`**, **`encoding`**: body delimitation and
//!   content codings
//! - **`body`**, **`writer`**: streaming body reader and writer chain
//! - **`request`**, **`response`**: server-side message types
//! - **`connection`**: the server's per-connection state machine
//!
//! Data flows through the server like this:
//!
//! ```text
//! socket ─▶ line reader ─▶ headline + header parser ─▶ framing
//!        ─▶ body (limit ∘ decoder ∘ chunked) ─▶ handler
//!        ─▶ response head ─▶ body sink (encoder ∘ chunked) ─▶ socket
//! ```
//!
//! The client in [`crate::client`] runs the same layers the other way
//! round.

pub mod body;
pub mod chunked;
pub mod connection;
pub mod cookie;
pub mod cookie_jar;
pub mod encoding;
pub mod framing;
pub mod header;
pub mod line;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;

pub use body::{Body, BodyReader};
pub use cookie::{Cookie, SameSite};
pub use cookie_jar::CookieJar;
pub use encoding::ContentEncoding;
pub use header::Header;
pub use request::{Method, Request, Version};
pub use response::{Response, ResponseBuilder, StatusCode};
pub use writer::{BodySink, BodyWriter, Full, StreamBody};
