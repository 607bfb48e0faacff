//! Byte-stream plumbing under the HTTP layer.
//!
//! The protocol code never touches sockets directly. It works on a [`Conn`], a
//! boxed duplex stream with read/write deadlines, handed out by a [`Dialer`]
//! on the client side and by the accept loop on the server side.

pub mod conn;
pub mod dialer;
pub mod rewind;
pub mod tls;

pub use conn::{Conn, ConnIo, Stream, BUFFER_SIZE};
pub use dialer::{Dialer, TcpDialer};
pub use rewind::Rewind;
