use std::io;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::net::Conn;
use crate::server::Server;

const BACKOFF_START: Duration = Duration::from_millis(5);
const BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Accept errors worth retrying: the listener itself is still fine.
fn is_temporary(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || matches!(err.raw_os_error(), Some(23) | Some(24))
}

/// Accepts connections and spawns a task per connection until the server
/// shuts down.
pub async fn run(server: &Server, listener: TcpListener) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on {}", addr);
    }
    let shutdown = server.shutdown_token().clone();
    let mut backoff = BACKOFF_START;

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("listener shutting down");
                return Err(Error::Closed);
            }
            res = listener.accept() => res,
        };

        let (socket, peer) = match accepted {
            Ok(pair) => {
                backoff = BACKOFF_START;
                pair
            }
            Err(err) if is_temporary(&err) => {
                warn!(%err, retry_in = ?backoff, "accept failed");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(BACKOFF_MAX);
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        if let Some(filter) = &server.filter {
            if !filter(peer) {
                debug!(peer = %peer, "connection filtered");
                continue;
            }
        }
        if let Err(err) = socket.set_nodelay(true) {
            debug!(peer = %peer, %err, "set_nodelay failed");
        }

        debug!(peer = %peer, "accepted connection");
        let server = server.clone();
        tokio::spawn(async move {
            let conn = Conn::new(socket).with_remote_addr(Some(peer));
            server.serve_conn(conn).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_accept_errors() {
        assert!(is_temporary(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_temporary(&io::Error::from_raw_os_error(24)));
        assert!(!is_temporary(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
