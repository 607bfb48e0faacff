use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream;
use tracing_subscriber::EnvFilter;

use plow::config::Config;
use plow::http::request::Request;
use plow::http::response::{Response, ResponseBuilder, StatusCode};
use plow::http::writer::StreamBody;
use plow::server::{Handler, Server};
use plow::ws::{OpCode, Upgrader};

/// Demo routes: `/` says hello, `/echo` streams the request body back and
/// `/ws` echoes WebSocket messages.
struct Demo {
    upgrader: Upgrader,
}

impl Demo {
    async fn route(&self, req: &mut Request<'_>) -> Option<Response> {
        match req.path() {
            "/" => Some(Response::text(StatusCode::OK, "hello from plow\n")),
            "/echo" => {
                let body = match req.body.bytes().await {
                    Ok(body) => body,
                    Err(err) => {
                        tracing::warn!(%err, "reading echo body");
                        return Some(Response::error(StatusCode::BAD_REQUEST));
                    }
                };
                let content_type = req
                    .header
                    .get("Content-Type")
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let pieces = stream::iter([Ok::<Bytes, plow::Error>(body)]);
                Some(
                    ResponseBuilder::new(StatusCode::OK)
                        .header("Content-Type", content_type)
                        .writer(StreamBody::new(Box::pin(pieces)))
                        .build(),
                )
            }
            "/ws" => Some(self.upgrader.upgrade(req, |ws| async move {
                loop {
                    match ws.read_message().await {
                        Ok((op @ (OpCode::Text | OpCode::Binary), payload)) => {
                            if let Err(err) = ws.write_message(op, &payload).await {
                                tracing::debug!(%err, "websocket echo write failed");
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(err) => {
                            tracing::debug!(%err, "websocket echo finished");
                            break;
                        }
                    }
                }
            })),
            _ => Some(Response::not_found()),
        }
    }
}

impl Handler for Demo {
    fn handle<'a, 'c>(&'a self, req: &'a mut Request<'c>) -> BoxFuture<'a, Option<Response>> {
        Box::pin(self.route(req))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;
    let demo = Demo {
        upgrader: Upgrader::new(cfg.upgrader.clone()),
    };
    let server = Server::new(cfg.server.clone(), demo);
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;

    let on_signal = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            on_signal.shutdown();
        }
    });

    match server.serve(listener).await {
        Err(plow::Error::Closed) => Ok(()),
        Err(err) => Err(err.into()),
        Ok(()) => Ok(()),
    }
}
