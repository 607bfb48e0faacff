use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream;
use plow::client::{Client, ClientRequest, RoundTripper};
use plow::config::{ServerConfig, TransportConfig};
use plow::error::{ErrorKind, Op};
use plow::http::request::Method;
use plow::http::{Cookie, CookieJar, Request, Response, ResponseBuilder, StatusCode, StreamBody};
use plow::server::{Handler, Server};
use plow::Context;
use tokio::net::TcpListener;

struct Site {
    hits: Arc<AtomicUsize>,
}

fn redirect(status: StatusCode, to: &str) -> Response {
    ResponseBuilder::new(status).header("Location", to).build()
}

impl Handler for Site {
    fn handle<'a, 'c>(&'a self, req: &'a mut Request<'c>) -> BoxFuture<'a, Option<Response>> {
        Box::pin(async move {
            self.hits.fetch_add(1, Ordering::SeqCst);
            let path = req.path().to_string();
            if let Some(port) = path.strip_prefix("/hop/") {
                let to = format!("http://127.0.0.1:{port}/auth");
                return Some(redirect(StatusCode::FOUND, &to));
            }
            let resp = match path.as_str() {
                "/loop" => redirect(StatusCode::FOUND, "/loop"),
                "/hop" => redirect(StatusCode::FOUND, "/auth"),
                "/auth" => {
                    let auth = req.header.get("Authorization").unwrap_or("none").to_string();
                    Response::text(StatusCode::OK, auth)
                }
                "/submit" => redirect(StatusCode::SEE_OTHER, "/method"),
                "/method" => Response::text(StatusCode::OK, req.method.as_str()),
                "/tmp" => redirect(StatusCode::TEMPORARY_REDIRECT, "/echo"),
                "/echo" => {
                    let body = req.body.bytes().await.unwrap_or_default();
                    let text = format!("{}:{}", req.method, String::from_utf8_lossy(&body));
                    Response::text(StatusCode::OK, text)
                }
                "/login" => ResponseBuilder::new(StatusCode::FOUND)
                    .header("Location", "/whoami")
                    .cookie(Cookie::new("sid", "42").with_path("/"))
                    .build(),
                "/whoami" => {
                    let who = req
                        .header
                        .cookie("sid")
                        .map(|c| c.value.clone())
                        .unwrap_or_else(|| "anon".to_string());
                    Response::text(StatusCode::OK, who)
                }
                "/slow" => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Response::text(StatusCode::OK, "late")
                }
                _ => Response::text(StatusCode::OK, "hello ".repeat(50)),
            };
            Some(resp)
        })
    }
}

async fn start() -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let server = Server::new(ServerConfig::default(), Site { hits: hits.clone() });
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    (addr, hits)
}

fn client() -> Client {
    Client::new(RoundTripper::new(TransportConfig::default()).unwrap())
}

#[tokio::test]
async fn test_get_decodes_compressed_body() {
    let (addr, _) = start().await;
    let mut resp = client()
        .send(&Context::new(), ClientRequest::get(&format!("http://{addr}/")).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status, StatusCode::OK);
    assert!(resp.header.get("Content-Encoding").is_none());
    assert_eq!(resp.text().await.unwrap(), "hello ".repeat(50));
}

#[tokio::test]
async fn test_redirect_cap() {
    let (addr, hits) = start().await;
    let err = client()
        .send(&Context::new(), ClientRequest::get(&format!("http://{addr}/loop")).unwrap())
        .await
        .unwrap_err();

    assert_eq!(err.operation(), Some(Op::Redirect));
    assert_eq!(err.to_string(), "redirect: too many redirects");
    assert_eq!(hits.load(Ordering::SeqCst), 11);
}

#[tokio::test]
async fn test_custom_redirect_cap() {
    let (addr, hits) = start().await;
    let err = client()
        .with_max_redirects(2)
        .send(&Context::new(), ClientRequest::get(&format!("http://{addr}/loop")).unwrap())
        .await
        .unwrap_err();

    assert_eq!(err.operation(), Some(Op::Redirect));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_see_other_switches_to_get() {
    let (addr, _) = start().await;
    let req = ClientRequest::post(&format!("http://{addr}/submit"), "payload").unwrap();
    let mut resp = client().send(&Context::new(), req).await.unwrap();

    assert_eq!(resp.text().await.unwrap(), "GET");
}

#[tokio::test]
async fn test_temporary_redirect_replays_body() {
    let (addr, _) = start().await;
    let req = ClientRequest::post(&format!("http://{addr}/tmp"), "data").unwrap();
    let mut resp = client().send(&Context::new(), req).await.unwrap();

    assert_eq!(resp.text().await.unwrap(), "POST:data");
}

#[tokio::test]
async fn test_temporary_redirect_with_streamed_body_is_returned() {
    let (addr, _) = start().await;
    let body = StreamBody::new(Box::pin(stream::iter([Ok::<_, plow::Error>(Bytes::from_static(b"once"))])));
    let req = ClientRequest::new(Method::POST, &format!("http://{addr}/tmp"))
        .unwrap()
        .with_body(body);
    let resp = client().send(&Context::new(), req).await.unwrap();

    assert_eq!(resp.status, StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(resp.location(), Some("/echo"));
}

#[tokio::test]
async fn test_cookie_jar_follows_redirect() {
    let (addr, _) = start().await;
    let jar = Arc::new(CookieJar::new());
    let client = client().with_cookie_jar(jar.clone());

    let mut resp = client
        .send(&Context::new(), ClientRequest::get(&format!("http://{addr}/login")).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "42");
    assert_eq!(jar.cookie("127.0.0.1", "sid").await.map(|c| c.value), Some("42".to_string()));
}

#[tokio::test]
async fn test_without_jar_cookies_are_not_kept() {
    let (addr, _) = start().await;
    let mut resp = client()
        .send(&Context::new(), ClientRequest::get(&format!("http://{addr}/login")).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.text().await.unwrap(), "anon");
}

#[tokio::test]
async fn test_credentials_stay_with_their_origin() {
    let (a, _) = start().await;
    let (b, b_hits) = start().await;

    let url = format!("http://user:secret@{a}/hop/{}", b.port());
    let mut resp = client()
        .send(&Context::new(), ClientRequest::get(&url).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.text().await.unwrap(), "none");
    assert_eq!(b_hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_credentials_follow_same_origin_redirect() {
    let (addr, _) = start().await;
    let url = format!("http://user:secret@{addr}/hop");
    let mut resp = client()
        .send(&Context::new(), ClientRequest::get(&url).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.text().await.unwrap(), "Basic dXNlcjpzZWNyZXQ=");
}

#[tokio::test]
async fn test_response_body_over_limit() {
    let (addr, _) = start().await;
    let transport = RoundTripper::new(TransportConfig {
        max_body_size: 10,
        ..TransportConfig::default()
    })
    .unwrap();
    let mut req = ClientRequest::post(&format!("http://{addr}/echo"), "x".repeat(64)).unwrap();
    let err = transport.round_trip(&Context::new(), &mut req).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TooLarge);
}

#[tokio::test]
async fn test_response_head_over_limit() {
    let (addr, _) = start().await;
    let transport = RoundTripper::new(TransportConfig {
        head_max_length: 64,
        ..TransportConfig::default()
    })
    .unwrap();
    let mut req = ClientRequest::get(&format!("http://{addr}/")).unwrap();
    let err = transport.round_trip(&Context::new(), &mut req).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TooLarge);
    assert_eq!(err.operation(), Some(Op::Read));
}

#[tokio::test]
async fn test_chunked_request_body() {
    let (addr, _) = start().await;
    let pieces = [
        Ok::<_, plow::Error>(Bytes::from_static(b"ab")),
        Ok(Bytes::from_static(b"cd")),
    ];
    let req = ClientRequest::new(Method::PUT, &format!("http://{addr}/echo"))
        .unwrap()
        .with_body(StreamBody::new(Box::pin(stream::iter(pieces))));
    let mut resp = client().send(&Context::new(), req).await.unwrap();

    assert_eq!(resp.text().await.unwrap(), "PUT:abcd");
}

#[tokio::test]
async fn test_expect_continue_round_trip() {
    let (addr, _) = start().await;
    let transport = RoundTripper::new(TransportConfig::default()).unwrap();
    let mut req = ClientRequest::post(&format!("http://{addr}/echo"), "waited")
        .unwrap()
        .with_header("Expect", "100-continue")
        .unwrap();
    let mut resp = transport.round_trip(&Context::new(), &mut req).await.unwrap();

    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "POST:waited");
}

#[tokio::test]
async fn test_head_has_no_body() {
    let (addr, _) = start().await;
    let transport = RoundTripper::new(TransportConfig::default()).unwrap();
    let mut req = ClientRequest::new(Method::HEAD, &format!("http://{addr}/")).unwrap();
    let resp = transport.round_trip(&Context::new(), &mut req).await.unwrap();

    assert_eq!(resp.status, StatusCode::OK);
    assert!(resp.body.is_none());
}

#[tokio::test]
async fn test_read_timeout() {
    let (addr, _) = start().await;
    let transport = RoundTripper::new(TransportConfig {
        read_timeout: Some(Duration::from_millis(100)),
        ..TransportConfig::default()
    })
    .unwrap();
    let mut req = ClientRequest::get(&format!("http://{addr}/slow")).unwrap();
    let err = transport.round_trip(&Context::new(), &mut req).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(err.operation(), Some(Op::Read));
}

#[tokio::test]
async fn test_cancelled_context() {
    let (addr, _) = start().await;
    let ctx = Context::new();
    ctx.cancel();
    let err = client()
        .send(&ctx, ClientRequest::get(&format!("http://{addr}/")).unwrap())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
}

#[tokio::test]
async fn test_unsupported_scheme() {
    let err = client()
        .send(&Context::new(), ClientRequest::get("ftp://127.0.0.1/").unwrap())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidFormat);
}
