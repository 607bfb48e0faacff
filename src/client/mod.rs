//! HTTP/1.1 client: the [`RoundTripper`] for single exchanges and the
//! [`Client`] wrapper that follows redirects and keeps cookies.

pub mod request;
pub mod response;
pub mod transport;

pub use request::ClientRequest;
pub use response::{ClientResponse, ResponseBody};
pub use transport::RoundTripper;

use std::sync::Arc;

use crate::context::Context;
use crate::error::{Error, Op, Part, Result};
use crate::http::cookie_jar::CookieJar;
use crate::http::request::Method;
use crate::http::response::StatusCode;

/// Default cap on followed redirects.
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// A [`RoundTripper`] that follows redirects and, with a jar attached,
/// stores and replays cookies.
pub struct Client {
    transport: RoundTripper,
    jar: Option<Arc<CookieJar>>,
    max_redirects: usize,
}

impl Client {
    pub fn new(transport: RoundTripper) -> Self {
        Self {
            transport,
            jar: None,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }

    pub fn with_cookie_jar(mut self, jar: Arc<CookieJar>) -> Self {
        self.jar = Some(jar);
        self
    }

    pub fn with_max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    pub fn transport(&self) -> &RoundTripper {
        &self.transport
    }

    pub fn cookie_jar(&self) -> Option<&Arc<CookieJar>> {
        self.jar.as_ref()
    }

    /// Sends `req`, following up to `max_redirects` redirects.
    ///
    /// 301, 302 and 303 are retried as a bodyless `GET`. 307 and 308 keep
    /// the method and replay the body, which only works for bodies that can
    /// be cloned; otherwise the redirect response itself is returned.
    pub async fn send(&self, ctx: &Context, mut req: ClientRequest) -> Result<ClientResponse> {
        let mut redirects = 0;
        loop {
            let replay = req.body.as_ref().and_then(|b| b.try_clone());
            self.attach_cookies(&mut req).await;
            let mut resp = self.transport.round_trip(ctx, &mut req).await?;
            self.store_cookies(&req, &resp).await;

            if !resp.status.is_redirect() {
                return Ok(resp);
            }
            let Some(location) = resp.location().map(str::to_string) else {
                return Ok(resp);
            };
            let rewrite = matches!(
                resp.status,
                StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER
            );
            if !rewrite && req.method.is_postable() && replay.is_none() && req_had_body(&req) {
                return Ok(resp);
            }
            if redirects >= self.max_redirects {
                resp.close().await;
                return Err(Error::op(Op::Redirect, Error::other("too many redirects")));
            }
            redirects += 1;

            let next = req
                .url
                .join(&location)
                .map_err(|e| Error::op(Op::Redirect, Error::invalid(Part::Url, format!("{location:?}: {e}"))))?;
            tracing::debug!(status = resp.status.as_u16(), from = %req.url, to = %next, hop = redirects, "following redirect");
            resp.close().await;

            if next.origin() != req.url.origin() {
                req.header.remove("Authorization");
                req.header.remove("Proxy-Authorization");
            }
            req.url = next;
            if rewrite {
                if req.method != Method::HEAD {
                    req.method = Method::GET;
                }
                req.body = None;
                req.header.remove("Content-Length");
                req.header.remove("Transfer-Encoding");
                req.header.remove("Content-Type");
            } else {
                req.body = replay;
            }
            if self.jar.is_some() {
                req.header.clear_cookies();
            }
        }
    }

    async fn attach_cookies(&self, req: &mut ClientRequest) {
        let (Some(jar), Some(host)) = (&self.jar, req.url.host_str()) else {
            return;
        };
        for cookie in jar.cookies(host).await {
            if req.header.cookie(&cookie.name).is_none() {
                req.header.set_cookie(cookie);
            }
        }
    }

    async fn store_cookies(&self, req: &ClientRequest, resp: &ClientResponse) {
        let (Some(jar), Some(host)) = (&self.jar, req.url.host_str()) else {
            return;
        };
        jar.set_cookies(host, resp.header.cookies()).await;
    }
}

/// Whether the request went out with a body: the transport takes the body
/// and leaves the framing fields behind.
fn req_had_body(req: &ClientRequest) -> bool {
    req.header.contains("Transfer-Encoding")
        || req
            .header
            .get("Content-Length")
            .is_some_and(|n| n != "0")
}
