use std::collections::HashMap;
use std::net::IpAddr;
use std::time::SystemTime;

use tokio::sync::RwLock;

use crate::http::cookie::Cookie;

/// Multi-label public suffixes recognised when computing a registrable
/// domain. Single-label suffixes (`com`, `org`, ...) need no entry.
const MULTI_LABEL_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "ltd.uk", "plc.uk", "me.uk", "net.uk",
    "com.au", "net.au", "org.au", "edu.au", "gov.au",
    "co.jp", "ne.jp", "or.jp", "ac.jp", "go.jp",
    "co.nz", "org.nz", "net.nz",
    "co.kr", "or.kr",
    "com.br", "net.br", "org.br",
    "com.cn", "net.cn", "org.cn", "gov.cn",
    "co.in", "net.in", "org.in",
    "com.mx", "com.tr", "com.tw", "com.hk", "com.sg",
    "co.za", "co.il",
    "github.io", "gitlab.io", "herokuapp.com", "appspot.com", "blogspot.com",
    "cloudfront.net", "azurewebsites.net", "vercel.app", "netlify.app", "pages.dev",
];

/// Registrable domain (eTLD+1) of `host`. IP addresses and single-label
/// hosts come back unchanged; a port is stripped.
pub fn etld_plus_one(host: &str) -> String {
    let host = strip_port(host).trim_end_matches('.').to_ascii_lowercase();
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if bare.parse::<IpAddr>().is_ok() {
        return bare.to_string();
    }
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }
    let keep = if MULTI_LABEL_SUFFIXES
        .iter()
        .any(|suffix| host.ends_with(suffix) && host[..host.len() - suffix.len()].ends_with('.'))
    {
        3
    } else {
        2
    };
    if labels.len() <= keep {
        return host;
    }
    labels[labels.len() - keep..].join(".")
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Cookies partitioned by registrable domain.
///
/// Reads share the lock; expired cookies found while reading are removed
/// afterwards under the write lock.
#[derive(Debug, Default)]
pub struct CookieJar {
    entries: RwLock<HashMap<String, HashMap<String, Cookie>>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_cookie(&self, host: &str, cookie: Cookie) {
        let key = etld_plus_one(host);
        let mut entries = self.entries.write().await;
        let bucket = entries.entry(key).or_default();
        if cookie.is_expired(SystemTime::now()) {
            bucket.remove(&cookie.name);
        } else {
            bucket.insert(cookie.name.clone(), cookie);
        }
    }

    pub async fn set_cookies<'a>(&self, host: &str, cookies: impl IntoIterator<Item = &'a Cookie>) {
        for cookie in cookies {
            self.set_cookie(host, cookie.clone()).await;
        }
    }

    pub async fn cookie(&self, host: &str, name: &str) -> Option<Cookie> {
        let key = etld_plus_one(host);
        let found = {
            let entries = self.entries.read().await;
            entries.get(&key).and_then(|b| b.get(name)).cloned()
        };
        match found {
            Some(c) if c.is_expired(SystemTime::now()) => {
                self.remove(host, name).await;
                None
            }
            other => other,
        }
    }

    /// Live cookies for `host`'s partition.
    pub async fn cookies(&self, host: &str) -> Vec<Cookie> {
        let key = etld_plus_one(host);
        let now = SystemTime::now();
        let mut live = Vec::new();
        let mut expired = Vec::new();
        {
            let entries = self.entries.read().await;
            if let Some(bucket) = entries.get(&key) {
                for cookie in bucket.values() {
                    if cookie.is_expired(now) {
                        expired.push(cookie.name.clone());
                    } else {
                        live.push(cookie.clone());
                    }
                }
            }
        }
        if !expired.is_empty() {
            let mut entries = self.entries.write().await;
            if let Some(bucket) = entries.get_mut(&key) {
                for name in &expired {
                    bucket.remove(name);
                }
            }
        }
        live.sort_by(|a, b| a.name.cmp(&b.name));
        live
    }

    pub async fn remove(&self, host: &str, name: &str) -> Option<Cookie> {
        let key = etld_plus_one(host);
        self.entries.write().await.get_mut(&key).and_then(|b| b.remove(name))
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}
