use plow::client::ClientRequest;
use plow::http::cookie::{parse_cookie_header, parse_set_cookie, SameSite};
use plow::http::framing::framing;
use plow::http::request::Method;
use plow::http::{Cookie, Header};

#[test]
fn test_method_round_trip() {
    let methods = vec![
        ("GET", Method::GET),
        ("POST", Method::POST),
        ("PUT", Method::PUT),
        ("DELETE", Method::DELETE),
        ("HEAD", Method::HEAD),
        ("OPTIONS", Method::OPTIONS),
        ("PATCH", Method::PATCH),
        ("CONNECT", Method::CONNECT),
        ("TRACE", Method::TRACE),
    ];

    for (method_str, expected_method) in methods {
        assert_eq!(Method::from_str(method_str), Some(expected_method));
        assert_eq!(expected_method.as_str(), method_str);
    }
    assert_eq!(Method::from_str("INVALID"), None);
}

#[test]
fn test_postable_methods() {
    assert!(Method::POST.is_postable());
    assert!(Method::PATCH.is_postable());
    assert!(!Method::GET.is_postable());
    assert!(!Method::HEAD.is_postable());
}

#[test]
fn test_header_names_are_case_insensitive() {
    let mut header = Header::new();
    header.set("content-type", "application/json").unwrap();

    assert_eq!(header.get("Content-Type"), Some("application/json"));
    assert_eq!(header.get("CONTENT-TYPE"), Some("application/json"));
    assert!(header.contains("content-type"));
    assert_eq!(header.get("Missing"), None);
}

#[test]
fn test_header_rejects_bad_fields() {
    let mut header = Header::new();

    assert!(header.set("Bad Name", "x").is_err());
    assert!(header.set("X-Inject", "a\r\nb").is_err());
    assert!(header.set("Cookie", "a=1").is_err());
    assert!(header.is_empty());
}

#[test]
fn test_header_tokens() {
    let mut header = Header::new();
    header.set("Connection", "keep-alive, Upgrade").unwrap();

    assert!(header.has_token("Connection", "upgrade"));
    assert!(header.has_token("connection", "KEEP-ALIVE"));
    assert!(!header.has_token("Connection", "close"));
}

#[test]
fn test_framing_from_content_length() {
    let mut header = Header::new();
    header.set("Content-Length", "42").unwrap();

    let f = framing(&header).unwrap();
    assert!(!f.chunked);
    assert_eq!(f.length, 42);
}

#[test]
fn test_framing_chunked_over_length() {
    let mut header = Header::new();
    header.set("Content-Length", "42").unwrap();
    header.set("Transfer-Encoding", "chunked").unwrap();

    assert!(framing(&header).unwrap().chunked);
}

#[test]
fn test_client_request_builders() {
    let req = ClientRequest::get("http://example.com/path?x=1")
        .unwrap()
        .with_header("User-Agent", "Test")
        .unwrap()
        .with_cookie(Cookie::new("session", "abc"));

    assert_eq!(req.method, Method::GET);
    assert_eq!(req.url.path(), "/path");
    assert_eq!(req.header.get("User-Agent"), Some("Test"));
    assert_eq!(req.header.cookie("session").map(|c| c.value.as_str()), Some("abc"));
    assert!(req.body.is_none());
}

#[test]
fn test_client_request_post_body() {
    let req = ClientRequest::post("http://localhost:3000/api/data", "{\"a\":1}").unwrap();

    assert_eq!(req.method, Method::POST);
    assert_eq!(req.body.as_ref().and_then(|b| b.content_length()), Some(7));
}

#[test]
fn test_client_request_invalid_header() {
    let res = ClientRequest::get("http://example.com/")
        .unwrap()
        .with_header("X-Bad", "line\nbreak");

    assert!(res.is_err());
}

#[test]
fn test_cookie_header_parsing() {
    let cookies = parse_cookie_header("a=1; b=\"two\"; flag").unwrap();

    assert_eq!(cookies.len(), 3);
    assert_eq!(cookies[1].value, "two");
    assert_eq!(cookies[2].name, "flag");
    assert_eq!(cookies[2].value, "");
}

#[test]
fn test_set_cookie_attributes() {
    let cookie =
        parse_set_cookie("id=42; Domain=.Example.com; Path=/app; HttpOnly; Secure; SameSite=Lax")
            .unwrap();

    assert_eq!(cookie.name, "id");
    assert_eq!(cookie.value, "42");
    assert_eq!(cookie.domain.as_deref(), Some("example.com"));
    assert_eq!(cookie.path.as_deref(), Some("/app"));
    assert!(cookie.http_only);
    assert!(cookie.secure);
    assert_eq!(cookie.same_site, Some(SameSite::Lax));
}

#[test]
fn test_set_cookie_max_age_zero_deletes() {
    let cookie = parse_set_cookie("id=42; Max-Age=0").unwrap();
    assert_eq!(cookie.max_age, -1);
    assert_eq!(cookie.to_set_cookie(), "id=42; Max-Age=0");
}

#[test]
fn test_set_cookie_missing_equals() {
    assert!(parse_set_cookie("nonsense").is_err());
}
