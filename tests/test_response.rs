use bytes::BytesMut;
use plow::http::request::Version;
use plow::http::response::{Response, ResponseBuilder, StatusCode};
use plow::http::writer::encode_response_head;
use plow::http::Cookie;

#[test]
fn test_status_code_as_u16() {
    assert_eq!(StatusCode::OK.as_u16(), 200);
    assert_eq!(StatusCode::CREATED.as_u16(), 201);
    assert_eq!(StatusCode::NO_CONTENT.as_u16(), 204);
    assert_eq!(StatusCode::BAD_REQUEST.as_u16(), 400);
    assert_eq!(StatusCode::NOT_FOUND.as_u16(), 404);
    assert_eq!(StatusCode::METHOD_NOT_ALLOWED.as_u16(), 405);
    assert_eq!(StatusCode::INTERNAL_SERVER_ERROR.as_u16(), 500);
}

#[test]
fn test_status_code_reason_phrase() {
    assert_eq!(StatusCode::OK.reason_phrase(), "OK");
    assert_eq!(StatusCode::NO_CONTENT.reason_phrase(), "No Content");
    assert_eq!(
        StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE.reason_phrase(),
        "Request Header Fields Too Large"
    );
    assert_eq!(StatusCode::new(599).reason_phrase(), "");
}

#[test]
fn test_status_code_classes() {
    assert!(StatusCode::OK.is_replyable());
    assert!(StatusCode::NOT_FOUND.is_replyable());
    assert!(!StatusCode::CONTINUE.is_replyable());
    assert!(!StatusCode::NO_CONTENT.is_replyable());
    assert!(!StatusCode::FOUND.is_replyable());

    assert!(StatusCode::SEE_OTHER.is_redirect());
    assert!(StatusCode::PERMANENT_REDIRECT.is_redirect());
    assert!(!StatusCode::NOT_MODIFIED.is_redirect());
}

#[test]
fn test_response_builder_basic() {
    let response = ResponseBuilder::new(StatusCode::OK)
        .body("Hello, World!")
        .build();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.content_length(), Some(13));
}

#[test]
fn test_response_builder_with_headers() {
    let response = ResponseBuilder::new(StatusCode::OK)
        .header("Content-Type", "text/plain")
        .header("X-Custom", "value")
        .build();

    assert_eq!(response.header.get("Content-Type"), Some("text/plain"));
    assert_eq!(response.header.get("X-Custom"), Some("value"));
    assert!(response.body.is_none());
}

#[test]
fn test_response_builder_skips_invalid_header() {
    let response = ResponseBuilder::new(StatusCode::OK)
        .header("Bad Name", "x")
        .build();

    assert!(response.header.is_empty());
}

#[test]
fn test_text_response() {
    let response = Response::text(StatusCode::NOT_FOUND, "missing");

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(
        response.header.get("Content-Type"),
        Some("text/plain; charset=utf-8")
    );
    assert_eq!(response.content_length(), Some(7));
}

#[test]
fn test_encode_response_head() {
    let response = ResponseBuilder::new(StatusCode::CREATED)
        .header("Content-Length", "0")
        .cookie(Cookie::new("a", "1").with_path("/"))
        .build();

    let mut buf = BytesMut::new();
    encode_response_head(&mut buf, Version::Http11, response.status, &response.header);
    let head = String::from_utf8(buf.to_vec()).unwrap();

    assert!(head.starts_with("HTTP/1.1 201 Created\r\n"));
    assert!(head.contains("Content-Length: 0\r\n"));
    assert!(head.contains("Set-Cookie: a=1; Path=/\r\n"));
    assert!(head.ends_with("\r\n\r\n"));
}
