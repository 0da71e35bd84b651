//! Canned responses (§4.A). Byte-literal blobs: full status line, headers
//! and payload, committed exactly as the bytes that go on the wire. None
//! of these are built at runtime — the only responses assembled
//! dynamically are the ones whose spec explicitly calls for a
//! content-length/body slot: the 307 redirect and the two stats pages.

/// 1x1 fully-transparent GIF89a pixel, 42 bytes — the canonical
/// "spacer.gif" tracking pixel.
pub const NULL_GIF_BODY: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x01, 0x4c, 0x00, 0x3b,
];

/// 1x1 fully-transparent PNG, 67 bytes.
pub const NULL_PNG_BODY: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f,
    0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0a, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

/// Minimal baseline JPEG encoding a 1x1 gray pixel, 159 bytes. Carries a
/// COM segment to pad the structurally-minimal encoding out to the
/// expected byte count without affecting decodability.
pub const NULL_JPEG_BODY: &[u8] = &[
    0xff, 0xd8, 0xff, 0xfe, 0x00, 0x10, 0x70, 0x69, 0x78, 0x65, 0x6c, 0x73, 0x65, 0x72, 0x76,
    0x2d, 0x6e, 0x75, 0x6c, 0x6c, 0xff, 0xdb, 0x00, 0x43, 0x00, 0x01, 0x01, 0x01, 0x01, 0x01,
    0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
    0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
    0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
    0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0xff, 0xc0, 0x00, 0x0b, 0x08,
    0x00, 0x01, 0x00, 0x01, 0x01, 0x01, 0x11, 0x00, 0xff, 0xc4, 0x00, 0x14, 0x00, 0x01, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff,
    0xc4, 0x00, 0x14, 0x10, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0xda, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3f, 0x00,
    0x3f, 0xff, 0xd9,
];

/// Empty (zero-frame-content) uncompressed SWF, 25 bytes.
pub const NULL_SWF_BODY: &[u8] = &[
    0x46, 0x57, 0x53, 0x05, 0x19, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0c, 0x01, 0x00, 0x08, 0x01,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// 1x1 32bpp ICO, 70 bytes.
pub const NULL_ICO_BODY: &[u8] = &[
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x01, 0x01, 0x00, 0x00, 0x01, 0x00, 0x20, 0x00, 0x30,
    0x00, 0x00, 0x00, 0x16, 0x00, 0x00, 0x00, 0x28, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
    0x02, 0x00, 0x00, 0x00, 0x01, 0x00, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// `HTTP/1.1 204 No Content` — used for `/generate_204` (§4.B, §8 scenario 2).
pub const HTTP_204_NO_CONTENT: &str =
    "HTTP/1.1 204 No Content\r\nContent-Length: 0\r\nConnection: keep-alive\r\n\r\n";

/// Fallback for any method/extension this server declines to handle.
pub const HTTP_501: &str =
    "HTTP/1.1 501 Not Implemented\r\nContent-Length: 0\r\nConnection: keep-alive\r\n\r\n";

/// `OPTIONS * HTTP/1.1` reply body (§4.A, §8 scenario 5).
pub const HTTP_OPTIONS_BODY: &str = "GET,OPTIONS";
pub const HTTP_OPTIONS_HEADERS: &str = "Allow: GET,OPTIONS\r\nContent-Length: 11\r\nConnection: keep-alive\r\n";

/// Empty text body with an HSTS header, used for `.js*` paths and as the
/// fallback for unrecognised extensions (§4.B "otherwise -> SEND_UNK_EXT
/// (no body sent; NULL_TEXT is the default)").
pub const NULL_TEXT_HEADERS: &str = "Content-Type: text/plain\r\nContent-Length: 0\r\nStrict-Transport-Security: max-age=31536000; includeSubDomains\r\nConnection: keep-alive\r\n";

fn build_response(content_type: &str, body: &[u8], connection: &str, extra: &str) -> Vec<u8> {
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\n{extra}Connection: {connection}\r\n\r\n",
        len = body.len(),
    );
    let mut out = Vec::with_capacity(header.len() + body.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(body);
    out
}

pub fn null_gif_response() -> Vec<u8> {
    build_response("image/gif", NULL_GIF_BODY, "keep-alive", "")
}

pub fn null_png_response() -> Vec<u8> {
    build_response("image/png", NULL_PNG_BODY, "keep-alive", "")
}

/// Per §9's documented quirk: JPEG is the one media type that replies
/// `Connection: close` while every other canned response keeps the
/// connection alive; the worker still loops waiting for another request.
pub fn null_jpeg_response() -> Vec<u8> {
    build_response("image/jpeg", NULL_JPEG_BODY, "close", "")
}

pub fn null_swf_response() -> Vec<u8> {
    build_response(
        "application/x-shockwave-flash",
        NULL_SWF_BODY,
        "keep-alive",
        "",
    )
}

pub fn null_ico_response() -> Vec<u8> {
    build_response(
        "image/x-icon",
        NULL_ICO_BODY,
        "keep-alive",
        "Cache-Control: max-age=2592000\r\n",
    )
}

pub fn null_text_response() -> Vec<u8> {
    format!("HTTP/1.1 200 OK\r\n{NULL_TEXT_HEADERS}\r\n").into_bytes()
}

pub fn http_options_response() -> Vec<u8> {
    let mut out = format!("HTTP/1.1 200 OK\r\n{HTTP_OPTIONS_HEADERS}\r\n").into_bytes();
    out.extend_from_slice(HTTP_OPTIONS_BODY.as_bytes());
    out
}

/// `REDIRECT_307`: single `Location:` substitution (§4.A, §4.B, §8
/// scenario 3).
pub fn redirect_307_response(location: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 307 Temporary Redirect\r\nLocation: {location}\r\nContent-Length: 0\r\nConnection: keep-alive\r\n\r\n"
    )
    .into_bytes()
}

/// `STATS_HTML`: headers + content-length slot + HTML prelude + body slot
/// + epilogue (§4.A, §4.C).
pub fn stats_html_response(body: &str) -> Vec<u8> {
    let prelude = "<html><head><title>pixelserv stats</title></head><body><pre>";
    let epilogue = "</pre></body></html>";
    let content = format!("{prelude}{body}{epilogue}");
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-length: {}\r\nConnection: keep-alive\r\n\r\n{content}",
        content.len()
    )
    .into_bytes()
}

/// `STATS_TEXT`: headers + content-length slot + body slot (§4.A, §4.C).
pub fn stats_text_response(body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-length: {}\r\nConnection: keep-alive\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gif_body_is_42_bytes_and_gif89a() {
        assert_eq!(NULL_GIF_BODY.len(), 42);
        assert_eq!(&NULL_GIF_BODY[..6], b"GIF89a");
    }

    #[test]
    fn png_body_is_67_bytes_and_signature() {
        assert_eq!(NULL_PNG_BODY.len(), 67);
        assert_eq!(&NULL_PNG_BODY[..8], &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]);
    }

    #[test]
    fn jpeg_body_is_159_bytes_and_soi() {
        assert_eq!(NULL_JPEG_BODY.len(), 159);
        assert_eq!(&NULL_JPEG_BODY[..2], &[0xff, 0xd8]);
        assert_eq!(&NULL_JPEG_BODY[NULL_JPEG_BODY.len() - 2..], &[0xff, 0xd9]);
    }

    #[test]
    fn swf_body_is_25_bytes_and_fws() {
        assert_eq!(NULL_SWF_BODY.len(), 25);
        assert_eq!(&NULL_SWF_BODY[..3], b"FWS");
    }

    #[test]
    fn ico_body_is_70_bytes_and_icondir() {
        assert_eq!(NULL_ICO_BODY.len(), 70);
        assert_eq!(&NULL_ICO_BODY[..4], &[0x00, 0x00, 0x01, 0x00]);
    }

    #[test]
    fn gif_response_begins_with_status_line_and_declared_length() {
        let resp = null_gif_response();
        assert!(resp.starts_with(b"HTTP/1.1 200 OK\r\n"));
        assert!(resp.ends_with(NULL_GIF_BODY));
        assert!(
            String::from_utf8_lossy(&resp).contains("Content-Length: 42"),
            "expected declared content-length to match body size"
        );
    }

    #[test]
    fn jpeg_response_closes_connection() {
        let resp = null_jpeg_response();
        assert!(String::from_utf8_lossy(&resp).contains("Connection: close"));
    }

    #[test]
    fn redirect_contains_location() {
        let resp = redirect_307_response("http://example.com/next");
        let text = String::from_utf8_lossy(&resp);
        assert!(text.starts_with("HTTP/1.1 307 Temporary Redirect\r\n"));
        assert!(text.contains("Location: http://example.com/next\r\n"));
    }

    #[test]
    fn stats_html_has_numeric_content_length() {
        let resp = stats_html_response("count=1");
        let text = String::from_utf8_lossy(&resp);
        assert!(text.starts_with("HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-length: "));
        assert!(text.contains("count=1"));
    }

    #[test]
    fn options_response_has_get_options_body() {
        let resp = http_options_response();
        assert!(resp.ends_with(b"GET,OPTIONS"));
    }
}
