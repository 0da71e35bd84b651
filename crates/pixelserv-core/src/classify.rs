//! Request Classifier (§4.B). Pure function over a single read of the
//! connection: parses the request line and headers, and decides which
//! canned response applies. Never returns a hard error — every input,
//! however malformed, maps onto some `StatusCode` (§7: "all errors
//! within a worker are recovered locally").

use std::collections::HashMap;

use crate::config::Config;
use crate::responses;
use crate::status::StatusCode;

/// A parsed request line + headers. Bodies are read separately by the
/// connection worker (§4.G); the classifier only ever looks at the head.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub method: String,
    pub path: String,
    pub version: String,
    pub headers: HashMap<String, String>,
    /// Whatever bytes followed the `\r\n\r\n` header terminator in the
    /// initial read, i.e. the leading slice of a POST body that already
    /// arrived in the same read as the header (the common case for tiny
    /// beacon POSTs). `socket_handler.c` calls this `body`/`body_len` and
    /// subtracts it from the socket read plan (`recv_len = body_len - 4`)
    /// instead of re-requesting it from the kernel.
    pub body_prefix: Vec<u8>,
}

/// Byte offset of the start of `\r\n\r\n` in `buf`, found on the raw bytes
/// rather than the lossily-decoded text so a binary POST body already
/// present in the buffer isn't corrupted by the UTF-8 substitution.
fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Split `buf` at the first `\r\n\r\n`, tokenize the request line into
/// `METHOD SP PATH SP VERSION`, and lower-case every header name. Returns
/// `None` only when there isn't even a request line to tokenize.
pub fn parse_request(buf: &[u8]) -> Option<ParsedRequest> {
    let header_end = find_header_end(buf);
    let head_bytes = match header_end {
        Some(idx) => &buf[..idx],
        None => buf,
    };
    let text = String::from_utf8_lossy(head_bytes);
    let mut lines = text.split("\r\n");
    let request_line = lines.next()?;
    let mut tokens = request_line.split(' ').filter(|t| !t.is_empty());
    let method = tokens.next()?.to_string();
    let path = tokens.next().unwrap_or("").to_string();
    let version = tokens.next().unwrap_or("").to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let body_prefix = match header_end {
        Some(idx) => buf[idx + 4..].to_vec(),
        None => Vec::new(),
    };

    Some(ParsedRequest {
        method,
        path,
        version,
        headers,
        body_prefix,
    })
}

/// Outcome of classification: the status to report to the stats
/// collector, and the response bytes to write (empty when nothing should
/// be sent, e.g. `SEND_UNK_EXT`'s "no body sent" case — `NULL_TEXT` is
/// only the *default* when the caller chooses to send something anyway).
pub struct ClassifyResult {
    pub status: StatusCode,
    pub response: Vec<u8>,
}

impl ClassifyResult {
    fn new(status: StatusCode, response: Vec<u8>) -> Self {
        Self { status, response }
    }

    fn empty(status: StatusCode) -> Self {
        Self::new(status, Vec::new())
    }
}

/// Percent-decode a single pass: `%XX` → byte, everything else passed
/// through unchanged. Malformed escapes are left as-is rather than
/// rejected, matching the "never hard-fail" classifier contract.
pub fn url_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = &input[i + 1..i + 3];
            if let Ok(byte) = u8::from_str_radix(hex, 16) {
                out.push(byte as char);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i] as char);
        i += 1;
    }
    out
}

fn find_last_embedded_url(decoded: &str) -> Option<&str> {
    let mut best: Option<usize> = None;
    for marker in ["http://", "https://"] {
        if let Some(pos) = decoded.rfind(marker) {
            best = Some(best.map_or(pos, |b| b.max(pos)));
        }
    }
    best.map(|pos| &decoded[pos..])
}

fn classify_extension(path: &str) -> ClassifyResult {
    if !path.contains('/') {
        return ClassifyResult::empty(StatusCode::SendBadPath);
    }
    let segment = path.rsplit('/').next().unwrap_or("");
    let stripped = match segment.find(['?', '#', ';', '=']) {
        Some(idx) => &segment[..idx],
        None => segment,
    };
    if !stripped.contains('.') {
        return ClassifyResult::empty(StatusCode::SendNoExt);
    }
    let ext = stripped.rsplit('.').next().unwrap_or("").to_ascii_lowercase();

    match ext.as_str() {
        "gif" => ClassifyResult::new(StatusCode::SendGif, responses::null_gif_response()),
        "png" => ClassifyResult::new(StatusCode::SendPng, responses::null_png_response()),
        "swf" => ClassifyResult::new(StatusCode::SendSwf, responses::null_swf_response()),
        "ico" => ClassifyResult::new(StatusCode::SendIco, responses::null_ico_response()),
        _ if ext.starts_with("jp") => {
            ClassifyResult::new(StatusCode::SendJpg, responses::null_jpeg_response())
        }
        _ if ext.starts_with("js") => {
            ClassifyResult::new(StatusCode::SendTxt, responses::null_text_response())
        }
        _ => ClassifyResult::empty(StatusCode::SendUnkExt),
    }
}

/// Classify a GET whose path didn't match any of the fixed routes
/// (`/log=`, stats URLs, `/generate_204`): redirect-target detection then
/// extension classification (§4.B).
fn classify_get_path(req: &ParsedRequest, cfg: &Config) -> ClassifyResult {
    if !cfg.decode_redirects {
        return classify_extension(&req.path);
    }

    let decoded_once = url_decode(&req.path);
    let decoded_twice = url_decode(&decoded_once);

    if let Some(target) = find_last_embedded_url(&decoded_twice) {
        let already_referred = req
            .headers
            .get("referer")
            .is_some_and(|referer| referer.contains(target));
        if !already_referred {
            return ClassifyResult::new(
                StatusCode::SendRedirect,
                responses::redirect_307_response(target),
            );
        }
    }

    classify_extension(&req.path)
}

/// Main entry point (§4.B). `stats_html`/`stats_text` are the
/// already-rendered bodies for the two stats pages (§4.C produces them;
/// the classifier just routes to them).
pub fn classify(
    req: &ParsedRequest,
    cfg: &Config,
    stats_html: impl FnOnce() -> String,
    stats_text: impl FnOnce() -> String,
) -> ClassifyResult {
    if req.method.is_empty() {
        return ClassifyResult::empty(StatusCode::FailGeneral);
    }

    match req.method.as_str() {
        "OPTIONS" => ClassifyResult::new(StatusCode::SendOptions, responses::http_options_response()),
        "HEAD" => ClassifyResult::new(StatusCode::SendHead, responses::HTTP_501.as_bytes().to_vec()),
        "POST" => ClassifyResult::new(StatusCode::SendPost, responses::HTTP_204_NO_CONTENT.as_bytes().to_vec()),
        "GET" => classify_get(req, cfg, stats_html, stats_text),
        _ => ClassifyResult::new(StatusCode::SendBad, responses::HTTP_501.as_bytes().to_vec()),
    }
}

fn classify_get(
    req: &ParsedRequest,
    cfg: &Config,
    stats_html: impl FnOnce() -> String,
    stats_text: impl FnOnce() -> String,
) -> ClassifyResult {
    if req.path.is_empty() {
        return ClassifyResult::empty(StatusCode::SendNoUrl);
    }

    if let Some(level_str) = req.path.strip_prefix("/log=") {
        return match level_str.parse::<i64>() {
            Ok(v) if (0..=i64::from(crate::config::LGG_DEBUG)).contains(&v) => {
                ClassifyResult::new(
                    StatusCode::ActionLogVerb(v as u8),
                    responses::HTTP_204_NO_CONTENT.as_bytes().to_vec(),
                )
            }
            _ => ClassifyResult::new(StatusCode::SendBad, responses::HTTP_501.as_bytes().to_vec()),
        };
    }

    if req.path == cfg.stats_html_url {
        return ClassifyResult::new(StatusCode::SendStats, responses::stats_html_response(&stats_html()));
    }

    if req.path == cfg.stats_text_url {
        return ClassifyResult::new(
            StatusCode::SendStatsText,
            responses::stats_text_response(&stats_text()),
        );
    }

    if cfg.do_204 && req.path.eq_ignore_ascii_case("/generate_204") {
        return ClassifyResult::new(StatusCode::Send204, responses::HTTP_204_NO_CONTENT.as_bytes().to_vec());
    }

    classify_get_path(req, cfg)
}

/// How many more body bytes the worker should try to read for a POST
/// request, bounded by `MAX_HTTP_POST_LEN` (§4.B). Bytes beyond
/// `MAX_HTTP_POST_LEN - CHAR_BUF_SIZE` are discarded but still counted
/// toward `rx_total` by the caller.
pub fn post_read_plan(content_length: Option<usize>) -> usize {
    content_length
        .unwrap_or(0)
        .min(crate::config::MAX_HTTP_POST_LEN)
}

pub fn parse_content_length(headers: &HashMap<String, String>) -> Option<usize> {
    headers.get("content-length")?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> Config {
        Config::default()
    }

    #[test]
    fn parses_simple_get() {
        let req = parse_request(b"GET /track/pixel.gif HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/track/pixel.gif");
        assert_eq!(req.headers.get("host").unwrap(), "x");
    }

    #[test]
    fn missing_method_is_fail_general() {
        let req = ParsedRequest {
            method: String::new(),
            path: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            body_prefix: Vec::new(),
        };
        let result = classify(&req, &cfg(), || String::new(), || String::new());
        assert_eq!(result.status, StatusCode::FailGeneral);
    }

    #[test]
    fn gif_pixel_scenario() {
        let req = parse_request(b"GET /track/pixel.gif HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        let result = classify(&req, &cfg(), || String::new(), || String::new());
        assert_eq!(result.status, StatusCode::SendGif);
        assert!(result.response.ends_with(responses::NULL_GIF_BODY));
    }

    #[test]
    fn generate_204_scenario() {
        let req = parse_request(b"GET /generate_204 HTTP/1.1\r\n\r\n").unwrap();
        let result = classify(&req, &cfg(), || String::new(), || String::new());
        assert_eq!(result.status, StatusCode::Send204);
        assert!(String::from_utf8_lossy(&result.response).starts_with("HTTP/1.1 204"));
    }

    #[test]
    fn redirect_decode_scenario() {
        // %2533A%252F%252F unescapes twice to http://
        let req = parse_request(
            b"GET /r?u=http%253A%252F%252Fexample.com%252Fnext HTTP/1.1\r\n\r\n",
        )
        .unwrap();
        let result = classify(&req, &cfg(), || String::new(), || String::new());
        assert_eq!(result.status, StatusCode::SendRedirect);
        let text = String::from_utf8_lossy(&result.response);
        assert!(text.contains("Location: http://example.com/next\r\n"));
    }

    #[test]
    fn self_referer_suppresses_redirect() {
        let req = parse_request(
            b"GET /r?u=http%253A%252F%252Fexample.com%252Fnext HTTP/1.1\r\nReferer: http://example.com/next\r\n\r\n",
        )
        .unwrap();
        let result = classify(&req, &cfg(), || String::new(), || String::new());
        // falls through to extension classifier; "/r" segment has no '.'
        assert_eq!(result.status, StatusCode::SendNoExt);
    }

    #[test]
    fn options_scenario() {
        let req = parse_request(b"OPTIONS * HTTP/1.1\r\n\r\n").unwrap();
        let result = classify(&req, &cfg(), || String::new(), || String::new());
        assert_eq!(result.status, StatusCode::SendOptions);
        assert!(result.response.ends_with(b"GET,OPTIONS"));
    }

    #[test]
    fn log_verb_in_range() {
        let req = parse_request(b"GET /log=3 HTTP/1.1\r\n\r\n").unwrap();
        let result = classify(&req, &cfg(), || String::new(), || String::new());
        assert_eq!(result.status, StatusCode::ActionLogVerb(3));
    }

    #[test]
    fn log_verb_out_of_range_is_bad() {
        let req = parse_request(b"GET /log=99 HTTP/1.1\r\n\r\n").unwrap();
        let result = classify(&req, &cfg(), || String::new(), || String::new());
        assert_eq!(result.status, StatusCode::SendBad);
    }

    #[test]
    fn no_extension_and_no_slash() {
        let req = ParsedRequest {
            method: "GET".to_string(),
            path: "noslash".to_string(),
            version: "HTTP/1.1".to_string(),
            headers: HashMap::new(),
            body_prefix: Vec::new(),
        };
        let result = classify(&req, &cfg(), || String::new(), || String::new());
        assert_eq!(result.status, StatusCode::SendBadPath);
    }

    #[test]
    fn jpeg_prefix_extension_matches() {
        let req = parse_request(b"GET /a/b.jpeg HTTP/1.1\r\n\r\n").unwrap();
        let result = classify(&req, &cfg(), || String::new(), || String::new());
        assert_eq!(result.status, StatusCode::SendJpg);
    }

    #[test]
    fn unknown_extension() {
        let req = parse_request(b"GET /a/b.xyz HTTP/1.1\r\n\r\n").unwrap();
        let result = classify(&req, &cfg(), || String::new(), || String::new());
        assert_eq!(result.status, StatusCode::SendUnkExt);
    }

    #[test]
    fn post_body_bytes_already_in_the_initial_read_are_captured_as_prefix() {
        let req = parse_request(b"POST /beacon HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello").unwrap();
        assert_eq!(req.body_prefix, b"hello");
    }

    #[test]
    fn request_with_no_header_terminator_has_empty_body_prefix() {
        let req = parse_request(b"GET /x HTTP/1.1\r\nHost: a").unwrap();
        assert!(req.body_prefix.is_empty());
    }

    #[test]
    fn double_decode_roundtrips_for_plain_url() {
        let original = "http://example.com/a b?x=1";
        let once = percent_encode(original);
        let twice = percent_encode(&once);
        assert_eq!(url_decode(&url_decode(&twice)), original);
    }

    fn percent_encode(s: &str) -> String {
        let mut out = String::new();
        for b in s.bytes() {
            match b {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    out.push(b as char)
                }
                _ => out.push_str(&format!("%{b:02X}")),
            }
        }
        out
    }
}
