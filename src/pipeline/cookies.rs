use axum::http::header::COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use tracing::warn;

/// First cookie named `name` across all `Cookie` headers. Empty values count as absent.
pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(s) = header.to_str() else { continue };
        for part in s.split(';') {
            let p = part.trim();
            if let Some(eq) = p.find('=') {
                let (k, v) = p.split_at(eq);
                if k.trim() == name {
                    let v = v[1..].trim().trim_matches('"');
                    return if v.is_empty() { None } else { Some(v.to_string()) };
                }
            }
        }
    }
    None
}

/// `Set-Cookie` value carrying the session id for `max_age` seconds.
pub fn session_cookie(name: &str, id: &str, max_age: u32) -> Option<HeaderValue> {
    header_value(format!("{}={}; Max-Age={}; Path=/; HttpOnly", name, id, max_age))
}

/// `Set-Cookie` value telling the client to drop `name` immediately.
pub fn expired_cookie(name: &str) -> Option<HeaderValue> {
    header_value(format!("{}=; Max-Age=0; Path=/", name))
}

fn header_value(raw: String) -> Option<HeaderValue> {
    match HeaderValue::from_str(&raw) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(target: "remote_session::pipeline", "dropping malformed Set-Cookie '{}': {}", raw, e);
            None
        }
    }
}
