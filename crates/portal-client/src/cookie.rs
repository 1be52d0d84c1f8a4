//! Anti-forgery cookie extraction
//!
//! The handshake leaves the token in the transport's cookie jar, URL-encoded
//! (Laravel encrypts it and the base64 padding arrives as `%3D`). The header
//! must carry the decoded form.

use reqwest::Url;
use reqwest::cookie::{CookieStore, Jar};

use crate::constants::XSRF_COOKIE;

/// Find a cookie value by name in a `Cookie` request header string.
pub fn find_cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then_some(value)
    })
}

/// URL-decode a raw cookie value. Empty or undecodable values yield `None`.
pub fn decode_token(raw: &str) -> Option<String> {
    let decoded = urlencoding::decode(raw.trim()).ok()?;
    let token = decoded.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Read the anti-forgery token the jar would send to `url`.
pub fn xsrf_token(jar: &Jar, url: &Url) -> Option<String> {
    let header = jar.cookies(url)?;
    let header = header.to_str().ok()?;
    find_cookie(header, XSRF_COOKIE).and_then(decode_token)
}
