//! Cookie and form-body parsing for HAR request/response blocks.

use super::model::{Cookie, Header, PostParam};

/// Returns the values of every header named `name`, case-insensitively, in order.
pub fn header_values<'a>(headers: &'a [Header], name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    headers
        .iter()
        .filter(move |h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

pub fn first_header<'a>(headers: &'a [Header], name: &'a str) -> Option<&'a str> {
    header_values(headers, name).next()
}

/// Cookies sent by the client, from every `Cookie` header.
pub fn request_cookies(headers: &[Header]) -> Vec<Cookie> {
    header_values(headers, "cookie")
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let pair = pair.trim();
            if pair.is_empty() {
                return None;
            }
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            Some(plain_cookie(name.trim(), value.trim()))
        })
        .collect()
}

/// Cookies set by the server, one per `Set-Cookie` header line.
pub fn response_cookies(headers: &[Header]) -> Vec<Cookie> {
    header_values(headers, "set-cookie")
        .flat_map(|value| value.lines())
        .filter_map(parse_set_cookie)
        .collect()
}

fn plain_cookie(name: &str, value: &str) -> Cookie {
    Cookie {
        name: name.to_string(),
        value: value.to_string(),
        path: None,
        domain: None,
        expires: None,
        http_only: false,
        secure: false,
    }
}

fn parse_set_cookie(line: &str) -> Option<Cookie> {
    let mut parts = line.split(';');
    let (name, value) = parts.next()?.trim().split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let mut cookie = plain_cookie(name, value.trim());
    for attr in parts {
        let (key, val) = match attr.split_once('=') {
            Some((k, v)) => (k.trim(), Some(v.trim())),
            None => (attr.trim(), None),
        };
        match (key.to_ascii_lowercase().as_str(), val) {
            ("path", Some(v)) => cookie.path = Some(v.to_string()),
            ("domain", Some(v)) => cookie.domain = Some(v.to_string()),
            ("expires", Some(v)) => cookie.expires = Some(v.to_string()),
            ("httponly", _) => cookie.http_only = true,
            ("secure", _) => cookie.secure = true,
            _ => {}
        }
    }
    Some(cookie)
}

/// Decodes an `application/x-www-form-urlencoded` body into name/value pairs.
pub fn form_params(mime_type: &str, body: &str) -> Vec<PostParam> {
    let essence = mime_type.split(';').next().unwrap_or_default().trim();
    if !essence.eq_ignore_ascii_case("application/x-www-form-urlencoded") {
        return Vec::new();
    }
    url::form_urlencoded::parse(body.as_bytes())
        .map(|(name, value)| PostParam {
            name: name.into_owned(),
            value: value.into_owned(),
        })
        .collect()
}
