use serde::Serialize;
use url::Url;

use super::timing::{phase_timings, TransitionMarks};
use crate::engine::{LoadingFailed, LoadingFinished, RequestId, ResourceKind, ResponseData, RequestWillBeSent};
use crate::har::cookies::{first_header, request_cookies, response_cookies};
use crate::har::{Cookie, Header, QueryParam, Timings};

/// How a recorded exchange ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Completion {
    Complete,
    Failed { error: String },
    /// Still in flight when the recorder detached.
    Unfinished,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostBody {
    pub mime_type: String,
    /// Body text, cut to the configured byte bound on a char boundary.
    pub text: String,
    /// Size of the body as sent, before truncation.
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSummary {
    pub status: u16,
    pub status_text: String,
    pub http_version: String,
    pub headers: Vec<Header>,
    pub cookies: Vec<Cookie>,
    pub mime_type: String,
    pub redirect_url: String,
    pub headers_size: Option<i64>,
    pub body_size: Option<i64>,
}

/// One observed request/response exchange. One record per redirect hop.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkEvent {
    pub id: RequestId,
    pub resource_kind: ResourceKind,
    /// Milliseconds since the Unix epoch at which the request was issued.
    pub started_wall_ms: f64,
    pub method: String,
    pub url: String,
    pub http_version: String,
    pub request_headers: Vec<Header>,
    pub request_cookies: Vec<Cookie>,
    pub query: Vec<QueryParam>,
    pub post_data: Option<PostBody>,
    pub response: Option<ResponseSummary>,
    pub timings: Timings,
    pub server_ip: Option<String>,
    pub connection_id: Option<String>,
    pub from_cache: bool,
    pub completion: Completion,
}

impl NetworkEvent {
    pub fn is_complete(&self) -> bool {
        self.completion == Completion::Complete
    }
}

/// Mutable per-id accumulator. Lifecycle notifications may arrive in any
/// order, so every slot is optional until the recorder finalizes.
#[derive(Debug)]
pub(crate) struct Exchange {
    pub seq: u64,
    pub request: Option<RequestWillBeSent>,
    pub response: Option<(f64, ResponseData)>,
    pub finished: Option<LoadingFinished>,
    pub failed: Option<LoadingFailed>,
    pub redirected_to: Option<String>,
}

impl Exchange {
    pub fn new(seq: u64) -> Self {
        Self {
            seq,
            request: None,
            response: None,
            finished: None,
            failed: None,
            redirected_to: None,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.finished.is_some() || self.failed.is_some() || self.redirected_to.is_some()
    }

    /// Sort key: request initiation time, then first-observation order.
    pub fn start_time(&self) -> f64 {
        self.request.as_ref().map_or(f64::INFINITY, |r| r.timestamp)
    }

    /// Closes this hop because the same id was reused for the next request
    /// of a redirect chain.
    pub fn close_as_redirect(&mut self, next: &RequestWillBeSent, redirect: ResponseData) {
        self.response = Some((next.timestamp, redirect));
        self.redirected_to = Some(next.url.clone());
        self.finished = Some(LoadingFinished {
            id: next.id.clone(),
            timestamp: next.timestamp,
            encoded_data_length: None,
        });
    }

    /// Freezes the exchange into a record. Exchanges whose request was never
    /// announced carry no method or URL and are dropped.
    pub fn into_event(self, max_post_data: usize) -> Option<NetworkEvent> {
        let Exchange {
            request,
            response,
            finished,
            failed,
            redirected_to,
            ..
        } = self;
        let request = request?;

        let ended_at = finished
            .as_ref()
            .map(|f| f.timestamp)
            .or_else(|| failed.as_ref().map(|f| f.timestamp));
        let timings = phase_timings(&TransitionMarks {
            request_sent: request.timestamp,
            headers_received: response.as_ref().map(|(ts, _)| *ts),
            finished: ended_at,
            resource: response.as_ref().and_then(|(_, r)| r.timing.as_ref()),
        });

        let completion = match (&failed, &finished) {
            (Some(f), _) => Completion::Failed {
                error: f.error_text.clone(),
            },
            (None, Some(_)) => Completion::Complete,
            (None, None) => Completion::Unfinished,
        };

        let wire_bytes = finished
            .as_ref()
            .and_then(|f| f.encoded_data_length)
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map(|n| n.round() as i64);

        let http_version = response
            .as_ref()
            .map(|(_, r)| normalize_protocol(r.protocol.as_deref()))
            .unwrap_or_default();
        let server_ip = response.as_ref().and_then(|(_, r)| {
            r.remote_ip_address
                .as_deref()
                .map(|ip| ip.trim_start_matches('[').trim_end_matches(']').to_string())
                .filter(|ip| !ip.is_empty())
        });
        let connection_id = response
            .as_ref()
            .and_then(|(_, r)| r.connection_id.clone())
            .filter(|id| !id.is_empty() && id != "0");
        let from_cache = response.as_ref().is_some_and(|(_, r)| r.from_cache);

        let response = response.map(|(_, r)| summarize_response(r, redirected_to, wire_bytes));

        let post_data = request.post_data.as_deref().map(|text| PostBody {
            mime_type: first_header(&request.headers, "content-type")
                .unwrap_or_default()
                .to_string(),
            text: truncate_to_boundary(text, max_post_data).to_string(),
            size: text.len(),
        });

        let query = Url::parse(&request.url)
            .map(|url| {
                url.query_pairs()
                    .map(|(name, value)| QueryParam {
                        name: name.into_owned(),
                        value: value.into_owned(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(NetworkEvent {
            request_cookies: request_cookies(&request.headers),
            id: request.id,
            resource_kind: request.resource_kind,
            started_wall_ms: request.wall_time,
            method: request.method,
            url: request.url,
            http_version,
            request_headers: request.headers,
            query,
            post_data,
            response,
            timings,
            server_ip,
            connection_id,
            from_cache,
            completion,
        })
    }
}

fn summarize_response(
    response: ResponseData,
    redirected_to: Option<String>,
    wire_bytes: Option<i64>,
) -> ResponseSummary {
    let headers_size = response.headers_size.filter(|n| *n >= 0);
    let body_size = wire_bytes.map(|wire| (wire - headers_size.unwrap_or(0)).max(0));
    let redirect_url = redirected_to
        .or_else(|| {
            if !(300..400).contains(&response.status) {
                return None;
            }
            let location = first_header(&response.headers, "location")?;
            Some(
                Url::parse(&response.url)
                    .and_then(|base| base.join(location))
                    .map(String::from)
                    .unwrap_or_else(|_| location.to_string()),
            )
        })
        .unwrap_or_default();

    ResponseSummary {
        status: response.status,
        status_text: response.status_text,
        http_version: normalize_protocol(response.protocol.as_deref()),
        cookies: response_cookies(&response.headers),
        headers: response.headers,
        mime_type: response.mime_type,
        redirect_url,
        headers_size,
        body_size,
    }
}

/// Maps ALPN-style protocol ids to HAR `httpVersion` strings.
pub fn normalize_protocol(protocol: Option<&str>) -> String {
    let Some(raw) = protocol.map(str::trim).filter(|p| !p.is_empty()) else {
        return String::new();
    };
    let lower = raw.to_ascii_lowercase();
    match lower.as_str() {
        "h2" | "h2c" | "http/2" | "http/2.0" => "HTTP/2.0".to_string(),
        "http/1.1" => "HTTP/1.1".to_string(),
        "http/1.0" => "HTTP/1.0".to_string(),
        "http/0.9" => "HTTP/0.9".to_string(),
        p if p.starts_with("h3") || p.starts_with("http/3") || p == "quic" => "HTTP/3.0".to_string(),
        _ => raw.to_ascii_uppercase(),
    }
}

fn truncate_to_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
