use chrono::{SecondsFormat, TimeZone, Utc};

use super::model::{
    Cache, CacheEntry, Content, Creator, Entry, Har, Log, Page, PageTimings, PostData, Request, Response,
    HAR_VERSION,
};
use super::cookies::{first_header, form_params};
use crate::recorder::{Completion, NetworkEvent};

/// Page-level facts collected by the controller for `log.pages`.
#[derive(Debug, Clone, PartialEq)]
pub struct PageMetadata {
    pub id: String,
    pub title: String,
    /// Milliseconds since the Unix epoch at which navigation was issued.
    pub started_wall_ms: f64,
    pub on_content_load_ms: Option<f64>,
    pub on_load_ms: Option<f64>,
}

impl PageMetadata {
    pub const DEFAULT_ID: &'static str = "page_1";
}

/// Reshapes recorded events into a HAR 1.2 archive. Pure: the same input
/// always produces the same archive.
pub fn normalize(events: &[NetworkEvent], page: &PageMetadata) -> Har {
    let pages = vec![Page {
        started_date_time: iso_timestamp(page.started_wall_ms),
        id: page.id.clone(),
        title: page.title.clone(),
        page_timings: PageTimings {
            on_content_load: page.on_content_load_ms.map_or(-1.0, non_negative),
            on_load: page.on_load_ms.map_or(-1.0, non_negative),
        },
    }];

    Har {
        log: Log {
            version: HAR_VERSION.to_string(),
            creator: Creator::harcap(),
            pages,
            entries: events.iter().map(|event| to_entry(event, &page.id)).collect(),
        },
    }
}

fn to_entry(event: &NetworkEvent, pageref: &str) -> Entry {
    let started_date_time = iso_timestamp(event.started_wall_ms);

    let post_data = match &event.post_data {
        Some(body) => PostData {
            params: form_params(&body.mime_type, &body.text),
            mime_type: body.mime_type.clone(),
            text: body.text.clone(),
        },
        None => PostData {
            mime_type: String::new(),
            text: String::new(),
            params: Vec::new(),
        },
    };

    let request = Request {
        method: event.method.clone(),
        url: event.url.clone(),
        http_version: event.http_version.clone(),
        cookies: event.request_cookies.clone(),
        headers: event.request_headers.clone(),
        query_string: event.query.clone(),
        post_data,
        headers_size: -1,
        body_size: event.post_data.as_ref().map_or(0, |b| b.size as i64),
    };

    let response = match &event.response {
        Some(r) => Response {
            status: r.status,
            status_text: r.status_text.clone(),
            http_version: r.http_version.clone(),
            cookies: r.cookies.clone(),
            headers: r.headers.clone(),
            content: Content {
                size: r.body_size.unwrap_or(-1),
                mime_type: r.mime_type.clone(),
                text: None,
            },
            redirect_url: r.redirect_url.clone(),
            headers_size: r.headers_size.unwrap_or(-1),
            body_size: r.body_size.unwrap_or(-1),
        },
        None => Response {
            status: 0,
            status_text: String::new(),
            http_version: String::new(),
            cookies: Vec::new(),
            headers: Vec::new(),
            content: Content {
                size: -1,
                mime_type: String::new(),
                text: None,
            },
            redirect_url: String::new(),
            headers_size: -1,
            body_size: -1,
        },
    };

    let cache = if event.from_cache {
        let e_tag = event
            .response
            .as_ref()
            .and_then(|r| first_header(&r.headers, "etag"))
            .unwrap_or_default()
            .to_string();
        Cache {
            before_request: Some(CacheEntry {
                last_access: started_date_time.clone(),
                e_tag,
                hit_count: 1,
            }),
        }
    } else {
        Cache::default()
    };

    let comment = match &event.completion {
        Completion::Complete => None,
        Completion::Failed { error } => Some(format!("failed: {error}")),
        Completion::Unfinished => Some("unfinished: still in flight when the capture settled".to_string()),
    };

    Entry {
        pageref: pageref.to_string(),
        started_date_time,
        time: event.timings.total(),
        request,
        response,
        cache,
        timings: event.timings,
        server_ip_address: event.server_ip.clone().unwrap_or_default(),
        connection: event.connection_id.clone().unwrap_or_default(),
        comment,
    }
}

fn non_negative(ms: f64) -> f64 {
    if ms.is_finite() && ms > 0.0 {
        ms
    } else {
        0.0
    }
}

/// ISO 8601 with millisecond precision in UTC, e.g. `2024-05-01T12:00:00.123Z`.
pub fn iso_timestamp(epoch_ms: f64) -> String {
    let millis = if epoch_ms.is_finite() { epoch_ms.round() as i64 } else { 0 };
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
