use crate::engine::ResourceTiming;
use crate::har::Timings;

/// Monotonic timestamps (ms) at which one exchange crossed each lifecycle transition.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TransitionMarks<'a> {
    pub request_sent: f64,
    pub headers_received: Option<f64>,
    pub finished: Option<f64>,
    pub resource: Option<&'a ResourceTiming>,
}

/// Per-phase breakdown. Prefers the browser's resource timing and falls back
/// to deltas between observed transitions; unknown phases are zero.
pub(crate) fn phase_timings(marks: &TransitionMarks<'_>) -> Timings {
    let timings = match marks.resource {
        Some(rt) => from_resource_timing(rt, marks),
        None => from_transitions(marks),
    };
    Timings {
        blocked: phase(timings.blocked),
        dns: phase(timings.dns),
        connect: phase(timings.connect),
        send: phase(timings.send),
        wait: phase(timings.wait),
        receive: phase(timings.receive),
        ssl: phase(timings.ssl),
    }
}

fn from_resource_timing(rt: &ResourceTiming, marks: &TransitionMarks<'_>) -> Timings {
    let blocked = [rt.dns_start, rt.connect_start, rt.send_start]
        .into_iter()
        .find(|offset| *offset >= 0.0)
        .unwrap_or(0.0);

    let receive = match marks.finished {
        Some(end) if rt.receive_headers_end >= 0.0 => end - (rt.request_time + rt.receive_headers_end),
        Some(end) => marks.headers_received.map_or(0.0, |headers| end - headers),
        None => 0.0,
    };

    Timings {
        blocked,
        dns: span(rt.dns_start, rt.dns_end),
        connect: span(rt.connect_start, rt.connect_end),
        send: span(rt.send_start, rt.send_end),
        wait: span(rt.send_end, rt.receive_headers_end),
        receive,
        ssl: span(rt.ssl_start, rt.ssl_end),
    }
}

fn from_transitions(marks: &TransitionMarks<'_>) -> Timings {
    let wait = marks
        .headers_received
        .map_or(0.0, |headers| headers - marks.request_sent);
    let receive = match (marks.headers_received, marks.finished) {
        (Some(headers), Some(end)) => end - headers,
        _ => 0.0,
    };
    Timings {
        wait,
        receive,
        ..Timings::default()
    }
}

fn span(start: f64, end: f64) -> f64 {
    if start >= 0.0 && end >= start {
        end - start
    } else {
        0.0
    }
}

fn phase(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(request_time: f64) -> ResourceTiming {
        ResourceTiming {
            request_time,
            dns_start: 1.0,
            dns_end: 5.0,
            connect_start: 5.0,
            connect_end: 20.0,
            ssl_start: 8.0,
            ssl_end: 20.0,
            send_start: 21.0,
            send_end: 22.0,
            receive_headers_end: 72.0,
        }
    }

    #[test]
    fn resource_timing_breakdown_is_used_when_present() {
        let rt = resource(1_000.0);
        let timings = phase_timings(&TransitionMarks {
            request_sent: 1_000.0,
            headers_received: Some(1_072.0),
            finished: Some(1_100.0),
            resource: Some(&rt),
        });
        assert_eq!(timings.blocked, 1.0);
        assert_eq!(timings.dns, 4.0);
        assert_eq!(timings.connect, 15.0);
        assert_eq!(timings.ssl, 12.0);
        assert_eq!(timings.send, 1.0);
        assert_eq!(timings.wait, 50.0);
        assert_eq!(timings.receive, 28.0);
    }

    #[test]
    fn reused_connection_reports_zero_dns_and_connect() {
        let mut rt = resource(0.0);
        rt.dns_start = -1.0;
        rt.dns_end = -1.0;
        rt.connect_start = -1.0;
        rt.connect_end = -1.0;
        rt.ssl_start = -1.0;
        rt.ssl_end = -1.0;
        let timings = phase_timings(&TransitionMarks {
            request_sent: 0.0,
            headers_received: Some(72.0),
            finished: None,
            resource: Some(&rt),
        });
        assert_eq!((timings.dns, timings.connect, timings.ssl), (0.0, 0.0, 0.0));
        assert_eq!(timings.blocked, 21.0);
        assert_eq!(timings.receive, 0.0);
    }

    #[test]
    fn falls_back_to_transition_deltas() {
        let timings = phase_timings(&TransitionMarks {
            request_sent: 10.0,
            headers_received: Some(40.0),
            finished: Some(55.5),
            resource: None,
        });
        assert_eq!(timings.wait, 30.0);
        assert_eq!(timings.receive, 15.5);
        assert_eq!(timings.total(), 45.5);
    }

    #[test]
    fn missing_transitions_and_clock_skew_clamp_to_zero() {
        let timings = phase_timings(&TransitionMarks {
            request_sent: 50.0,
            headers_received: Some(40.0),
            finished: None,
            resource: None,
        });
        assert_eq!(timings, Timings::default());

        let mut rt = resource(f64::NAN);
        rt.receive_headers_end = 10.0;
        let timings = phase_timings(&TransitionMarks {
            request_sent: 0.0,
            headers_received: None,
            finished: Some(5.0),
            resource: Some(&rt),
        });
        assert!(timings.receive == 0.0 && timings.wait == 0.0);
    }
}
