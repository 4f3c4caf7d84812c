//! Log Collector: build and runtime logs of the hosted deployment.
//!
//! [`collect_logs`] returns a [`LogStream`]: a lazy, finite, consuming
//! iterator. Nothing is fetched until the first `next()`; both streams are
//! then fetched once, cleaned, and merged by timestamp. A failed fetch is not
//! an error: the stream yields whatever was retrieved and reports
//! [`LogStream::is_degraded`].

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use twinsync_core::{LogEntry, LogSource};

use crate::hosted::HostedApi;

/// Start collecting logs written at or after `since`.
pub fn collect_logs(api: &dyn HostedApi, since: DateTime<Utc>) -> LogStream<'_> {
    LogStream {
        api,
        since,
        buffers: None,
        degraded: false,
    }
}

pub struct LogStream<'a> {
    api: &'a dyn HostedApi,
    since: DateTime<Utc>,
    buffers: Option<(VecDeque<LogEntry>, VecDeque<LogEntry>)>,
    degraded: bool,
}

impl LogStream<'_> {
    /// At least one stream failed to fetch. Meaningful once iteration started.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    fn fetch(&mut self, source: LogSource) -> VecDeque<LogEntry> {
        match self.api.log_lines(source) {
            Ok(lines) => parse_stream(source, &lines, self.since).into(),
            Err(e) => {
                tracing::warn!("{source} log fetch failed: {e}");
                self.degraded = true;
                VecDeque::new()
            }
        }
    }
}

impl Iterator for LogStream<'_> {
    type Item = LogEntry;

    fn next(&mut self) -> Option<LogEntry> {
        if self.buffers.is_none() {
            let build = self.fetch(LogSource::Build);
            let runtime = self.fetch(LogSource::Runtime);
            self.buffers = Some((build, runtime));
        }
        let (build, runtime) = self.buffers.as_mut()?;
        match (build.front(), runtime.front()) {
            (Some(b), Some(r)) if r.timestamp < b.timestamp => runtime.pop_front(),
            (Some(_), _) => build.pop_front(),
            (None, _) => runtime.pop_front(),
        }
    }
}

// ---------------------------------------------------------------------------
// Cleaning
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SsePayload {
    data: String,
    #[serde(default)]
    timestamp: Option<String>,
}

/// Turn raw stream lines into entries sorted by timestamp.
///
/// Lines without a timestamp inherit the previous one (or `since`). Entries
/// older than `since` are dropped.
pub fn parse_stream(source: LogSource, lines: &[String], since: DateTime<Utc>) -> Vec<LogEntry> {
    let mut last_ts = since;
    let mut entries = Vec::new();
    for raw in lines {
        let Some(payload) = sse_payload(raw) else {
            continue;
        };
        let (text, ts) = match serde_json::from_str::<SsePayload>(payload) {
            Ok(p) => {
                let ts = p
                    .timestamp
                    .as_deref()
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.with_timezone(&Utc));
                (p.data, ts)
            }
            Err(_) => (payload.to_string(), None),
        };
        let ts = ts.unwrap_or(last_ts);
        last_ts = ts;
        if ts < since {
            continue;
        }
        for line in text.lines() {
            let cleaned = strip_ansi(line);
            let cleaned = cleaned.trim_end();
            if cleaned.trim().is_empty() {
                continue;
            }
            entries.push(LogEntry {
                source,
                timestamp: ts,
                text: cleaned.to_string(),
            });
        }
    }
    entries.sort_by_key(|e| e.timestamp);
    entries
}

/// Payload of an SSE line; `None` for framing (`event:`, `id:`, comments).
fn sse_payload(raw: &str) -> Option<&str> {
    let line = raw.trim_end_matches('\r');
    if line.trim().is_empty() || line.starts_with(':') {
        return None;
    }
    if let Some(rest) = line.strip_prefix("data:") {
        return Some(rest.strip_prefix(' ').unwrap_or(rest));
    }
    if ["event:", "id:", "retry:"].iter().any(|p| line.starts_with(p)) {
        return None;
    }
    Some(line)
}

/// Remove ANSI escape sequences (CSI and OSC) and stray control characters.
pub fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            match chars.peek() {
                Some('[') => {
                    chars.next();
                    // CSI: parameters, then one final byte in @..~
                    for c in chars.by_ref() {
                        if ('@'..='~').contains(&c) {
                            break;
                        }
                    }
                }
                Some(']') => {
                    chars.next();
                    // OSC: terminated by BEL or ESC \
                    while let Some(c) = chars.next() {
                        if c == '\u{7}' {
                            break;
                        }
                        if c == '\u{1b}' {
                            if chars.peek() == Some(&'\\') {
                                chars.next();
                            }
                            break;
                        }
                    }
                }
                _ => {
                    chars.next();
                }
            }
        } else if c == '\t' || !c.is_control() {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosted::{HostedApiError, RuntimeStatus};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("ts")
    }

    fn sse(text: &str, secs: i64) -> String {
        let ts = at(secs).to_rfc3339();
        format!(
            "data: {}",
            serde_json::json!({ "data": text, "timestamp": ts })
        )
    }

    #[test]
    fn strips_ansi_colour_codes() {
        assert_eq!(strip_ansi("\u{1b}[32mOK\u{1b}[0m done"), "OK done");
        assert_eq!(strip_ansi("\u{1b}]0;title\u{7}text"), "text");
        assert_eq!(strip_ansi("a\tb\r"), "a\tb");
    }

    #[test]
    fn parses_sse_json_payloads() {
        let lines = vec![
            "event: message".to_string(),
            sse("\u{1b}[1mStep 1/4\u{1b}[0m\n", 110),
            String::new(),
            ": keep-alive".to_string(),
            sse("Step 2/4\nStep 3/4", 120),
        ];
        let entries = parse_stream(LogSource::Build, &lines, at(100));
        let texts: Vec<_> = entries.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["Step 1/4", "Step 2/4", "Step 3/4"]);
        assert_eq!(entries[2].timestamp, at(120));
    }

    #[test]
    fn drops_entries_before_since() {
        let lines = vec![sse("old build", 50), sse("new build", 150)];
        let entries = parse_stream(LogSource::Build, &lines, at(100));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "new build");
    }

    #[test]
    fn plain_lines_inherit_previous_timestamp() {
        let lines = vec![sse("first", 130), "data: plain follow-up".to_string()];
        let entries = parse_stream(LogSource::Runtime, &lines, at(100));
        assert_eq!(entries[1].text, "plain follow-up");
        assert_eq!(entries[1].timestamp, at(130));
    }

    struct Fixed {
        build: Result<Vec<String>, ()>,
        runtime: Result<Vec<String>, ()>,
    }

    impl HostedApi for Fixed {
        fn status(&self) -> Result<RuntimeStatus, HostedApiError> {
            Err(HostedApiError::NotConfigured)
        }
        fn log_lines(&self, source: LogSource) -> Result<Vec<String>, HostedApiError> {
            let r = match source {
                LogSource::Build => &self.build,
                LogSource::Runtime => &self.runtime,
            };
            r.clone().map_err(|_| HostedApiError::Transport {
                url: "fake".to_string(),
                detail: "reset".to_string(),
            })
        }
    }

    #[test]
    fn merges_streams_by_timestamp() {
        let api = Fixed {
            build: Ok(vec![sse("b1", 110), sse("b2", 130)]),
            runtime: Ok(vec![sse("r1", 120), sse("r2", 140)]),
        };
        let mut stream = collect_logs(&api, at(100));
        let texts: Vec<_> = stream.by_ref().map(|e| e.text).collect();
        assert_eq!(texts, vec!["b1", "r1", "b2", "r2"]);
        assert!(!stream.is_degraded());
        assert!(stream.next().is_none(), "stream is not restartable");
    }

    #[test]
    fn failed_stream_degrades_but_keeps_partial_set() {
        let api = Fixed {
            build: Ok(vec![sse("b1", 110)]),
            runtime: Err(()),
        };
        let mut stream = collect_logs(&api, at(100));
        let entries: Vec<_> = stream.by_ref().collect();
        assert_eq!(entries.len(), 1);
        assert!(stream.is_degraded());
    }
}
