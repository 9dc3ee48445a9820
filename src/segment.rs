//! Timed segments and the per-invocation recorder handed to the action.
//!
//! Every invocation produces one whole-invocation segment named
//! [`FULL_SEGMENT`] plus zero or more sub-segments the action chooses to
//! record through its [`Recorder`]. Timestamps are millisecond offsets from
//! the start of the run, so segments from different invocations share one
//! time axis.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Wire name of the whole-invocation segment.
pub const FULL_SEGMENT: &str = "fullTest";

/// Outcome of a segment or of a whole invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Fail,
}

impl Status {
    pub fn is_success(self) -> bool {
        matches!(self, Status::Success)
    }
}

/// A named timed span within (or equal to) an invocation.
///
/// `start` and `end` are milliseconds from run start; `duration = end - start`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
    pub status: Status,
}

impl Segment {
    pub fn new(start: f64, end: f64, status: Status) -> Self {
        Self {
            start,
            end,
            duration: end - start,
            status,
        }
    }
}

struct Span {
    name: String,
    start: f64,
    end: Option<f64>,
}

/// Records named sub-segments on behalf of one invocation.
///
/// The scheduler hands a fresh `Recorder` to the action on every invocation.
/// Spans are closed with [`Recorder::end`] or by awaiting through
/// [`Recorder::time`]; spans still open when the invocation completes are
/// dropped.
#[derive(Clone)]
pub struct Recorder {
    origin: Instant,
    spans: Arc<Mutex<Vec<Span>>>,
}

impl Recorder {
    pub(crate) fn new(origin: Instant) -> Self {
        Self {
            origin,
            spans: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_nanos() as f64 / 1e6
    }

    /// Open a named span at the current instant.
    pub fn begin(&self, name: impl Into<String>) {
        let start = self.now_ms();
        let mut spans = self.spans.lock().expect("recorder span lock poisoned");
        spans.push(Span {
            name: name.into(),
            start,
            end: None,
        });
    }

    /// Close the most recently opened span with this name. Unknown or already
    /// closed names are ignored.
    pub fn end(&self, name: &str) {
        let end = self.now_ms();
        let mut spans = self.spans.lock().expect("recorder span lock poisoned");
        if let Some(span) = spans
            .iter_mut()
            .rev()
            .find(|span| span.name == name && span.end.is_none())
        {
            span.end = Some(end);
        }
    }

    /// Time a future as a named span.
    pub async fn time<T>(&self, name: impl Into<String>, fut: impl Future<Output = T>) -> T {
        let name = name.into();
        self.begin(name.clone());
        let value = fut.await;
        self.end(&name);
        value
    }

    /// Closed spans in the order they were opened. Sub-segments always carry
    /// `status: success`; only the whole-invocation segment reflects the
    /// action's outcome.
    pub(crate) fn finish(&self) -> Vec<(String, Segment)> {
        let spans = self.spans.lock().expect("recorder span lock poisoned");
        spans
            .iter()
            .filter_map(|span| {
                span.end
                    .map(|end| (span.name.clone(), Segment::new(span.start, end, Status::Success)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Status::Success).unwrap(), "\"success\"");
        assert_eq!(serde_json::to_string(&Status::Fail).unwrap(), "\"fail\"");
    }

    #[test]
    fn segment_duration_is_end_minus_start() {
        let segment = Segment::new(1.5, 4.25, Status::Success);
        assert_eq!(segment.duration, 2.75);
    }

    #[tokio::test(start_paused = true)]
    async fn recorder_measures_named_spans() {
        let recorder = Recorder::new(Instant::now());

        recorder.begin("one");
        tokio::time::sleep(Duration::from_millis(5)).await;
        recorder.end("one");

        let spans = recorder.finish();
        assert_eq!(spans.len(), 1);
        let (name, segment) = &spans[0];
        assert_eq!(name, "one");
        assert!((segment.duration - 5.0).abs() < 1e-6);
        assert_eq!(segment.status, Status::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn time_wraps_a_future() {
        let recorder = Recorder::new(Instant::now());
        tokio::time::sleep(Duration::from_millis(3)).await;

        let value = recorder
            .time("work", async {
                tokio::time::sleep(Duration::from_millis(7)).await;
                42
            })
            .await;

        assert_eq!(value, 42);
        let spans = recorder.finish();
        let (_, segment) = &spans[0];
        assert!((segment.start - 3.0).abs() < 1e-6);
        assert!((segment.duration - 7.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn unfinished_spans_are_dropped() {
        let recorder = Recorder::new(Instant::now());
        recorder.begin("open");
        recorder.time("closed", async {}).await;

        let spans = recorder.finish();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].0, "closed");
    }

    #[tokio::test(start_paused = true)]
    async fn end_closes_most_recent_open_span() {
        let recorder = Recorder::new(Instant::now());
        recorder.begin("db");
        tokio::time::sleep(Duration::from_millis(1)).await;
        recorder.begin("db");
        tokio::time::sleep(Duration::from_millis(2)).await;
        recorder.end("db");

        let spans = recorder.finish();
        assert_eq!(spans.len(), 1);
        assert!((spans[0].1.duration - 2.0).abs() < 1e-6);
    }
}
