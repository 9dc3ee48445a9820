//! Drover — load generation and latency measurement for Rust.
//!
//! Drover repeatedly invokes a user-supplied async action under one of two
//! scheduling disciplines — fixed concurrency or fixed rate — and streams
//! per-invocation timing events that an aggregation engine turns into
//! percentile latency reports.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`run`]: starts a run and returns a [`run::Task`] handle. The active
//!   parameter (`concurrent` or `rate`) can be changed while the run is in
//!   flight, with synchronous validation; `stop()` halts issuance and
//!   drains.
//! - [`Recorder`]: handed to the action on every invocation to time named
//!   sub-segments alongside the whole-invocation measurement.
//! - [`EventSink`]: where the run's ordered event stream goes — an
//!   in-process channel ([`event_channel`]) or newline-delimited JSON
//!   ([`NdjsonSink`]). The scheduler is the sole writer and closes the sink
//!   exactly once, header first.
//! - [`summarize`] / [`report`]: consume an event stream and compute
//!   per-segment nearest-rank percentiles, mean, min, and max.
//! - [`render`]: projects a [`RunSummary`] as `json`, `text`, or a
//!   self-contained HTML `plot`, optionally colorized.
//! - [`diff`]: aggregates two or more event streams and renders them side
//!   by side.
//!
//! # Design goals
//!
//! - One logical timeline: a single orchestrator task owns scheduling state
//!   and event emission, so reconfiguration never races a completion.
//! - Failures of the action are data, not errors — they are recorded with
//!   `status: fail` and the run continues.
//! - The event stream is the contract: anything that can read
//!   newline-delimited JSON can consume a run, live or from a file.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use drover::{Policy, Recorder, RunOptions, Status, event_channel, run};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (sink, stream) = event_channel();
//!     let mut task = run(RunOptions::builder()
//!         .duration(Duration::from_secs(10))
//!         .policy(Policy::Rate(20.0))
//!         .action(|recorder: Recorder| async move {
//!             recorder
//!                 .time("query", tokio::time::sleep(Duration::from_millis(5)))
//!                 .await;
//!             Status::Success
//!         })
//!         .output(sink)
//!         .build())
//!     .expect("valid configuration");
//!
//!     let events = stream.collect().await;
//!     task.wait().await.expect("run completed");
//!     println!("{} events", events.len());
//! }
//! ```

/// Comparison of multiple event streams
pub mod diff;
/// Error types with the fixed contract messages
pub mod error;
/// Event stream wire shapes
pub mod event;
/// Duration, rate, and concurrency input parsing
pub mod parse;
/// Projections of a run summary onto an output sink
pub mod render;
/// Aggregation of an event stream into latency statistics
pub mod report;
/// The scheduling engine and the caller's control handle
pub mod run;
/// Timed segments and the per-invocation recorder
pub mod segment;
/// Event sinks, the I/O boundary of a run
pub mod sink;

pub use diff::{DiffOptions, DiffSources, diff};
pub use error::{ConfigError, DiffError, ReportError, RunError};
pub use event::{Event, OrderedMap};
pub use render::{Format, render};
pub use report::{LatencyStats, RunInfo, RunSummary, report, summarize};
pub use run::{Policy, RunOptions, Task, run};
pub use segment::{FULL_SEGMENT, Recorder, Segment, Status};
pub use sink::{ChannelSink, EventSink, EventStream, NdjsonSink, event_channel};

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::BufReader;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn wire_round_trip_feeds_the_aggregator() {
        let (read, write) = tokio::io::duplex(64 * 1024);

        let mut task = run(RunOptions::builder()
            .duration(Duration::from_millis(200))
            .policy(Policy::Rate(50.0))
            .action(|recorder: Recorder| async move {
                recorder
                    .time("step", tokio::time::sleep(Duration::from_millis(2)))
                    .await;
                Status::Success
            })
            .output(NdjsonSink::new(write))
            .build())
        .unwrap();

        let (finished, summary) = tokio::join!(task.wait(), summarize(BufReader::new(read)));
        finished.unwrap();
        let summary = summary.unwrap();

        assert_eq!(summary.info.count, 10);
        assert_eq!(summary.info.rate, Some(50.0));
        assert_eq!(summary.info.target_count, Some(10));

        let keys: Vec<&str> = summary.latencies.keys().collect();
        assert_eq!(keys, vec![FULL_SEGMENT, "step"]);
        let step = summary.latencies.get("step").unwrap();
        assert!((step.mean - 2.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_invocations_are_recorded_not_fatal() {
        let (sink, stream) = event_channel();
        let mut task = run(RunOptions::builder()
            .duration(Duration::from_millis(30))
            .policy(Policy::Concurrent(1))
            .action(|_recorder: Recorder| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Status::Fail
            })
            .output(sink)
            .build())
        .unwrap();

        let events = stream.collect().await;
        task.wait().await.unwrap();

        let failures = events
            .iter()
            .filter_map(|event| match event {
                Event::Report { report, .. } => report.get(FULL_SEGMENT),
                Event::Header { .. } => None,
            })
            .filter(|segment| !segment.status.is_success())
            .count();
        assert_eq!(failures, 3);
    }
}
