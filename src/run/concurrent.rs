//! Concurrency-bound scheduling: hold exactly N invocations in flight.
//!
//! The loop tops up to the target before every wait, and issues a
//! replacement as soon as a completion frees a slot. Raising the target
//! issues the difference immediately; lowering it just suppresses
//! replacements until the in-flight count settles — nothing is cancelled.
//! Once the run window closes (or stop is observed) issuance halts and the
//! loop drains whatever is still in flight.

use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use super::{Command, Completion, RunContext, epoch_ms, launch};
use crate::error::RunError;
use crate::event::Event;
use crate::segment::{Recorder, Status};
use crate::sink::EventSink;

pub(crate) async fn drive<F, Fut, S>(
    mut ctx: RunContext<F, S>,
    initial: usize,
) -> Result<(), RunError>
where
    F: Fn(Recorder) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Status> + Send + 'static,
    S: EventSink,
{
    let origin = Instant::now();
    let deadline = origin + ctx.duration;
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();

    let mut target = initial;
    let mut stopping = false;
    let mut cmd_open = true;
    let mut in_flight = 0usize;
    let mut next_id = 0u64;

    let result: Result<(), RunError> = async {
        ctx.sink
            .emit(Event::Header {
                epoch: epoch_ms(),
                duration: ctx.duration.as_millis() as u64,
                rate: None,
                concurrent: Some(initial as u64),
                target_count: None,
            })
            .await?;

        loop {
            // Control input first, so a queued stop or resize is seen before
            // the next scheduling decision.
            while let Ok(cmd) = ctx.cmd_rx.try_recv() {
                apply(cmd, &mut target, &mut stopping);
            }

            let issuing = !stopping && Instant::now() < deadline;
            if !issuing && in_flight == 0 {
                break;
            }

            if issuing {
                while in_flight < target {
                    launch(next_id, origin, &ctx.action, &done_tx);
                    tracing::debug!(id = next_id, in_flight = in_flight + 1, "issued");
                    next_id += 1;
                    in_flight += 1;
                }
            }

            tokio::select! {
                biased;
                cmd = ctx.cmd_rx.recv(), if cmd_open => match cmd {
                    Some(cmd) => apply(cmd, &mut target, &mut stopping),
                    None => cmd_open = false,
                },
                Some(completion) = done_rx.recv() => {
                    in_flight -= 1;
                    ctx.sink
                        .emit(Event::Report {
                            id: completion.id,
                            report: completion.report,
                        })
                        .await?;
                }
                _ = time::sleep_until(deadline), if issuing => {
                    tracing::debug!("run window closed, draining");
                }
            }
        }
        Ok(())
    }
    .await;

    let _ = ctx.sink.close().await;
    result
}

fn apply(cmd: Command, target: &mut usize, stopping: &mut bool) {
    match cmd {
        Command::SetConcurrent(n) => {
            tracing::debug!(from = *target, to = n, "concurrency changed");
            *target = n;
        }
        // Rejected by the task handle before it gets here.
        Command::SetRate(_) => {}
        Command::Stop => *stopping = true,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::run::{Policy, RunOptions, run};
    use crate::sink::event_channel;

    fn sleeper(
        ms: u64,
    ) -> impl Fn(Recorder) -> std::pin::Pin<Box<dyn Future<Output = Status> + Send>>
    + Send
    + Sync
    + Clone
    + 'static {
        move |_recorder| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Status::Success
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_can_change_at_runtime() {
        let (sink, mut stream) = event_channel();
        let mut task = run(RunOptions::builder()
            .duration(Duration::from_millis(50))
            .policy(Policy::Concurrent(1))
            .action(sleeper(5))
            .output(sink)
            .build())
        .unwrap();

        assert_eq!(task.concurrent(), Some(1));

        let mut count = 0;
        let mut bumped = false;
        while let Some(event) = stream.recv().await {
            if let Event::Report { .. } = event {
                count += 1;
                if !bumped {
                    task.set_concurrent(20).unwrap();
                    bumped = true;
                }
            }
        }
        task.wait().await.unwrap();

        assert!(count >= 20, "expected at least 20 reports, got {count}");
        assert_eq!(task.concurrent(), Some(20));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_first_invocation_reports_nothing() {
        let (sink, stream) = event_channel();
        let mut task = run(RunOptions::builder()
            .duration(Duration::from_secs(3))
            .policy(Policy::Concurrent(10))
            .action(sleeper(10))
            .output(sink)
            .build())
        .unwrap();

        task.stop();
        let events = stream.collect().await;
        task.wait().await.unwrap();

        assert!(matches!(events[0], Event::Header { .. }));
        let reports = events
            .iter()
            .filter(|event| matches!(event, Event::Report { .. }))
            .count();
        assert_eq!(reports, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_running_drains_in_flight() {
        let (sink, mut stream) = event_channel();
        let mut task = run(RunOptions::builder()
            .duration(Duration::from_secs(3))
            .policy(Policy::Concurrent(10))
            .action(sleeper(10))
            .output(sink)
            .build())
        .unwrap();

        let mut count = 0;
        let mut stopped = false;
        while let Some(event) = stream.recv().await {
            if let Event::Report { .. } = event {
                count += 1;
                if !stopped {
                    task.stop();
                    stopped = true;
                }
            }
        }
        task.wait().await.unwrap();

        // Everything started before the stop was observed gets to report;
        // replacements issued in the same tick are the upper bound.
        assert!((10..=20).contains(&count), "got {count} reports");
    }

    #[tokio::test(start_paused = true)]
    async fn holds_the_target_in_flight() {
        let gauge = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (sink, stream) = event_channel();
        let action = {
            let gauge = Arc::clone(&gauge);
            let peak = Arc::clone(&peak);
            move |_recorder: Recorder| {
                let gauge = Arc::clone(&gauge);
                let peak = Arc::clone(&peak);
                async move {
                    let now = gauge.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    gauge.fetch_sub(1, Ordering::SeqCst);
                    Status::Success
                }
            }
        };

        let mut task = run(RunOptions::builder()
            .duration(Duration::from_millis(120))
            .policy(Policy::Concurrent(4))
            .action(action)
            .output(sink)
            .build())
        .unwrap();

        let events = stream.collect().await;
        task.wait().await.unwrap();

        let count = events
            .iter()
            .filter(|event| matches!(event, Event::Report { .. }))
            .count();
        assert_eq!(peak.load(Ordering::SeqCst), 4);
        assert!(count >= 8, "expected sustained throughput, got {count}");
    }

    #[tokio::test(start_paused = true)]
    async fn setters_validate_and_keep_prior_value() {
        let (sink, stream) = event_channel();
        let mut task = run(RunOptions::builder()
            .duration(Duration::from_millis(20))
            .policy(Policy::Concurrent(3))
            .action(sleeper(5))
            .output(sink)
            .build())
        .unwrap();

        let err = task.set_concurrent(0).unwrap_err();
        assert_eq!(
            err.to_string(),
            "concurrent must be a positive non-zero integer"
        );
        assert_eq!(task.concurrent(), Some(3));

        let err = task.set_rate(100.0).unwrap_err();
        assert_eq!(err.to_string(), "rate cannot be adjusted in concurrent mode");
        assert_eq!(task.rate(), None);

        task.stop();
        let _ = stream.collect().await;
        task.wait().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn header_comes_first_and_carries_concurrency() {
        let (sink, stream) = event_channel();
        let mut task = run(RunOptions::builder()
            .duration(Duration::from_millis(20))
            .policy(Policy::Concurrent(2))
            .action(sleeper(5))
            .output(sink)
            .build())
        .unwrap();

        let events = stream.collect().await;
        task.wait().await.unwrap();

        let Event::Header {
            duration,
            concurrent,
            rate,
            ..
        } = &events[0]
        else {
            panic!("first event must be the header");
        };
        assert_eq!(*duration, 20);
        assert_eq!(*concurrent, Some(2));
        assert_eq!(*rate, None);
    }
}
