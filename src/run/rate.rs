//! Rate-bound scheduling: start invocations on a fixed inter-arrival grid.
//!
//! Starts are scheduled at `1/rate` second intervals from run start,
//! independent of completion order — invocations overlap freely. A rate
//! change leaves the already-armed timer alone and applies to every start
//! scheduled after it. The header carries `targetCount`, the expected
//! number of starts for the configured window; it is a reporting hint, not
//! a promise.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use super::{Command, Completion, RunContext, epoch_ms, launch};
use crate::error::RunError;
use crate::event::Event;
use crate::segment::{Recorder, Status};
use crate::sink::EventSink;

pub(crate) async fn drive<F, Fut, S>(
    mut ctx: RunContext<F, S>,
    initial: f64,
) -> Result<(), RunError>
where
    F: Fn(Recorder) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Status> + Send + 'static,
    S: EventSink,
{
    let origin = Instant::now();
    let deadline = origin + ctx.duration;
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();

    let mut rate = initial;
    let mut stopping = false;
    let mut cmd_open = true;
    let mut in_flight = 0usize;
    let mut next_id = 0u64;
    // First start lands at t=0.
    let mut next_start = origin;

    let result: Result<(), RunError> = async {
        ctx.sink
            .emit(Event::Header {
                epoch: epoch_ms(),
                duration: ctx.duration.as_millis() as u64,
                rate: Some(initial),
                concurrent: None,
                target_count: Some((initial * ctx.duration.as_secs_f64()).round() as u64),
            })
            .await?;

        loop {
            while let Ok(cmd) = ctx.cmd_rx.try_recv() {
                apply(cmd, &mut rate, &mut stopping);
            }

            let issuing = !stopping && Instant::now() < deadline;
            if !issuing && in_flight == 0 {
                break;
            }

            if issuing {
                let wake = next_start.min(deadline);
                tokio::select! {
                    biased;
                    cmd = ctx.cmd_rx.recv(), if cmd_open => match cmd {
                        Some(cmd) => apply(cmd, &mut rate, &mut stopping),
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
                    _ = time::sleep_until(wake) => {
                        let now = Instant::now();
                        if now < deadline && now >= next_start {
                            launch(next_id, origin, &ctx.action, &done_tx);
                            tracing::debug!(id = next_id, in_flight = in_flight + 1, "issued");
                            next_id += 1;
                            in_flight += 1;
                            next_start += Duration::from_secs_f64(1.0 / rate);
                        }
                    }
                }
            } else {
                tokio::select! {
                    biased;
                    cmd = ctx.cmd_rx.recv(), if cmd_open => match cmd {
                        Some(cmd) => apply(cmd, &mut rate, &mut stopping),
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
                }
            }
        }
        Ok(())
    }
    .await;

    let _ = ctx.sink.close().await;
    result
}

fn apply(cmd: Command, rate: &mut f64, stopping: &mut bool) {
    match cmd {
        Command::SetRate(r) => {
            tracing::debug!(from = *rate, to = r, "rate changed");
            *rate = r;
        }
        // Rejected by the task handle before it gets here.
        Command::SetConcurrent(_) => {}
        Command::Stop => *stopping = true,
    }
}
