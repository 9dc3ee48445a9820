//! The scheduling engine — orchestration of invocations over one run.
//!
//! A run repeatedly invokes a user-supplied action under one of two
//! policies: hold a fixed number of invocations in flight
//! ([`concurrent`]), or start invocations at a fixed rate regardless of
//! completions ([`rate`]). Either way a single orchestrator task owns all
//! scheduling state, so accounting and event emission happen on one logical
//! timeline and never race:
//!
//! 1. The orchestrator emits the header event before anything else.
//! 2. Invocations run as spawned tasks; the action itself may overlap in
//!    wall-clock time, but completions funnel back over a channel and are
//!    re-emitted as report events in completion order.
//! 3. Control input (parameter changes, stop) arrives over a command
//!    channel and is drained before each scheduling decision, so a change
//!    affects only invocations issued strictly after it is observed.
//! 4. When the run window closes — or [`Task::stop`] is called — issuance
//!    halts immediately and in-flight invocations drain. Nothing is ever
//!    forcibly aborted; a completed invocation always gets to report.
//!
//! Parameter changes are validated synchronously on the [`Task`] handle;
//! an invalid value is rejected at the call site and the previous value
//! stays in force.

pub mod concurrent;
pub mod rate;

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use typed_builder::TypedBuilder;

use crate::error::{ConfigError, RunError};
use crate::event::OrderedMap;
use crate::segment::{FULL_SEGMENT, Recorder, Segment, Status};
use crate::sink::EventSink;

/// Scheduling discipline for a run. Exactly one is active per run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Policy {
    /// Hold this many invocations in flight.
    Concurrent(usize),
    /// Start invocations at this many per second.
    Rate(f64),
}

impl Policy {
    fn mode(self) -> &'static str {
        match self {
            Policy::Concurrent(_) => "concurrent",
            Policy::Rate(_) => "rate",
        }
    }
}

/// Configuration for [`run`].
#[derive(TypedBuilder)]
pub struct RunOptions<F, S> {
    /// How long to keep issuing new invocations.
    pub duration: Duration,
    pub policy: Policy,
    /// The test operation. Invoked with a fresh [`Recorder`] per invocation;
    /// its status is recorded, never fatal to the run.
    pub action: F,
    /// Where the event stream goes. The run is the sole writer and closes
    /// the sink exactly once.
    pub output: S,
}

pub(crate) enum Command {
    SetConcurrent(usize),
    SetRate(f64),
    Stop,
}

#[derive(Debug)]
struct Params {
    concurrent: Option<usize>,
    rate: Option<f64>,
}

/// Start a run. Validates the policy synchronously and returns the caller's
/// control handle; the run itself proceeds on the tokio runtime.
pub fn run<F, Fut, S>(options: RunOptions<F, S>) -> Result<Task, ConfigError>
where
    F: Fn(Recorder) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Status> + Send + 'static,
    S: EventSink + 'static,
{
    let RunOptions {
        duration,
        policy,
        action,
        output,
    } = options;

    match policy {
        Policy::Concurrent(0) => return Err(ConfigError::Concurrent),
        Policy::Rate(rate) if !(rate.is_finite() && rate > 0.0) => {
            return Err(ConfigError::Rate);
        }
        _ => {}
    }
    if duration.is_zero() {
        return Err(ConfigError::Duration);
    }

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = oneshot::channel();
    let params = Arc::new(Mutex::new(match policy {
        Policy::Concurrent(n) => Params {
            concurrent: Some(n),
            rate: None,
        },
        Policy::Rate(r) => Params {
            concurrent: None,
            rate: Some(r),
        },
    }));

    let ctx = RunContext {
        duration,
        cmd_rx,
        action,
        sink: output,
    };
    tokio::spawn(async move {
        tracing::info!(mode = policy.mode(), ?duration, "run starting");
        let result = match policy {
            Policy::Concurrent(n) => concurrent::drive(ctx, n).await,
            Policy::Rate(r) => rate::drive(ctx, r).await,
        };
        if let Err(err) = &result {
            tracing::error!(%err, "run failed");
        } else {
            tracing::info!("run finished");
        }
        let _ = done_tx.send(result);
    });

    Ok(Task {
        mode: policy.mode(),
        cmd_tx,
        params,
        done: Some(done_rx),
    })
}

/// Caller-facing handle for a run in progress.
///
/// Setters validate synchronously and keep the previous value on rejection.
/// After the run finishes, accepted values remain readable and further
/// mutation is ignored.
#[derive(Debug)]
pub struct Task {
    mode: &'static str,
    cmd_tx: mpsc::UnboundedSender<Command>,
    params: Arc<Mutex<Params>>,
    done: Option<oneshot::Receiver<Result<(), RunError>>>,
}

impl Task {
    /// Change the number of in-flight invocations. An increase issues the
    /// difference immediately; a decrease lets completions settle without
    /// cancelling anything.
    pub fn set_concurrent(&self, value: usize) -> Result<(), ConfigError> {
        if self.mode != "concurrent" {
            return Err(ConfigError::Inactive {
                param: "concurrent",
                mode: self.mode,
            });
        }
        // The run is over; the handle is inert.
        if self.cmd_tx.is_closed() {
            return Ok(());
        }
        if value == 0 {
            return Err(ConfigError::Concurrent);
        }
        self.params
            .lock()
            .expect("task params lock poisoned")
            .concurrent = Some(value);
        let _ = self.cmd_tx.send(Command::SetConcurrent(value));
        Ok(())
    }

    /// Change the start rate. Applies to invocations scheduled after the
    /// change; an already-armed timer fires as scheduled.
    pub fn set_rate(&self, value: f64) -> Result<(), ConfigError> {
        if self.mode != "rate" {
            return Err(ConfigError::Inactive {
                param: "rate",
                mode: self.mode,
            });
        }
        if self.cmd_tx.is_closed() {
            return Ok(());
        }
        if !(value.is_finite() && value > 0.0) {
            return Err(ConfigError::Rate);
        }
        self.params.lock().expect("task params lock poisoned").rate = Some(value);
        let _ = self.cmd_tx.send(Command::SetRate(value));
        Ok(())
    }

    /// Halt issuance immediately. In-flight invocations still complete and
    /// report. Idempotent, irreversible.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(Command::Stop);
    }

    /// Last accepted concurrency, if this is a concurrency-bound run.
    pub fn concurrent(&self) -> Option<usize> {
        self.params
            .lock()
            .expect("task params lock poisoned")
            .concurrent
    }

    /// Last accepted rate, if this is a rate-bound run.
    pub fn rate(&self) -> Option<f64> {
        self.params.lock().expect("task params lock poisoned").rate
    }

    /// Completion notification: resolves exactly once, on natural finish or
    /// after a stop has drained. Subsequent calls return `Ok(())`.
    pub async fn wait(&mut self) -> Result<(), RunError> {
        match self.done.take() {
            Some(rx) => rx.await.unwrap_or(Err(RunError::Interrupted)),
            None => Ok(()),
        }
    }
}

/// Everything a scheduler loop needs, bundled so both policies share one
/// shape.
pub(crate) struct RunContext<F, S> {
    pub duration: Duration,
    pub cmd_rx: mpsc::UnboundedReceiver<Command>,
    pub action: F,
    pub sink: S,
}

pub(crate) struct Completion {
    pub id: u64,
    pub report: OrderedMap<Segment>,
}

pub(crate) fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn ms_since(origin: Instant) -> f64 {
    origin.elapsed().as_nanos() as f64 / 1e6
}

/// Spawn one invocation. The spawned task times the whole call, collects the
/// action's sub-segments, and posts the assembled report back to the
/// orchestrator.
pub(crate) fn launch<F, Fut>(
    id: u64,
    origin: Instant,
    action: &F,
    done: &mpsc::UnboundedSender<Completion>,
) where
    F: Fn(Recorder) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Status> + Send + 'static,
{
    let action = action.clone();
    let done = done.clone();
    tokio::spawn(async move {
        let recorder = Recorder::new(origin);
        let start = ms_since(origin);
        let status = action(recorder.clone()).await;
        let end = ms_since(origin);

        let mut report = OrderedMap::new();
        report.insert(FULL_SEGMENT, Segment::new(start, end, status));
        for (name, segment) in recorder.finish() {
            report.insert(name, segment);
        }
        let _ = done.send(Completion { id, report });
    });
}
