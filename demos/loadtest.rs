//! End-to-end demo: drive a fake backend at a fixed rate, then print the
//! latency report. Run with `cargo run --example loadtest`.

use std::time::Duration;

use tokio::io::BufReader;

use drover::{Format, NdjsonSink, Policy, Recorder, RunOptions, Status, render, run, summarize};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let (read, write) = tokio::io::duplex(64 * 1024);

    let mut task = run(RunOptions::builder()
        .duration(Duration::from_secs(2))
        .policy(Policy::Rate(20.0))
        .action(|recorder: Recorder| async move {
            recorder
                .time("plan", tokio::time::sleep(Duration::from_millis(2)))
                .await;
            recorder
                .time("work", tokio::time::sleep(Duration::from_millis(8)))
                .await;
            Status::Success
        })
        .output(NdjsonSink::new(write))
        .build())
    .expect("valid configuration");

    let (finished, summary) = tokio::join!(task.wait(), summarize(BufReader::new(read)));
    finished.expect("run completed");
    let summary = summary.expect("stream aggregated");

    let mut stdout = tokio::io::stdout();
    render(&summary, Format::Text, true, &mut stdout)
        .await
        .expect("report written");
}
