//! Aggregation of an event stream into per-segment latency statistics.
//!
//! The consumer reads newline-delimited JSON to end of input: an optional
//! header, then report events. Every segment label observed contributes its
//! duration samples in encounter order; statistics use nearest-rank
//! percentile selection over the ascending-sorted samples — no
//! interpolation. A stream with zero report events is an input error,
//! distinct from any I/O failure.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite};

use crate::error::ReportError;
use crate::event::{Event, OrderedMap};
use crate::render::{self, Format};

/// Aggregated result of one run, independent of how it gets rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub info: RunInfo,
    pub latencies: OrderedMap<LatencyStats>,
}

/// Run-level metadata: the observed report count plus whatever the header
/// carried. Header-derived fields are absent when the stream had no header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInfo {
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrent: Option<u64>,
}

/// Summary statistics for one segment label, durations in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    #[serde(rename = "50")]
    pub p50: f64,
    #[serde(rename = "95")]
    pub p95: f64,
    #[serde(rename = "99")]
    pub p99: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

/// Nearest-rank percentile over ascending-sorted samples:
/// `rank = clamp(ceil(p/100 * n), 1, n)`, 1-indexed.
fn nearest_rank(sorted: &[f64], percentile: f64) -> f64 {
    let n = sorted.len();
    let rank = ((percentile / 100.0) * n as f64).ceil() as usize;
    sorted[rank.clamp(1, n) - 1]
}

impl LatencyStats {
    fn from_samples(samples: &[f64]) -> Self {
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);
        Self {
            p50: nearest_rank(&sorted, 50.0),
            p95: nearest_rank(&sorted, 95.0),
            p99: nearest_rank(&sorted, 99.0),
            mean,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
        }
    }
}

/// Consume an event stream to end of input and compute the run summary.
pub async fn summarize<R>(input: R) -> Result<RunSummary, ReportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut info = RunInfo {
        count: 0,
        target_count: None,
        duration: None,
        rate: None,
        concurrent: None,
    };
    let mut samples: OrderedMap<Vec<f64>> = OrderedMap::new();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(&line)? {
            Event::Header {
                duration,
                rate,
                concurrent,
                target_count,
                ..
            } => {
                info.duration = Some(duration);
                info.rate = rate;
                info.concurrent = concurrent;
                info.target_count = target_count;
            }
            Event::Report { report, .. } => {
                info.count += 1;
                for (name, segment) in report.iter() {
                    samples
                        .get_or_insert_with(name, Vec::new)
                        .push(segment.duration);
                }
            }
        }
    }

    if info.count == 0 {
        return Err(ReportError::NoData);
    }

    let latencies = samples
        .into_iter()
        .map(|(name, samples)| (name, LatencyStats::from_samples(&samples)))
        .collect();

    Ok(RunSummary { info, latencies })
}

/// Aggregate then render in one step: the `report` pipeline.
pub async fn report<R, W>(
    input: R,
    format: Format,
    color: bool,
    output: &mut W,
) -> Result<(), ReportError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let summary = summarize(input).await?;
    render::render(&summary, format, color, output).await?;
    Ok(())
}
