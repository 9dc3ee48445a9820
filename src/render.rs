//! Renderers — pure projections of a [`RunSummary`] onto an output sink.
//!
//! `json` is a verbatim serialization, `text` prints summary and latency
//! tables, `plot` emits a self-contained HTML page embedding the summary
//! data. Styling is opt-in: with `color: false` the text output contains no
//! escape sequences at all.

use std::io;
use std::str::FromStr;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::report::{LatencyStats, RunSummary};

/// Output shape for [`render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    Json,
    #[default]
    Text,
    Plot,
}

impl FromStr for Format {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "json" => Ok(Format::Json),
            "text" => Ok(Format::Text),
            "plot" => Ok(Format::Plot),
            other => Err(format!("unknown report type: {other}")),
        }
    }
}

/// Render the summary and write it fully before returning.
pub async fn render<W>(
    summary: &RunSummary,
    format: Format,
    color: bool,
    output: &mut W,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = match format {
        Format::Json => {
            let mut json = serde_json::to_vec(summary).map_err(io::Error::from)?;
            json.push(b'\n');
            json
        }
        Format::Text => text(summary, color).into_bytes(),
        Format::Plot => plot(summary)?.into_bytes(),
    };
    output.write_all(&bytes).await?;
    output.flush().await
}

/// Row tone, applied line-wide when color is on so cell widths stay true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tone {
    Plain,
    Header,
    Better,
    Worse,
}

pub(crate) struct Row {
    pub cells: Vec<String>,
    pub tone: Tone,
}

impl Row {
    pub fn plain(cells: Vec<String>) -> Self {
        Self {
            cells,
            tone: Tone::Plain,
        }
    }

    pub fn header(cells: Vec<&str>) -> Self {
        Self {
            cells: cells.into_iter().map(str::to_owned).collect(),
            tone: Tone::Header,
        }
    }
}

pub(crate) fn paint(line: String, tone: Tone, color: bool) -> String {
    if !color || tone == Tone::Plain {
        return line;
    }
    use crossterm::style::Stylize;
    match tone {
        Tone::Header => line.bold().to_string(),
        Tone::Better => line.green().to_string(),
        Tone::Worse => line.red().to_string(),
        Tone::Plain => line,
    }
}

/// Lay out rows as a left-aligned table, two-space indent and gutters.
pub(crate) fn table(rows: &[Row], color: bool) -> String {
    let columns = rows.iter().map(|row| row.cells.len()).max().unwrap_or(0);
    let mut widths = vec![0usize; columns];
    for row in rows {
        for (idx, cell) in row.cells.iter().enumerate() {
            widths[idx] = widths[idx].max(cell.len());
        }
    }

    let mut out = String::new();
    for row in rows {
        let mut line = String::from("  ");
        for (idx, cell) in row.cells.iter().enumerate() {
            if idx + 1 == row.cells.len() {
                line.push_str(cell);
            } else {
                line.push_str(&format!("{cell:<width$}  ", width = widths[idx]));
            }
        }
        out.push_str(&paint(line.trim_end().to_owned(), row.tone, color));
        out.push('\n');
    }
    out
}

pub(crate) fn fmt_ms(value: f64) -> String {
    format!("{value:.3}ms")
}

/// Milliseconds rendered in seconds, trailing zeros trimmed: `30000` → `30s`.
pub(crate) fn fmt_seconds(ms: u64) -> String {
    format!("{}s", ms as f64 / 1000.0)
}

pub(crate) fn stat_rows(stats: &LatencyStats) -> [(&'static str, f64); 5] {
    [
        ("mean", stats.mean),
        ("50", stats.p50),
        ("95", stats.p95),
        ("99", stats.p99),
        ("max", stats.max),
    ]
}

fn text(summary: &RunSummary, color: bool) -> String {
    let mut out = String::new();

    out.push_str(&paint("Summary:".to_owned(), Tone::Header, color));
    out.push('\n');

    let mut header = vec!["duration"];
    let mut row = vec![
        summary
            .info
            .duration
            .map(fmt_seconds)
            .unwrap_or_else(|| "-".to_owned()),
    ];
    if let Some(rate) = summary.info.rate {
        header.push("rate");
        row.push(rate.to_string());
    } else if let Some(concurrent) = summary.info.concurrent {
        header.push("concurrent");
        row.push(concurrent.to_string());
    }
    header.push("total");
    row.push(summary.info.count.to_string());

    out.push_str(&table(&[Row::header(header), Row::plain(row)], color));
    out.push('\n');

    out.push_str(&paint("Latencies:".to_owned(), Tone::Header, color));
    out.push('\n');

    let mut rows = vec![Row::header(vec!["", "mean", "50", "95", "99", "max"])];
    for (name, stats) in summary.latencies.iter() {
        let mut cells = vec![name.to_owned()];
        cells.extend(stat_rows(stats).iter().map(|(_, value)| fmt_ms(*value)));
        rows.push(Row::plain(cells));
    }
    out.push_str(&table(&rows, color));
    out
}

const PLOT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>latency report</title>
<style>
body { font-family: sans-serif; margin: 2em; }
.segment { margin-bottom: 1.5em; }
.bar { background: #4a90d9; color: #fff; padding: 2px 6px; margin: 2px 0; white-space: nowrap; }
.label { display: inline-block; width: 4em; }
</style>
</head>
<body>
<h1>Latency report</h1>
<div id="charts"></div>
<script>
const SUMMARY = __DATA__;
const charts = document.getElementById('charts');
const stats = ['mean', '50', '95', '99', 'max'];
const max = Math.max.apply(null, Object.values(SUMMARY.latencies).map(function (s) { return s.max; }));
Object.keys(SUMMARY.latencies).forEach(function (name) {
  const latency = SUMMARY.latencies[name];
  const section = document.createElement('div');
  section.className = 'segment';
  const title = document.createElement('h2');
  title.textContent = name;
  section.appendChild(title);
  stats.forEach(function (stat) {
    const value = latency[stat];
    const bar = document.createElement('div');
    bar.className = 'bar';
    bar.style.width = Math.max(2, value / max * 100) + '%';
    bar.innerHTML = '<span class="label">' + stat + '</span>' + value.toFixed(3) + 'ms';
    section.appendChild(bar);
  });
  charts.appendChild(section);
});
</script>
</body>
</html>
"#;

fn plot(summary: &RunSummary) -> io::Result<String> {
    let data = serde_json::to_string(summary).map_err(io::Error::from)?;
    Ok(PLOT_TEMPLATE.replace("__DATA__", &data))
}
