//! Comparison of two or more event streams side by side.
//!
//! Every source must be a genuine event stream; each is aggregated with the
//! same engine as a single-run report, then the latency statistics are laid
//! out per source with percent deltas against the first. Sources may be
//! given as a plain list (labelled by position) or with explicit names.

use std::path::Path;

use futures::future::join_all;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::DiffError;
use crate::render::{Row, Tone, fmt_ms, fmt_seconds, paint, stat_rows, table};
use crate::report::{RunSummary, summarize};

/// Comparison inputs: array- or name-keyed readable streams.
#[derive(Debug)]
pub enum DiffSources<R> {
    List(Vec<R>),
    Named(Vec<(String, R)>),
}

impl<R> DiffSources<R> {
    fn into_labeled(self) -> Vec<(String, R)> {
        match self {
            DiffSources::List(sources) => sources
                .into_iter()
                .enumerate()
                .map(|(idx, source)| (idx.to_string(), source))
                .collect(),
            DiffSources::Named(sources) => sources,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiffOptions {
    pub color: bool,
}

/// Aggregate every source and write the comparison. Requires at least two
/// sources; fails before writing anything if the contract is not met.
pub async fn diff<R, W>(
    sources: DiffSources<R>,
    options: DiffOptions,
    output: &mut W,
) -> Result<(), DiffError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let labeled = sources.into_labeled();
    if labeled.len() < 2 {
        return Err(DiffError::TooFewStreams);
    }

    let summaries = join_all(
        labeled
            .into_iter()
            .map(|(label, source)| async move { (label, summarize(source).await) }),
    )
    .await;
    let mut resolved: Vec<(String, RunSummary)> = Vec::with_capacity(summaries.len());
    for (label, summary) in summaries {
        resolved.push((label, summary?));
    }

    let text = render_diff(&resolved, options.color);
    output
        .write_all(text.as_bytes())
        .await
        .map_err(DiffError::Io)?;
    output.flush().await.map_err(DiffError::Io)?;
    Ok(())
}

/// Open file-backed sources. Anything that is not a readable regular file
/// violates the stream contract.
pub async fn open_sources(
    paths: &[impl AsRef<Path>],
) -> Result<DiffSources<BufReader<File>>, DiffError> {
    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        let path = path.as_ref();
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|_| DiffError::NotReadable)?;
        if !meta.is_file() {
            return Err(DiffError::NotReadable);
        }
        let file = File::open(path).await.map_err(|_| DiffError::NotReadable)?;
        sources.push(BufReader::new(file));
    }
    Ok(DiffSources::List(sources))
}

/// Open a file-backed output sink for the comparison.
pub async fn open_output(path: impl AsRef<Path>) -> Result<File, DiffError> {
    File::create(path.as_ref())
        .await
        .map_err(|_| DiffError::OutputNotWritable)
}

fn delta_percent(base: f64, value: f64) -> Option<f64> {
    (base != 0.0).then(|| (value - base) / base * 100.0)
}

fn render_diff(summaries: &[(String, RunSummary)], color: bool) -> String {
    let mut out = String::new();

    out.push_str(&paint("Summary:".to_owned(), Tone::Header, color));
    out.push('\n');

    let mut rows = vec![Row::header(vec![
        "source",
        "duration",
        "rate",
        "concurrent",
        "total",
    ])];
    for (label, summary) in summaries {
        rows.push(Row::plain(vec![
            label.clone(),
            summary
                .info
                .duration
                .map(fmt_seconds)
                .unwrap_or_else(|| "-".to_owned()),
            summary
                .info
                .rate
                .map(|rate| rate.to_string())
                .unwrap_or_else(|| "-".to_owned()),
            summary
                .info
                .concurrent
                .map(|concurrent| concurrent.to_string())
                .unwrap_or_else(|| "-".to_owned()),
            summary.info.count.to_string(),
        ]));
    }
    out.push_str(&table(&rows, color));
    out.push('\n');

    out.push_str(&paint("Latencies:".to_owned(), Tone::Header, color));
    out.push('\n');

    // Union of segment labels, keeping first-encounter order across sources.
    let mut segments: Vec<&str> = Vec::new();
    for (_, summary) in summaries {
        for name in summary.latencies.keys() {
            if !segments.contains(&name) {
                segments.push(name);
            }
        }
    }

    let mut header = vec!["".to_owned(), "".to_owned()];
    header.extend(summaries.iter().map(|(label, _)| label.clone()));
    let mut rows = vec![Row {
        cells: header,
        tone: Tone::Header,
    }];

    for segment in segments {
        let base = summaries[0].1.latencies.get(segment);
        for (stat_idx, stat_name) in ["mean", "50", "95", "99", "max"].iter().enumerate() {
            let mut cells = vec![
                if stat_idx == 0 {
                    segment.to_owned()
                } else {
                    String::new()
                },
                (*stat_name).to_owned(),
            ];
            let mut worst: Option<f64> = None;
            for (source_idx, (_, summary)) in summaries.iter().enumerate() {
                let cell = match summary.latencies.get(segment) {
                    Some(stats) => {
                        let value = stat_rows(stats)[stat_idx].1;
                        if source_idx == 0 {
                            fmt_ms(value)
                        } else {
                            match base.map(|base| stat_rows(base)[stat_idx].1) {
                                Some(base_value) => match delta_percent(base_value, value) {
                                    Some(delta) => {
                                        worst = Some(worst.map_or(delta, |w: f64| w.max(delta)));
                                        format!("{} ({delta:+.1}%)", fmt_ms(value))
                                    }
                                    None => fmt_ms(value),
                                },
                                None => fmt_ms(value),
                            }
                        }
                    }
                    None => "-".to_owned(),
                };
                cells.push(cell);
            }
            let tone = match worst {
                Some(delta) if delta > 0.5 => Tone::Worse,
                Some(delta) if delta < -0.5 => Tone::Better,
                _ => Tone::Plain,
            };
            rows.push(Row { cells, tone });
        }
    }
    out.push_str(&table(&rows, color));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::CAPTURED_STREAM;
    use crate::render::tests::strip_styling;

    #[tokio::test]
    async fn diffs_a_list_of_streams() {
        let sources = DiffSources::List(vec![
            CAPTURED_STREAM.as_bytes(),
            CAPTURED_STREAM.as_bytes(),
        ]);
        let mut out = Vec::new();
        diff(sources, DiffOptions::default(), &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(!text.is_empty());
        assert!(!text.contains('\x1b'));
        assert!(text.contains("Summary:"));
        assert!(text.contains("fullTest"));
        // Identical streams: every delta is +0.0%.
        assert!(text.contains("(+0.0%)"));
    }

    #[tokio::test]
    async fn diffs_named_streams() {
        let sources = DiffSources::Named(vec![
            ("before".to_owned(), CAPTURED_STREAM.as_bytes()),
            ("after".to_owned(), CAPTURED_STREAM.as_bytes()),
        ]);
        let mut out = Vec::new();
        diff(sources, DiffOptions::default(), &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("before"));
        assert!(text.contains("after"));
    }

    #[tokio::test]
    async fn colored_output_strips_back_to_plain() {
        let plain = {
            let sources = DiffSources::List(vec![
                CAPTURED_STREAM.as_bytes(),
                CAPTURED_STREAM.as_bytes(),
            ]);
            let mut out = Vec::new();
            diff(sources, DiffOptions { color: false }, &mut out)
                .await
                .unwrap();
            String::from_utf8(out).unwrap()
        };

        let sources = DiffSources::List(vec![
            CAPTURED_STREAM.as_bytes(),
            CAPTURED_STREAM.as_bytes(),
        ]);
        let mut out = Vec::new();
        diff(sources, DiffOptions { color: true }, &mut out)
            .await
            .unwrap();
        let styled = String::from_utf8(out).unwrap();

        assert!(styled.contains('\x1b'));
        assert_eq!(strip_styling(&styled), plain);
    }

    #[tokio::test]
    async fn requires_at_least_two_streams() {
        let sources = DiffSources::List(vec![CAPTURED_STREAM.as_bytes()]);
        let mut out = Vec::new();
        let err = diff(sources, DiffOptions::default(), &mut out)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "at least two streams are required for a diff"
        );
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn empty_source_is_a_data_error() {
        let sources = DiffSources::List(vec![CAPTURED_STREAM.as_bytes(), &b""[..]]);
        let mut out = Vec::new();
        let err = diff(sources, DiffOptions::default(), &mut out)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no data provided");
    }

    #[tokio::test]
    async fn non_file_source_violates_the_stream_contract() {
        let dir = tempfile::tempdir().unwrap();
        let stream_path = dir.path().join("run.ndjson");
        tokio::fs::write(&stream_path, CAPTURED_STREAM).await.unwrap();

        let err = open_sources(&[stream_path.as_path(), dir.path()])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "streams is not an array or has object of readable streams"
        );

        let err = open_sources(&[dir.path().join("missing.ndjson")])
            .await
            .unwrap_err();
        assert!(matches!(err, DiffError::NotReadable));
    }

    #[tokio::test]
    async fn unwritable_output_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_output(dir.path().join("no/such/dir/out.txt"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "options.output is not a writable stream");
    }

    #[tokio::test]
    async fn file_backed_sources_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.ndjson");
        let second = dir.path().join("second.ndjson");
        tokio::fs::write(&first, CAPTURED_STREAM).await.unwrap();
        tokio::fs::write(&second, CAPTURED_STREAM).await.unwrap();

        let sources = open_sources(&[first, second]).await.unwrap();
        let mut output = open_output(dir.path().join("diff.txt")).await.unwrap();
        diff(sources, DiffOptions::default(), &mut output)
            .await
            .unwrap();

        let written = tokio::fs::read_to_string(dir.path().join("diff.txt"))
            .await
            .unwrap();
        assert!(written.contains("Latencies:"));
    }
}
