//! Event sinks — the I/O boundary of a run.
//!
//! The scheduler is the sole writer of a sink and closes it exactly once
//! when the run finishes. Two built-ins cover the common cases: an
//! in-process channel for live observation and a newline-delimited JSON
//! writer for files, pipes, and sockets.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::event::Event;

/// Consumes the ordered event stream produced by a run.
#[async_trait]
pub trait EventSink: Send {
    async fn emit(&mut self, event: Event) -> io::Result<()>;

    /// Called exactly once after the final event.
    async fn close(&mut self) -> io::Result<()>;
}

/// Create a connected [`ChannelSink`] / [`EventStream`] pair.
pub fn event_channel() -> (ChannelSink, EventStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink { tx: Some(tx) }, EventStream { rx })
}

/// In-process sink delivering events over an unbounded channel.
///
/// If the receiving side is dropped mid-run, further events are discarded
/// and the run still completes normally.
pub struct ChannelSink {
    tx: Option<mpsc::UnboundedSender<Event>>,
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&mut self, event: Event) -> io::Result<()> {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.tx.take();
        Ok(())
    }
}

/// Reader half of [`event_channel`]. Yields events in emission order and
/// ends when the run closes its sink.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Drain the stream to completion.
    pub async fn collect(mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}

/// Sink writing the wire format: one JSON object per line.
pub struct NdjsonSink<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> NdjsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> EventSink for NdjsonSink<W> {
    async fn emit(&mut self, event: Event) -> io::Result<()> {
        let mut line = serde_json::to_vec(&event).map_err(io::Error::from)?;
        line.push(b'\n');
        self.writer.write_all(&line).await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.writer.flush().await?;
        self.writer.shutdown().await
    }
}
