//! In-process and writer-backed output sinks

use crate::output::traits::{OutputError, OutputResult, OutputSink};
use std::io::Write;
use tokio::sync::mpsc;

#[derive(Debug)]
enum StreamMessage {
    Data(Vec<u8>),
    Close,
    Abort(String),
}

/// Creates a connected sink/stream pair
///
/// The sink side is handed to a job; the stream side is read by the caller.
pub fn output_channel() -> (ChannelSink, OutputStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink { tx }, OutputStream { rx })
}

/// Write half of an output channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StreamMessage>,
}

impl ChannelSink {
    /// Whether the reading half has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl OutputSink for ChannelSink {
    fn write(&mut self, bytes: &[u8]) -> OutputResult<()> {
        self.tx
            .send(StreamMessage::Data(bytes.to_vec()))
            .map_err(|_| OutputError::Disconnected)
    }

    fn close(self: Box<Self>) -> OutputResult<()> {
        self.tx
            .send(StreamMessage::Close)
            .map_err(|_| OutputError::Disconnected)
    }

    fn abort(self: Box<Self>, message: &str) {
        if self.tx.send(StreamMessage::Abort(message.to_string())).is_err() {
            tracing::debug!("Output consumer gone before abort: {}", message);
        }
    }

    fn is_closed(&self) -> bool {
        ChannelSink::is_closed(self)
    }
}

/// Read half of an output channel
pub struct OutputStream {
    rx: mpsc::UnboundedReceiver<StreamMessage>,
}

impl OutputStream {
    /// Reads until the sink closes or aborts, returning everything written
    ///
    /// A sink dropped without reaching `close` yields [`OutputError::Truncated`] so a
    /// partial body is never mistaken for a complete one.
    pub async fn collect(mut self) -> OutputResult<Vec<u8>> {
        let mut body = Vec::new();

        while let Some(message) = self.rx.recv().await {
            match message {
                StreamMessage::Data(bytes) => body.extend_from_slice(&bytes),
                StreamMessage::Close => return Ok(body),
                StreamMessage::Abort(message) => return Err(OutputError::Aborted(message)),
            }
        }

        Err(OutputError::Truncated)
    }
}

/// Sink that writes straight into an `io::Write`, such as stdout
pub struct WriterSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send> OutputSink for WriterSink<W> {
    fn write(&mut self, bytes: &[u8]) -> OutputResult<()> {
        self.writer.write_all(bytes)?;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> OutputResult<()> {
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    fn abort(mut self: Box<Self>, message: &str) {
        tracing::error!("Output aborted: {}", message);
        if let Err(e) = self.writer.flush() {
            tracing::debug!("Flush after abort failed: {}", e);
        }
    }
}
