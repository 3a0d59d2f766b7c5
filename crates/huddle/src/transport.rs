//! Frame transports for [`ProcessChannel`](crate::ProcessChannel).
//!
//! A transport only moves encoded frames out; inbound frames arrive as a
//! [`Frames`] stream handed to [`ProcessChannel::listen`](crate::ProcessChannel::listen).
//!
//! - [`memory_pair`] wires two channels together inside one process.
//! - [`LineTransport`] writes newline-delimited JSON to any `AsyncWrite`
//!   (a child's stdin, a socket), and [`lines`] reads the other direction.
//!
//! # Example
//!
//! ```ignore
//! let mut child = Command::new(exe).stdin(Stdio::piped()).stdout(Stdio::piped()).spawn()?;
//! let transport = LineTransport::new(child.stdin.take().unwrap());
//! let channel = Arc::new(ProcessChannel::new(Arc::new(transport)));
//! tokio::spawn(channel.clone().listen(lines(child.stdout.take().unwrap())));
//! ```

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use crate::error::ChannelError;

/// Inbound frames.
pub type Frames = BoxStream<'static, String>;

/// Outbound half of a process channel.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Transmit one encoded frame.
    async fn send(&self, frame: String) -> Result<(), ChannelError>;
}

// =============================================================================
// In-memory
// =============================================================================

/// One end of an in-process channel pair.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, frame: String) -> Result<(), ChannelError> {
        self.tx.send(frame).map_err(|_| ChannelError::Closed)
    }
}

/// Two connected ends. Frames sent on one end's transport arrive on the
/// other end's stream.
pub fn memory_pair() -> ((MemoryTransport, Frames), (MemoryTransport, Frames)) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        (MemoryTransport { tx: a_tx }, receiver_stream(b_rx)),
        (MemoryTransport { tx: b_tx }, receiver_stream(a_rx)),
    )
}

fn receiver_stream(rx: mpsc::UnboundedReceiver<String>) -> Frames {
    stream::unfold(rx, |mut rx| async move {
        let frame = rx.recv().await?;
        Some((frame, rx))
    })
    .boxed()
}

// =============================================================================
// Newline-delimited JSON
// =============================================================================

/// Writes one frame per line.
pub struct LineTransport<W> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send + 'static> LineTransport<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> Transport for LineTransport<W> {
    async fn send(&self, mut frame: String) -> Result<(), ChannelError> {
        frame.push('\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(frame.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Read newline-delimited frames until EOF. Blank lines are skipped.
pub fn lines<R: AsyncRead + Unpin + Send + 'static>(reader: R) -> Frames {
    stream::unfold(BufReader::new(reader).lines(), |mut lines| async move {
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Some((line, lines)),
                Ok(None) => return None,
                Err(e) => {
                    warn!(error = %e, "frame stream failed");
                    return None;
                }
            }
        }
    })
    .boxed()
}
