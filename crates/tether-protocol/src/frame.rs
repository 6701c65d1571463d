//! Length-prefixed framing
//!
//! Format: `[length: 4 bytes BE][kind: 1 byte][payload: length-1 bytes]`.
//! The payload is JSON (empty for kinds without a body). Works over any
//! async byte stream: child process pipes, sockets, or in-memory duplex
//! streams.

use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::message::{Message, MessageKind};

/// Upper bound on a single frame (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Framing errors
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Empty frame")]
    Empty,

    #[error("Unknown message kind: {0}")]
    UnknownKind(u8),

    #[error("Frame too large: {0} bytes")]
    TooLarge(usize),

    #[error("Invalid payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// A raw frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(kind: MessageKind, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    /// Parse payload as JSON
    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, FrameError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Writes frames to an async byte sink
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Send a raw frame
    pub async fn send_frame(&mut self, frame: &Frame) -> Result<(), FrameError> {
        let len = 1 + frame.payload.len();
        if len > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(len));
        }
        self.inner.write_all(&(len as u32).to_be_bytes()).await?;
        self.inner.write_all(&[frame.kind as u8]).await?;
        self.inner.write_all(&frame.payload).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Encode and send a message
    pub async fn send(&mut self, msg: &Message) -> Result<(), FrameError> {
        self.send_frame(&msg.to_frame()?).await
    }
}

/// Reads frames from an async byte source
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Receive a raw frame. `Ok(None)` on a clean EOF.
    pub async fn recv_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let mut len_buf = [0u8; 4];
        match self.inner.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let len = u32::from_be_bytes(len_buf) as usize;

        if len == 0 {
            return Err(FrameError::Empty);
        }
        if len > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(len));
        }

        let mut kind_buf = [0u8; 1];
        self.inner.read_exact(&mut kind_buf).await?;
        let kind = MessageKind::try_from(kind_buf[0])?;

        let payload_len = len - 1;
        let mut payload = vec![0u8; payload_len];
        if payload_len > 0 {
            self.inner.read_exact(&mut payload).await?;
        }

        Ok(Some(Frame::new(kind, payload)))
    }

    /// Receive and decode a message. `Ok(None)` on a clean EOF.
    pub async fn recv(&mut self) -> Result<Option<Message>, FrameError> {
        match self.recv_frame().await? {
            Some(frame) => Ok(Some(Message::from_frame(&frame)?)),
            None => Ok(None),
        }
    }
}

/// Background pump tasks bridging a byte stream and message channels.
pub struct IoTasks {
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

impl IoTasks {
    pub fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Bridge a byte stream to a pair of message channels.
///
/// Messages sent on the returned sender are framed onto `writer` in send
/// order; frames decoded from `reader` arrive on the returned receiver.
/// The receiver closes on EOF or on the first framing error.
pub fn spawn_io<R, W>(
    label: String,
    reader: R,
    writer: W,
) -> (
    mpsc::UnboundedSender<Message>,
    mpsc::UnboundedReceiver<Message>,
    IoTasks,
)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Message>();

    let write_label = label.clone();
    let writer = tokio::spawn(async move {
        let mut writer = FrameWriter::new(writer);
        while let Some(msg) = out_rx.recv().await {
            if let Err(e) = writer.send(&msg).await {
                warn!(peer = %write_label, error = %e, "Failed to write frame");
                break;
            }
        }
        debug!(peer = %write_label, "Frame writer finished");
    });

    let reader = tokio::spawn(async move {
        let mut reader = FrameReader::new(reader);
        loop {
            match reader.recv().await {
                Ok(Some(msg)) => {
                    if in_tx.send(msg).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!(peer = %label, "Peer closed connection");
                    break;
                }
                Err(e) => {
                    warn!(peer = %label, error = %e, "Failed to read frame");
                    break;
                }
            }
        }
    });

    (out_tx, in_rx, IoTasks { reader, writer })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CallMessage;
    use serde_json::json;

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let (a, b) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(a);
        let mut reader = FrameReader::new(b);

        let msg = Message::Call(CallMessage::new("greet", json!({"name": "ada"})));
        writer.send(&msg).await.unwrap();
        writer.send(&Message::HandshakeAck).await.unwrap();

        assert_eq!(reader.recv().await.unwrap(), Some(msg));
        assert_eq!(reader.recv().await.unwrap(), Some(Message::HandshakeAck));

        drop(writer);
        assert_eq!(reader.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_zero_length_frame_is_error() {
        let (mut a, b) = tokio::io::duplex(64);
        a.write_all(&0u32.to_be_bytes()).await.unwrap();
        let mut reader = FrameReader::new(b);
        assert!(matches!(reader.recv_frame().await, Err(FrameError::Empty)));
    }

    #[tokio::test]
    async fn test_unknown_kind_is_error() {
        let (mut a, b) = tokio::io::duplex(64);
        a.write_all(&1u32.to_be_bytes()).await.unwrap();
        a.write_all(&[42]).await.unwrap();
        let mut reader = FrameReader::new(b);
        assert!(matches!(
            reader.recv_frame().await,
            Err(FrameError::UnknownKind(42))
        ));
    }

    #[tokio::test]
    async fn test_spawn_io_preserves_order() {
        let (host_io, guest_io) = tokio::io::duplex(4096);
        let (host_r, host_w) = tokio::io::split(host_io);
        let (guest_r, guest_w) = tokio::io::split(guest_io);

        let (host_tx, _host_rx, _host_tasks) = spawn_io("guest".into(), host_r, host_w);
        let (_guest_tx, mut guest_rx, _guest_tasks) = spawn_io("host".into(), guest_r, guest_w);

        for i in 0..20 {
            host_tx
                .send(Message::Call(CallMessage::new("tick", json!({"i": i}))))
                .unwrap();
        }

        for i in 0..20 {
            match guest_rx.recv().await.unwrap() {
                Message::Call(call) => assert_eq!(call.payload["i"], i),
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }
}
