use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;

/// Per-subscriber view onto a stream's broadcast channel.
///
/// Adapts the capacity-1 queue of payload windows into a byte-oriented
/// reader: a window larger than the caller's buffer is handed out
/// across several reads via the residual, and a closed channel reads as
/// end-of-stream once the residual is drained. Single consumer; the
/// owning stream holds the sender half and drops it on tear-down.
pub struct RtpReader {
    rx: mpsc::Receiver<Bytes>,
    residual: Bytes,
}

impl RtpReader {
    pub(crate) fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            rx,
            residual: Bytes::new(),
        }
    }
}

impl AsyncRead for RtpReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.residual.is_empty() {
            match this.rx.poll_recv(cx) {
                // Empty windows are never enqueued, so a fresh slice
                // always makes progress below.
                Poll::Ready(Some(data)) => this.residual = data,
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }

        let n = this.residual.len().min(buf.remaining());
        buf.put_slice(&this.residual.split_to(n));
        Poll::Ready(Ok(()))
    }
}
