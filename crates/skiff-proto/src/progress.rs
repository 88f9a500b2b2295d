//! Progress-observing writer

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

/// Callback receiving the completed fraction of a transfer, in `[0.0, 1.0]`
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Writer wrapper that reports `done / total` after every successful write
pub struct ProgressWriter<W> {
    inner: W,
    done: u64,
    total: u64,
    progress: Option<ProgressFn>,
}

impl<W> ProgressWriter<W> {
    /// Wrap `inner` for a transfer of `total` bytes
    pub fn new(inner: W, total: u64, progress: Option<ProgressFn>) -> Self {
        Self {
            inner,
            done: 0,
            total,
            progress,
        }
    }

    /// Bytes written so far
    pub fn done(&self) -> u64 {
        self.done
    }

    /// Report completion of an empty transfer.
    ///
    /// Non-empty transfers already reported 1.0 on their last write.
    pub fn complete(&self) {
        if self.total == 0 {
            if let Some(progress) = &self.progress {
                progress(1.0);
            }
        }
    }

    /// Unwrap the inner writer
    pub fn into_inner(self) -> W {
        self.inner
    }

    fn record(&mut self, n: usize) {
        self.done += n as u64;
        if let Some(progress) = &self.progress {
            if self.total > 0 {
                progress(self.done as f64 / self.total as f64);
            }
        }
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ProgressWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.record(n);
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
