//! Transfer progress logging for outgoing documents.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::io::{AsyncRead, ReadBuf};
use tracing::info;

/// Percentage step between two progress log lines.
const STEP: u64 = 10;

/// Wraps a reader and logs how much of it has been consumed.
pub struct ProgressReader<R> {
    inner: R,
    label: String,
    total: u64,
    transferred: u64,
    next_report: u64,
}

impl<R> ProgressReader<R> {
    pub fn new(inner: R, label: impl Into<String>, total: u64) -> Self {
        Self {
            inner,
            label: label.into(),
            total,
            transferred: 0,
            next_report: STEP,
        }
    }

    fn percentage(&self) -> u64 {
        if self.total == 0 {
            100
        } else {
            (self.transferred.saturating_mul(100) / self.total).min(100)
        }
    }

    fn record(&mut self, read: usize) {
        self.transferred += read as u64;
        let percentage = self.percentage();
        if percentage >= self.next_report {
            info!(title = %self.label, percentage, "transferred");
            self.next_report = (percentage / STEP + 1) * STEP;
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let read = buf.filled().len() - before;
            if read > 0 {
                this.record(read);
            }
        }
        poll
    }
}
