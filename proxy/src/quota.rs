//! Byte-budget enforcement for streams flowing through the proxy.
//!
//! Both wrappers check the account before every operation and credit exactly
//! the bytes that moved afterwards. Enforcement is soft: a single operation
//! that starts under the limit may carry the account past it.
//!
//! [`QuotaBody`] can also carry a deadline, after which it fails instead of
//! waiting on the inner body.

use crate::account::{ConnectionSlot, UserAccount};
use bytes::Bytes;
use hyper::body::{Body, Frame, SizeHint};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use thiserror::Error;
use tokio::io::AsyncWrite;
use tokio::time::{Instant, Sleep, sleep_until};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("data limit of {limit} bytes exceeded")]
pub struct QuotaExceeded {
    pub limit: u64,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("time limit exceeded while streaming body")]
pub struct DeadlineExceeded;

impl From<QuotaExceeded> for io::Error {
    fn from(err: QuotaExceeded) -> Self {
        io::Error::other(err)
    }
}

#[derive(Debug, Clone)]
pub struct QuotaHandle {
    account: Arc<UserAccount>,
    limit: u64,
}

impl QuotaHandle {
    pub fn new(account: Arc<UserAccount>, limit: u64) -> Self {
        Self { account, limit }
    }

    pub fn check(&self) -> Result<(), QuotaExceeded> {
        if self.account.is_over_quota(self.limit) {
            Err(QuotaExceeded { limit: self.limit })
        } else {
            Ok(())
        }
    }

    pub fn record(&self, bytes: usize) {
        self.account.add_data(bytes as u64);
    }
}

/// Writer that refuses further writes once the account is over quota.
///
/// A refused write shuts the inner writer down first, so the peer reading
/// from it observes end of stream.
#[derive(Debug)]
pub struct QuotaWriter<W> {
    inner: W,
    quota: QuotaHandle,
    bytes_written: u64,
}

impl<W> QuotaWriter<W> {
    pub fn new(inner: W, quota: QuotaHandle) -> Self {
        Self {
            inner,
            quota,
            bytes_written: 0,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for QuotaWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Err(exceeded) = this.quota.check() {
            // The shutdown result is irrelevant; the write fails either way.
            let _ = ready!(Pin::new(&mut this.inner).poll_shutdown(cx));
            return Poll::Ready(Err(exceeded.into()));
        }

        let n = ready!(Pin::new(&mut this.inner).poll_write(cx, buf))?;
        this.quota.record(n);
        this.bytes_written += n as u64;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Body that credits each data frame to the account and stops yielding once
/// the account is over quota.
///
/// It may also own the request's [`ConnectionSlot`], which is then released
/// when the body finishes, fails, or is dropped.
#[derive(Debug)]
pub struct QuotaBody<B> {
    inner: B,
    quota: QuotaHandle,
    slot: Option<ConnectionSlot>,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl<B> QuotaBody<B> {
    pub fn new(inner: B, quota: QuotaHandle) -> Self {
        Self {
            inner,
            quota,
            slot: None,
            deadline: None,
        }
    }

    pub fn holding(mut self, slot: ConnectionSlot) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Fails the body with [`DeadlineExceeded`] once `deadline` passes.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(Box::pin(sleep_until(deadline)));
        self
    }
}

impl<B> Body for QuotaBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.inner.is_end_stream() {
            this.slot.take();
            return Poll::Ready(None);
        }
        if let Err(exceeded) = this.quota.check() {
            this.slot.take();
            return Poll::Ready(Some(Err(Box::new(exceeded))));
        }
        // Polling the timer also registers the waker, so a stalled inner body
        // is woken up when the deadline passes.
        if let Some(deadline) = this.deadline.as_mut()
            && deadline.as_mut().poll(cx).is_ready()
        {
            this.slot.take();
            return Poll::Ready(Some(Err(Box::new(DeadlineExceeded))));
        }

        match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    this.quota.record(data.len());
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Some(Err(err)) => {
                this.slot.take();
                Poll::Ready(Some(Err(err.into())))
            }
            None => {
                this.slot.take();
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
