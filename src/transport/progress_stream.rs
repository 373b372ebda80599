use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use tokio_util::sync::CancellationToken;
use crate::core::progress::ProgressReporter;

pin_project! {
    /// 统计请求体已发送的字节数并上报进度
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        reporter: Arc<ProgressReporter>,
        cancellation_token: CancellationToken,
        bytes_sent: u64,
        bytes_total: u64,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, reporter: Arc<ProgressReporter>, cancellation_token: CancellationToken, bytes_total: u64) -> Self {
        Self {
            inner,
            reporter,
            cancellation_token,
            bytes_sent: 0,
            bytes_total,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        // 取消后不再读取文件
        if this.cancellation_token.is_cancelled() {
            return Poll::Ready(Some(Err(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "upload cancelled",
            ))));
        }

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !chunk.is_empty() {
                    *this.bytes_sent += chunk.len() as u64;
                    this.reporter.report(*this.bytes_sent, *this.bytes_total);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}
