//! Stream wrapper that reports bytes received at a fixed cadence.

use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::time::{Duration, Instant};

/// Callback for progress updates, given the running byte count
pub type ProgressCallback = Box<dyn FnMut(u64) + Send>;

pub struct ProgressStream<S> {
    inner: S,
    bytes_transferred: u64,
    last_update: Instant,
    update_interval: Duration,
    callback: ProgressCallback,
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, update_interval: Duration, callback: ProgressCallback) -> Self {
        Self {
            inner,
            bytes_transferred: 0,
            last_update: Instant::now(),
            update_interval,
            callback,
        }
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }
}

impl<S, E> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(bytes))) => {
                this.bytes_transferred += bytes.len() as u64;

                let now = Instant::now();
                if now.duration_since(this.last_update) >= this.update_interval {
                    (this.callback)(this.bytes_transferred);
                    this.last_update = now;
                }

                Poll::Ready(Some(Ok(bytes)))
            }
            Poll::Ready(None) => {
                (this.callback)(this.bytes_transferred);
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream::{self, StreamExt};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_reports_final_count() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let chunks = stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"abc")),
            Ok(Bytes::from_static(b"defg")),
        ]);
        let mut progress = ProgressStream::new(
            chunks,
            Duration::from_secs(3600),
            Box::new(move |n| sink.lock().unwrap().push(n)),
        );

        while let Some(chunk) = progress.next().await {
            chunk.unwrap();
        }

        assert_eq!(progress.bytes_transferred(), 7);
        assert_eq!(*seen.lock().unwrap(), vec![7]);
    }
}
