//! Lazy, pull-based pipes.
//!
//! A [`Pipe`] wraps a boxed stream and exposes the few transforms the store
//! needs to move large parameter sets through bounded statements: `map`,
//! `then`, `batch`, `flat`, and the terminal `gather`/`try_gather`. Nothing
//! upstream runs until the pipe is polled.
//!
//! [`Pipe::buffered`] moves the upstream onto its own task behind a bounded
//! channel, so a slow consumer stalls the producer once `capacity` items are
//! waiting.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// A lazy sequence of items.
pub struct Pipe<T> {
    inner: BoxStream<'static, T>,
}

impl<T: Send + 'static> Pipe<T> {
    /// Pipe over an in-memory iterator.
    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
    {
        Self {
            inner: stream::iter(items).boxed(),
        }
    }

    /// Pipe over any stream.
    pub fn from_stream<S>(upstream: S) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
    {
        Self {
            inner: upstream.boxed(),
        }
    }

    pub fn map<U, F>(self, f: F) -> Pipe<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> U + Send + 'static,
    {
        Pipe {
            inner: self.inner.map(f).boxed(),
        }
    }

    /// Map each item through an async function, one at a time, in order.
    pub fn then<U, F, Fut>(self, f: F) -> Pipe<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = U> + Send + 'static,
    {
        Pipe {
            inner: self.inner.then(f).boxed(),
        }
    }

    /// Group items into chunks of `size` (at least one). The last chunk may
    /// be shorter.
    pub fn batch(self, size: usize) -> Pipe<Vec<T>> {
        Pipe {
            inner: self.inner.chunks(size.max(1)).boxed(),
        }
    }

    /// Run the upstream on its own task, feeding a channel of `capacity`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn buffered(self, capacity: usize) -> Pipe<T> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut upstream = self.inner;
        tokio::spawn(async move {
            while let Some(item) = upstream.next().await {
                if tx.send(item).await.is_err() {
                    // consumer dropped the pipe
                    break;
                }
            }
        });
        Pipe::from_stream(ReceiverStream::new(rx))
    }

    /// Drain the pipe into memory. Only for sequences known to be bounded.
    pub async fn gather(self) -> Vec<T> {
        self.inner.collect().await
    }
}

impl<T: Send + 'static> Pipe<Vec<T>> {
    /// Undo `batch`.
    pub fn flat(self) -> Pipe<T> {
        Pipe {
            inner: self.inner.flat_map(stream::iter).boxed(),
        }
    }
}

impl<T, E> Pipe<Result<T, E>>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Drain the pipe, stopping at the first error.
    pub async fn try_gather(self) -> Result<Vec<T>, E> {
        self.inner.try_collect().await
    }
}

impl<T> Stream for Pipe<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.inner.poll_next_unpin(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> std::fmt::Debug for Pipe<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipe").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_batch_last_chunk_may_be_short() {
        let chunks = Pipe::from_iter(1..=7).batch(3).gather().await;
        assert_eq!(chunks, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);
    }

    #[tokio::test]
    async fn test_batch_zero_behaves_as_one() {
        let chunks = Pipe::from_iter(vec!["a", "b"]).batch(0).gather().await;
        assert_eq!(chunks, vec![vec!["a"], vec!["b"]]);
    }

    #[tokio::test]
    async fn test_then_runs_in_order() {
        let out = Pipe::from_iter(vec![30u64, 10, 20])
            .then(|ms| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                ms
            })
            .gather()
            .await;
        assert_eq!(out, vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn test_pipe_is_lazy() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&pulled);
        let mut pipe = Pipe::from_iter(0..10).map(move |i| {
            counter.fetch_add(1, Ordering::SeqCst);
            i
        });
        assert_eq!(pulled.load(Ordering::SeqCst), 0);

        assert_eq!(pipe.next().await, Some(0));
        assert_eq!(pulled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_try_gather_stops_at_first_error() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let result = Pipe::from_iter(0..10)
            .map(move |i| {
                counter.fetch_add(1, Ordering::SeqCst);
                if i == 3 {
                    Err(format!("bad {}", i))
                } else {
                    Ok(i)
                }
            })
            .try_gather()
            .await;
        assert_eq!(result, Err("bad 3".to_string()));
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_buffered_applies_backpressure() {
        let produced = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&produced);
        let pipe = Pipe::from_iter(0..100)
            .map(move |i| {
                counter.fetch_add(1, Ordering::SeqCst);
                i
            })
            .buffered(2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        // two queued plus one parked in `send`
        assert!(produced.load(Ordering::SeqCst) <= 3);

        let all = pipe.gather().await;
        assert_eq!(all, (0..100).collect::<Vec<_>>());
        assert_eq!(produced.load(Ordering::SeqCst), 100);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Batching then flattening yields the original sequence.
        #[test]
        fn prop_batch_then_flat_preserves_items(
            items in prop::collection::vec(any::<u16>(), 0..200),
            size in 1usize..50,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (chunks, flat) = rt.block_on(async {
                let chunks = Pipe::from_iter(items.clone()).batch(size).gather().await;
                let flat = Pipe::from_iter(items.clone()).batch(size).flat().gather().await;
                (chunks, flat)
            });
            prop_assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= size));
            prop_assert_eq!(chunks.len(), items.len().div_ceil(size));
            prop_assert_eq!(flat, items);
        }
    }
}
