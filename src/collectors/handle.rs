use futures_util::stream::Stream;
use log::debug;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{PsiError, Result};

/// One-shot stop control for a background collector task.
///
/// `cancel` consumes the handle, so a second cancel does not compile.
/// Dropping the handle without cancelling also stops the task, but does not
/// wait for it.
#[derive(Debug)]
pub struct CancelHandle {
    name: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CancelHandle {
    pub(crate) fn new(name: String, shutdown: watch::Sender<bool>, task: JoinHandle<()>) -> Self {
        Self {
            name,
            shutdown,
            task,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The task has returned, either after a cancel or because its consumer
    /// went away.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the task and wait for it to close its stream.
    ///
    /// Fails with [`PsiError::ProtocolMisuse`] when the task had already
    /// terminated before the signal was sent.
    pub async fn cancel(self) -> Result<()> {
        let CancelHandle {
            name,
            shutdown,
            task,
        } = self;

        if task.is_finished() {
            if let Err(err) = task.await {
                debug!("[{name}] task ended abnormally before cancel: {err}");
            }
            return Err(PsiError::ProtocolMisuse(format!(
                "{name} cancelled after its task already terminated"
            )));
        }

        // The paired stream holds a receiver too, so this always lands.
        shutdown.send_replace(true);
        task.await?;
        debug!("[{name}] cancelled");
        Ok(())
    }
}

/// Resolves once a stop was requested or the handle was dropped.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Consumer side of a collector.
///
/// Ends as soon as the owning [`CancelHandle`] is cancelled, even if an item
/// is still sitting in the channel.
#[derive(Debug)]
pub struct CollectorStream<T> {
    inner: ReceiverStream<T>,
    shutdown: watch::Receiver<bool>,
}

impl<T> CollectorStream<T> {
    pub(crate) fn new(rx: mpsc::Receiver<T>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
            shutdown,
        }
    }

    fn cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }
}

// Fields are never pinned in place.
impl<T> Unpin for CollectorStream<T> {}

impl<T> Stream for CollectorStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        if this.cancelled() {
            this.inner.close();
            return Poll::Ready(None);
        }
        Pin::new(&mut this.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn buffered_item_dropped_after_cancel() {
        let (tx, rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut stream = CollectorStream::new(rx, shutdown_tx.subscribe());
        let task = tokio::spawn(async move {
            let mut shutdown = shutdown_rx;
            tx.send(7u32).await.unwrap();
            shutdown_requested(&mut shutdown).await;
        });
        tokio::task::yield_now().await;

        CancelHandle::new("test".to_string(), shutdown_tx, task)
            .cancel()
            .await
            .unwrap();
        assert_eq!(stream.next().await, None);
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn items_flow_until_cancel() {
        let (tx, rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut stream = CollectorStream::new(rx, shutdown_rx);
        tx.send(1u32).await.unwrap();
        assert_eq!(stream.next().await, Some(1));
        drop(tx);
        assert_eq!(stream.next().await, None);
    }
}
