//! Executor-affine completions.
//!
//! Every store operation takes the caller's executor and returns a
//! [`Completion`]. The operation body and every continuation attached through
//! [`Completion::map`] or [`Completion::and_then`] run as tasks on that
//! executor, never on a thread owned by the backing store.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use meridian_core::{StoreError, StoreResult};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Pending result of an operation running on a caller-supplied executor.
///
/// Dropping a `Completion` detaches the task; it still runs to the end.
pub struct Completion<T> {
    inner: JoinHandle<StoreResult<T>>,
    executor: Handle,
}

/// Run `future` on `executor` and return its completion.
pub fn with_completion<F, T>(future: F, executor: &Handle) -> Completion<T>
where
    F: Future<Output = StoreResult<T>> + Send + 'static,
    T: Send + 'static,
{
    Completion {
        inner: executor.spawn(future),
        executor: executor.clone(),
    }
}

impl<T: Send + 'static> Completion<T> {
    /// The executor this completion and its continuations run on.
    pub fn executor(&self) -> &Handle {
        &self.executor
    }

    /// Transform the success value on the same executor.
    pub fn map<U, F>(self, f: F) -> Completion<U>
    where
        F: FnOnce(T) -> U + Send + 'static,
        U: Send + 'static,
    {
        let executor = self.executor.clone();
        with_completion(async move { self.await.map(f) }, &executor)
    }

    /// Chain a dependent operation on the same executor.
    pub fn and_then<U, F, Fut>(self, f: F) -> Completion<U>
    where
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = StoreResult<U>> + Send + 'static,
        U: Send + 'static,
    {
        let executor = self.executor.clone();
        with_completion(
            async move {
                let value = self.await?;
                f(value).await
            },
            &executor,
        )
    }

    /// Cancel the task. Awaiting afterwards yields
    /// [`StoreError::CompletionDropped`] unless it had already finished.
    pub fn abort(&self) {
        self.inner.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

impl<T> Future for Completion<T> {
    type Output = StoreResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.inner).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(join_error)) => {
                if join_error.is_panic() {
                    std::panic::resume_unwind(join_error.into_panic());
                }
                Poll::Ready(Err(StoreError::CompletionDropped))
            }
        }
    }
}
