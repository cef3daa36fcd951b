//! Bridge from async adapters to plain worker threads.

use std::fmt;

use tokio::runtime::{Builder, Runtime};

use crate::traits::{
    AdapterError, AdapterMetadata, AdapterResult, BlockingModelAdapter, Completion,
    InferenceRequest, ModelAdapter, collect_stream,
};

/// Runs an async [`ModelAdapter`] on a dedicated runtime so synchronous
/// callers can use it through [`BlockingModelAdapter`].
///
/// Any number of threads may call [`BlockingModelAdapter::complete_blocking`]
/// concurrently. Calling it from inside an async context panics, as with
/// [`Runtime::block_on`].
pub struct BlockingAdapter<A> {
    inner: A,
    runtime: Runtime,
}

impl<A> fmt::Debug for BlockingAdapter<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingAdapter").finish_non_exhaustive()
    }
}

impl<A: ModelAdapter> BlockingAdapter<A> {
    /// Wraps `inner` with its own single-worker runtime.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] if the runtime cannot start.
    pub fn new(inner: A) -> AdapterResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("crew-blocking-adapter")
            .enable_all()
            .build()
            .map_err(|err| {
                AdapterError::configuration(format!("failed to start adapter runtime: {err}"))
            })?;
        Ok(Self { inner, runtime })
    }

    /// Returns the wrapped adapter.
    #[must_use]
    pub fn inner(&self) -> &A {
        &self.inner
    }
}

impl<A: ModelAdapter> BlockingModelAdapter for BlockingAdapter<A> {
    fn metadata(&self) -> &AdapterMetadata {
        self.inner.metadata()
    }

    fn complete_blocking(&self, request: InferenceRequest) -> AdapterResult<Completion> {
        self.runtime
            .block_on(async { collect_stream(self.inner.infer(request).await?).await })
    }
}
