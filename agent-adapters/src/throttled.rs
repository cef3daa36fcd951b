//! Rate-governed wrapper around a model adapter.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info};

use crate::throttle::{DEFAULT_MAX_RESPONSE_TOKENS, Throttle};
use crate::traits::{
    AdapterMetadata, AdapterResult, AdapterStream, BlockingModelAdapter, Completion,
    InferenceRequest, ModelAdapter, TokenUsage, collect_stream,
};

/// Admits every request through a shared [`Throttle`] before delegating to
/// the wrapped adapter.
///
/// Each request reserves its estimated prompt cost plus the full response
/// budget, and the response's reported usage is reconciled afterwards. The
/// wrapper implements whichever adapter traits the inner adapter implements,
/// so it can replace it transparently.
pub struct ThrottledInvoker<A> {
    inner: A,
    throttle: Arc<Throttle>,
    max_response_tokens: u64,
}

impl<A> fmt::Debug for ThrottledInvoker<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottledInvoker")
            .field("throttle", &self.throttle)
            .field("max_response_tokens", &self.max_response_tokens)
            .finish_non_exhaustive()
    }
}

impl<A> ThrottledInvoker<A> {
    /// Wraps `inner`, reserving the default response budget per request.
    #[must_use]
    pub fn new(inner: A, throttle: Arc<Throttle>) -> Self {
        Self {
            inner,
            throttle,
            max_response_tokens: DEFAULT_MAX_RESPONSE_TOKENS,
        }
    }

    /// Sets the response budget reserved for each request.
    #[must_use]
    pub fn with_max_response_tokens(mut self, tokens: u64) -> Self {
        self.max_response_tokens = tokens;
        self
    }

    /// Returns the shared throttle.
    #[must_use]
    pub fn throttle(&self) -> &Arc<Throttle> {
        &self.throttle
    }

    /// Returns the wrapped adapter.
    #[must_use]
    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Returns the response budget reserved per request.
    #[must_use]
    pub const fn max_response_tokens(&self) -> u64 {
        self.max_response_tokens
    }

    /// Prices the request and caps its output at the reserved budget.
    fn price(&self, request: InferenceRequest) -> AdapterResult<(InferenceRequest, u64)> {
        let cost = self.throttle.estimate_cost(&request.prompt_text())?;
        let reserved = cost + self.max_response_tokens;
        let max_output = u32::try_from(self.max_response_tokens).unwrap_or(u32::MAX);
        Ok((request.with_max_output_tokens(max_output), reserved))
    }

    fn settle(&self, reserved: u64, usage: Option<TokenUsage>) {
        match usage {
            Some(usage) => self.throttle.reconcile(reserved, usage.total_tokens),
            None => debug!(reserved, "provider reported no usage, keeping reservation"),
        }
    }
}

impl<A: ModelAdapter> ThrottledInvoker<A> {
    /// Executes the request and collects the whole response.
    ///
    /// # Errors
    ///
    /// Returns [`crate::traits::AdapterError::Throttle`] if the prompt alone
    /// exceeds the budget, or any error raised by the wrapped adapter.
    pub async fn complete(&self, request: InferenceRequest) -> AdapterResult<Completion> {
        let (request, reserved) = self.price(request)?;
        log_wait(self.throttle.wait_async(reserved).await, reserved);

        let completion = collect_stream(self.inner.infer(request).await?).await?;
        self.settle(reserved, completion.usage);
        Ok(completion)
    }
}

#[async_trait]
impl<A: ModelAdapter> ModelAdapter for ThrottledInvoker<A> {
    fn metadata(&self) -> &AdapterMetadata {
        self.inner.metadata()
    }

    async fn infer(&self, request: InferenceRequest) -> AdapterResult<AdapterStream> {
        let (request, reserved) = self.price(request)?;
        log_wait(self.throttle.wait_async(reserved).await, reserved);

        let stream = self.inner.infer(request).await?;
        let throttle = Arc::clone(&self.throttle);
        let mut latest: Option<TokenUsage> = None;
        let mut settled = false;
        // Usage may repeat across chunks; the reservation is settled once, on the final chunk.
        let stream = stream.inspect(move |chunk| {
            let Ok(chunk) = chunk else {
                return;
            };
            if chunk.usage.is_some() {
                latest = chunk.usage;
            }
            if chunk.done && !settled {
                settled = true;
                match latest {
                    Some(usage) => throttle.reconcile(reserved, usage.total_tokens),
                    None => debug!(reserved, "provider reported no usage, keeping reservation"),
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

impl<A: BlockingModelAdapter> BlockingModelAdapter for ThrottledInvoker<A> {
    fn metadata(&self) -> &AdapterMetadata {
        self.inner.metadata()
    }

    fn complete_blocking(&self, request: InferenceRequest) -> AdapterResult<Completion> {
        let (request, reserved) = self.price(request)?;
        log_wait(self.throttle.wait(reserved), reserved);

        let completion = self.inner.complete_blocking(request)?;
        self.settle(reserved, completion.usage);
        Ok(completion)
    }
}

fn log_wait(slept: std::time::Duration, reserved: u64) {
    if !slept.is_zero() {
        info!(reserved, slept_ms = slept.as_millis(), "request throttled");
    }
}
