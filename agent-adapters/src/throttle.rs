//! Token-bucket rate governor shared by every call to a provider.
//!
//! The bucket holds at most `rate_limit` tokens and refills at
//! `rate_limit / 60` tokens per whole elapsed second. Callers price a request
//! with [`Throttle::estimate_cost`], reserve it with [`Throttle::wait`] or
//! [`Throttle::wait_async`], and hand back the unused part of the reservation
//! with [`Throttle::reconcile`] once the provider reports actual usage.
//!
//! The bucket state sits behind a single mutex that is never held while the
//! caller sleeps, so blocking threads and async tasks can share one throttle.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tiktoken_rs::CoreBPE;
use tokio::time::Instant;
use tracing::debug;

/// Tokens reserved for each response when no other budget is configured.
pub const DEFAULT_MAX_RESPONSE_TOKENS: u64 = 1000;

/// Model whose encoding prices requests when no other model is configured.
pub const DEFAULT_TOKENIZER_MODEL: &str = "gpt-4";

/// Tokens-per-minute budget applied to models missing from the table.
pub const FALLBACK_RATE_LIMIT: u64 = 5000;

/// Returns the published tokens-per-minute budget for a hosted model.
#[must_use]
pub fn default_rate_limit(model: &str) -> u64 {
    match model {
        "llama2-70b-4096" | "gemma-7b-it" => 15_000,
        "mixtral-8x7b-32768" => 9_000,
        "llama3-70b-8192" => 5_000,
        "llama3-8b-8192" => 12_000,
        _ => FALLBACK_RATE_LIMIT,
    }
}

/// Result alias for throttle operations.
pub type ThrottleResult<T> = Result<T, ThrottleError>;

/// Errors raised by the rate governor.
#[derive(Debug, Error)]
pub enum ThrottleError {
    /// A single request costs more than the whole per-minute budget.
    #[error(
        "estimated cost of {cost} tokens exceeds the rate limit of {budget} tokens per minute; \
         reduce the prompt or raise the rate limit"
    )]
    CostExceedsBudget {
        /// Estimated request cost in tokens.
        cost: u64,
        /// Configured tokens-per-minute budget.
        budget: u64,
    },

    /// No encoding could be loaded for the tokenizer model.
    #[error("tokenizer unavailable: {reason}")]
    Tokenizer {
        /// Additional context for the failure.
        reason: String,
    },

    /// The configured budget cannot refill.
    #[error("invalid rate limit: {reason}")]
    InvalidRateLimit {
        /// Additional context for the failure.
        reason: String,
    },
}

/// Settings used to build a [`Throttle`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThrottleConfig {
    rate_limit: Option<u64>,
    tokenizer_model: String,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            rate_limit: None,
            tokenizer_model: DEFAULT_TOKENIZER_MODEL.to_owned(),
        }
    }
}

impl ThrottleConfig {
    /// Creates an unbounded configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the tokens-per-minute budget; `None` disables throttling.
    #[must_use]
    pub fn with_rate_limit(mut self, rate_limit: impl Into<Option<u64>>) -> Self {
        self.rate_limit = rate_limit.into();
        self
    }

    /// Sets the model whose encoding prices requests.
    #[must_use]
    pub fn with_tokenizer_model(mut self, model: impl Into<String>) -> Self {
        self.tokenizer_model = model.into();
        self
    }

    /// Returns the configured budget.
    #[must_use]
    pub const fn rate_limit(&self) -> Option<u64> {
        self.rate_limit
    }
}

#[derive(Debug)]
struct BucketState {
    remaining_tokens: f64,
    last_refill: Instant,
}

struct Bucket {
    rate_limit: u64,
    encoder: CoreBPE,
    state: Mutex<BucketState>,
}

impl Bucket {
    #[allow(clippy::cast_precision_loss)]
    fn capacity(&self) -> f64 {
        self.rate_limit as f64
    }

    fn per_second(&self) -> f64 {
        self.capacity() / 60.0
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[allow(clippy::cast_precision_loss)]
    fn refill(&self, state: &mut BucketState) {
        let elapsed = Instant::now()
            .saturating_duration_since(state.last_refill)
            .as_secs();
        if elapsed > 0 {
            // Accrual stops at capacity; credits returned by `reconcile` may exceed it.
            let ceiling = self.capacity().max(state.remaining_tokens);
            state.remaining_tokens =
                (state.remaining_tokens + elapsed as f64 * self.per_second()).min(ceiling);
            state.last_refill += Duration::from_secs(elapsed);
        }
        debug!(
            elapsed_secs = elapsed,
            remaining = state.remaining_tokens,
            "refilled token bucket"
        );
    }

    /// Debits immediately when the bucket covers `tokens`, otherwise returns
    /// how long to sleep before settling.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn try_debit(&self, tokens: u64) -> Option<Duration> {
        let mut state = self.lock();
        self.refill(&mut state);
        let needed = tokens as f64;
        if state.remaining_tokens >= needed {
            state.remaining_tokens -= needed;
            debug!(tokens, remaining = state.remaining_tokens, "admitted without waiting");
            return None;
        }

        let deficit = needed - state.remaining_tokens;
        let secs = (deficit / self.per_second()).floor().max(0.0) as u64;
        debug!(tokens, deficit, sleep_secs = secs, "throttling request");
        Some(Duration::from_secs(secs))
    }

    #[allow(clippy::cast_precision_loss)]
    fn settle(&self, tokens: u64) {
        let mut state = self.lock();
        self.refill(&mut state);
        state.remaining_tokens -= tokens as f64;
        debug!(tokens, remaining = state.remaining_tokens, "admitted after waiting");
    }
}

/// Shared token-bucket rate governor.
pub struct Throttle {
    bucket: Option<Bucket>,
}

impl fmt::Debug for Throttle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Throttle");
        match &self.bucket {
            Some(bucket) => debug
                .field("rate_limit", &bucket.rate_limit)
                .field("state", &*bucket.lock()),
            None => debug.field("rate_limit", &"unbounded"),
        };
        debug.finish_non_exhaustive()
    }
}

impl Throttle {
    /// Creates a pass-through throttle that never sleeps.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self { bucket: None }
    }

    /// Creates a throttle from its configuration.
    ///
    /// A bounded throttle starts with a full bucket.
    ///
    /// # Errors
    ///
    /// Returns [`ThrottleError::InvalidRateLimit`] for a zero budget and
    /// [`ThrottleError::Tokenizer`] if no encoding can be loaded.
    pub fn new(config: ThrottleConfig) -> ThrottleResult<Self> {
        let Some(rate_limit) = config.rate_limit else {
            debug!("rate limit not set, throttling disabled");
            return Ok(Self::unbounded());
        };
        if rate_limit == 0 {
            return Err(ThrottleError::InvalidRateLimit {
                reason: "rate limit must be at least one token per minute".into(),
            });
        }

        let encoder = load_encoder(&config.tokenizer_model)?;
        debug!(rate_limit, tokenizer = %config.tokenizer_model, "throttling enabled");

        #[allow(clippy::cast_precision_loss)]
        let remaining_tokens = rate_limit as f64;
        Ok(Self {
            bucket: Some(Bucket {
                rate_limit,
                encoder,
                state: Mutex::new(BucketState {
                    remaining_tokens,
                    last_refill: Instant::now(),
                }),
            }),
        })
    }

    /// Creates a bounded throttle priced with the default tokenizer.
    ///
    /// # Errors
    ///
    /// See [`Throttle::new`].
    pub fn with_rate_limit(rate_limit: u64) -> ThrottleResult<Self> {
        Self::new(ThrottleConfig::new().with_rate_limit(rate_limit))
    }

    /// Returns the tokens-per-minute budget, or `None` when unbounded.
    #[must_use]
    pub fn rate_limit(&self) -> Option<u64> {
        self.bucket.as_ref().map(|bucket| bucket.rate_limit)
    }

    /// Returns the tokens currently available, or `None` when unbounded.
    #[must_use]
    pub fn remaining_tokens(&self) -> Option<f64> {
        self.bucket
            .as_ref()
            .map(|bucket| bucket.lock().remaining_tokens)
    }

    /// Prices `text` as `ceil(tokens * 1.1)`.
    ///
    /// Unbounded throttles report zero.
    ///
    /// # Errors
    ///
    /// Returns [`ThrottleError::CostExceedsBudget`] when the estimate alone is
    /// larger than the per-minute budget; such a request can never be admitted.
    pub fn estimate_cost(&self, text: &str) -> ThrottleResult<u64> {
        let Some(bucket) = &self.bucket else {
            return Ok(0);
        };

        let count = bucket.encoder.encode_with_special_tokens(text).len() as u64;
        let cost = (count * 11).div_ceil(10);
        debug!(tokens = count, cost, "estimated request cost");
        if cost > bucket.rate_limit {
            return Err(ThrottleError::CostExceedsBudget {
                cost,
                budget: bucket.rate_limit,
            });
        }
        Ok(cost)
    }

    /// Credits tokens accrued since the last refill.
    pub fn refill(&self) {
        if let Some(bucket) = &self.bucket {
            bucket.refill(&mut bucket.lock());
        }
    }

    /// Reserves `tokens`, blocking the current thread until they are available.
    ///
    /// Returns how long the thread slept.
    pub fn wait(&self, tokens: u64) -> Duration {
        let Some(bucket) = &self.bucket else {
            return Duration::ZERO;
        };
        let Some(sleep) = bucket.try_debit(tokens) else {
            return Duration::ZERO;
        };
        std::thread::sleep(sleep);
        bucket.settle(tokens);
        sleep
    }

    /// Reserves `tokens`, suspending the current task until they are available.
    ///
    /// Returns how long the task slept.
    pub async fn wait_async(&self, tokens: u64) -> Duration {
        let Some(bucket) = &self.bucket else {
            return Duration::ZERO;
        };
        let Some(sleep) = bucket.try_debit(tokens) else {
            return Duration::ZERO;
        };
        tokio::time::sleep(sleep).await;
        bucket.settle(tokens);
        sleep
    }

    /// Returns `reserved - used` tokens to the bucket, then refills.
    ///
    /// Usage above the reservation is debited.
    #[allow(clippy::cast_precision_loss)]
    pub fn reconcile(&self, reserved: u64, used: u64) {
        let Some(bucket) = &self.bucket else {
            return;
        };
        let mut state = bucket.lock();
        state.remaining_tokens += reserved as f64 - used as f64;
        debug!(reserved, used, remaining = state.remaining_tokens, "reconciled usage");
        bucket.refill(&mut state);
    }
}

fn load_encoder(model: &str) -> ThrottleResult<CoreBPE> {
    tiktoken_rs::get_bpe_from_model(model)
        .or_else(|err| {
            debug!(model, error = %err, "no encoding registered for model, using cl100k_base");
            tiktoken_rs::cl100k_base()
        })
        .map_err(|err| ThrottleError::Tokenizer {
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn rate_limit_table() {
        assert_eq!(default_rate_limit("mixtral-8x7b-32768"), 9_000);
        assert_eq!(default_rate_limit("llama3-8b-8192"), 12_000);
        assert_eq!(default_rate_limit("unknown"), FALLBACK_RATE_LIMIT);
    }

    #[test]
    fn unbounded_never_sleeps() {
        let throttle = Throttle::new(ThrottleConfig::new()).unwrap();
        assert_eq!(throttle.rate_limit(), None);
        assert_eq!(throttle.estimate_cost("anything at all").unwrap(), 0);
        assert_eq!(throttle.wait(u64::MAX), Duration::ZERO);
        assert_eq!(throttle.remaining_tokens(), None);
        throttle.reconcile(10, 1);
    }

    #[test]
    fn zero_rate_limit_is_rejected() {
        let err = Throttle::with_rate_limit(0).expect_err("zero budget");
        assert!(matches!(err, ThrottleError::InvalidRateLimit { .. }));
    }

    #[test]
    fn cost_adds_ten_percent_margin() {
        let throttle = Throttle::with_rate_limit(1000).unwrap();
        // "hello world" is two tokens in cl100k_base.
        assert_eq!(throttle.estimate_cost("hello world").unwrap(), 3);
        assert_eq!(throttle.estimate_cost("").unwrap(), 0);
    }

    #[test]
    fn oversized_prompt_fails_fast() {
        let throttle = Throttle::with_rate_limit(10).unwrap();
        let err = throttle
            .estimate_cost(&"lorem ipsum dolor ".repeat(20))
            .expect_err("prompt exceeds budget");
        assert!(matches!(err, ThrottleError::CostExceedsBudget { budget: 10, .. }));
    }

    #[test]
    fn unknown_tokenizer_model_falls_back() {
        let throttle = Throttle::new(
            ThrottleConfig::new()
                .with_rate_limit(1000)
                .with_tokenizer_model("llama3-8b-8192"),
        )
        .unwrap();
        assert!(throttle.estimate_cost("hello world").unwrap() > 0);
    }

    #[test]
    fn short_deficit_debits_without_sleeping() {
        // 100 tokens per second: a 50 token deficit rounds down to no sleep.
        let throttle = Throttle::with_rate_limit(6000).unwrap();
        assert_eq!(throttle.wait(6000), Duration::ZERO);
        assert_eq!(throttle.wait(50), Duration::ZERO);
        assert!(throttle.remaining_tokens().unwrap() < 0.0);
    }

    #[test]
    fn blocking_wait_sleeps_then_settles() {
        // 2 tokens per second: a 2 token deficit sleeps for one second.
        let throttle = Throttle::with_rate_limit(120).unwrap();
        assert_eq!(throttle.wait(120), Duration::ZERO);

        let started = std::time::Instant::now();
        let slept = throttle.wait(2);
        assert_eq!(slept, Duration::from_secs(1));
        assert!(started.elapsed() >= Duration::from_secs(1));

        let remaining = throttle.remaining_tokens().unwrap();
        assert!((0.0..2.0).contains(&remaining), "{remaining}");
    }

    #[test]
    fn threads_share_one_budget() {
        let throttle = Throttle::with_rate_limit(6000).unwrap();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| assert_eq!(throttle.wait(1000), Duration::ZERO));
            }
        });
        let remaining = throttle.remaining_tokens().unwrap();
        assert!((2000.0..2100.0).contains(&remaining), "{remaining}");
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_bucket_admits_up_to_the_limit() {
        let throttle = Throttle::with_rate_limit(600).unwrap();
        assert_eq!(throttle.wait_async(600).await, Duration::ZERO);
        assert_eq!(throttle.remaining_tokens(), Some(0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn second_request_waits_for_refill() {
        // 10 tokens per second.
        let throttle = Throttle::with_rate_limit(600).unwrap();
        assert_eq!(throttle.wait_async(400).await, Duration::ZERO);

        let slept = throttle.wait_async(400).await;
        assert_eq!(slept, Duration::from_secs(20));
        assert_eq!(throttle.remaining_tokens(), Some(0.0));

        tokio::time::advance(Duration::from_secs(30)).await;
        throttle.refill();
        assert_eq!(throttle.remaining_tokens(), Some(300.0));
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_the_limit() {
        let throttle = Throttle::with_rate_limit(600).unwrap();
        throttle.wait_async(600).await;
        tokio::time::advance(Duration::from_secs(600)).await;
        throttle.refill();
        assert_eq!(throttle.remaining_tokens(), Some(600.0));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_seconds_carry_over() {
        let throttle = Throttle::with_rate_limit(600).unwrap();
        throttle.wait_async(600).await;

        tokio::time::advance(Duration::from_millis(1500)).await;
        throttle.refill();
        assert_eq!(throttle.remaining_tokens(), Some(10.0));

        tokio::time::advance(Duration::from_millis(500)).await;
        throttle.refill();
        assert_eq!(throttle.remaining_tokens(), Some(20.0));
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_returns_unused_tokens() {
        let throttle = Throttle::with_rate_limit(1000).unwrap();
        throttle.wait_async(800).await;
        assert_eq!(throttle.remaining_tokens(), Some(200.0));

        throttle.reconcile(800, 300);
        assert_eq!(throttle.remaining_tokens(), Some(700.0));

        throttle.reconcile(100, 250);
        assert_eq!(throttle.remaining_tokens(), Some(550.0));
    }

    #[tokio::test(start_paused = true)]
    async fn reconcile_credit_survives_a_full_bucket() {
        let throttle = Throttle::with_rate_limit(600).unwrap();
        throttle.wait_async(400).await;

        tokio::time::advance(Duration::from_secs(60)).await;
        throttle.refill();
        assert_eq!(throttle.remaining_tokens(), Some(600.0));

        throttle.reconcile(400, 100);
        assert_eq!(throttle.remaining_tokens(), Some(900.0));

        // Time-based accrual never lowers a balance that is already over capacity.
        tokio::time::advance(Duration::from_secs(5)).await;
        throttle.refill();
        assert_eq!(throttle.remaining_tokens(), Some(900.0));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_tasks_observe_one_budget() {
        let throttle = Arc::new(Throttle::with_rate_limit(600).unwrap());
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let throttle = Arc::clone(&throttle);
                tokio::spawn(async move { throttle.wait_async(300).await })
            })
            .collect();

        let mut total = Duration::ZERO;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, Duration::from_secs(30));
        assert!(throttle.remaining_tokens().unwrap() >= 0.0);
    }
}
