//! Model adapters and the rate-governed invocation layer.
//!
//! [`throttle::Throttle`] keeps a per-minute token budget shared by every
//! caller. [`throttled::ThrottledInvoker`] wraps any adapter so each request
//! is priced, admitted and reconciled against that budget. [`openai`] talks
//! to `OpenAI`-compatible endpoints (including Groq), and [`blocking`] lets
//! synchronous worker threads drive an async adapter.

#![warn(missing_docs, clippy::pedantic)]

pub mod blocking;
pub mod openai;
pub mod throttle;
pub mod throttled;
pub mod traits;

mod http_client;

pub use blocking::BlockingAdapter;
pub use throttle::{Throttle, ThrottleConfig, ThrottleError, ThrottleResult};
pub use throttled::ThrottledInvoker;
pub use traits::{
    AdapterError, AdapterResult, BlockingModelAdapter, Completion, InferenceRequest,
    ModelAdapter, TokenUsage,
};
