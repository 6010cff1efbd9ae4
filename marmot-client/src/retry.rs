//! Retry decorator for providers.
//!
//! Wraps any `Provider` with exponential backoff on retryable errors,
//! across all three methods. For streams, only failures that occur before
//! any output was yielded are retried — once tokens have been delivered the
//! call is no longer safely repeatable. Each retry surfaces as an inline
//! `Retrying` event so the loop can forward it to the caller.

use async_trait::async_trait;
use futures::StreamExt;
use marmot_core::error::ProviderError;
use marmot_core::provider::{
    Provider, ProviderEvent, ProviderRequest, ProviderStream, StreamFinal,
};
use marmot_core::retry::RetryPolicy;

/// A provider wrapped with retry-with-backoff.
pub struct RetryingProvider<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: Provider> RetryingProvider<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn into_inner(self) -> P {
        self.inner
    }

    async fn retry_call<T, F, Fut>(&self, mut call: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T, ProviderError>> + Send,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && self.policy.should_retry(attempt) => {
                    let delay = err
                        .retry_after()
                        .unwrap_or_else(|| self.policy.delay_for_attempt(attempt));
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.policy.max_retries,
                        error = %err,
                        "provider call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl<P: Provider> Provider for RetryingProvider<P> {
    fn stream<'a>(&'a self, request: &'a ProviderRequest) -> ProviderStream<'a> {
        Box::pin(async_stream::stream! {
            let mut attempt = 0u32;
            'calls: loop {
                let mut inner = self.inner.stream(request);
                let mut yielded_output = false;

                while let Some(item) = inner.next().await {
                    match item {
                        Ok(event) => {
                            let is_final = matches!(event, ProviderEvent::Final(_));
                            if !matches!(event, ProviderEvent::Retrying { .. }) {
                                yielded_output = true;
                            }
                            yield Ok(event);
                            if is_final {
                                return;
                            }
                        }
                        Err(err)
                            if !yielded_output
                                && err.is_retryable()
                                && self.policy.should_retry(attempt) =>
                        {
                            let delay = err
                                .retry_after()
                                .unwrap_or_else(|| self.policy.delay_for_attempt(attempt));
                            yield Ok(ProviderEvent::Retrying {
                                attempt: attempt + 1,
                                max_retries: self.policy.max_retries,
                                error_kind: err.kind(),
                            });
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                            continue 'calls;
                        }
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    }
                }

                yield Err(ProviderError::Connection {
                    message: "stream ended before completion".to_string(),
                });
                return;
            }
        })
    }

    async fn create(&self, request: &ProviderRequest) -> Result<StreamFinal, ProviderError> {
        self.retry_call(|| self.inner.create(request)).await
    }

    async fn count_tokens(&self, request: &ProviderRequest) -> Result<u64, ProviderError> {
        self.retry_call(|| self.inner.count_tokens(request)).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
