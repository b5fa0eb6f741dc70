//! Execution engine: validation, chain fold, handler, timeout race, retries.
//!
//! [`Action::execute`] is the only place raw failures are observed. Every
//! outcome, including panics inside links, the handler or a lifecycle
//! callback, leaves as an [`ActionResult`].

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info_span, warn, Instrument};

use crate::action::{Action, ExecuteOptions, HandlerArgs};
use crate::error::{classify, classify_panic, ActionError, ActionResult};
use crate::lifecycle;
use crate::procedure::RequestMeta;
use crate::schema::Issue;

impl<I, O, C> Action<I, O, C>
where
    I: DeserializeOwned + Clone + Send + Sync + 'static,
    O: Serialize + Send + 'static,
    C: Send + 'static,
{
    /// Runs the action against `raw` with default options.
    pub async fn call(&self, raw: Value) -> ActionResult<O> {
        self.execute(raw, ExecuteOptions::default()).await
    }

    /// Runs the action.
    ///
    /// Input parse failures return immediately without invoking the chain or
    /// handler. Chain, handler, and timeout failures are retried according to
    /// the retry policy using the same validated input; output parse failures
    /// are never retried.
    pub async fn execute(&self, raw: Value, opts: ExecuteOptions) -> ActionResult<O> {
        let span = info_span!(
            "action",
            name = %self.inner.name,
            attempts = tracing::field::Empty,
        );
        self.execute_inner(raw, opts).instrument(span).await
    }

    async fn execute_inner(&self, raw: Value, opts: ExecuteOptions) -> ActionResult<O> {
        let raw = merge_input(raw, opts.input_override);
        let callbacks = &self.inner.callbacks;

        let (input_value, input) = match self.parse_input(raw.clone()).await {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!(code = %err.code, "input rejected");
                callbacks.failure(&raw, &err);
                return Err(err);
            }
        };

        let mut attempt: u32 = 1;
        loop {
            let meta = RequestMeta {
                attempt,
                request: opts.request.clone(),
            };

            let settled = match self.fire_start(&input_value) {
                Ok(()) => self.run_attempt(input_value.clone(), input.clone(), meta).await,
                Err(err) => Err(err),
            };

            match settled {
                Ok((data, data_value)) => {
                    tracing::Span::current().record("attempts", attempt);
                    if callbacks.wants_data() {
                        let data_value = match data_value {
                            Some(v) => v,
                            None => serde_json::to_value(&data).unwrap_or(Value::Null),
                        };
                        callbacks.success(&input_value, &data_value);
                    }
                    return Ok(data);
                }
                Err(err) => {
                    if let Some(delay) = self.retry_delay(attempt, &err) {
                        warn!(
                            attempt,
                            code = %err.code,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    tracing::Span::current().record("attempts", attempt);
                    debug!(attempt, code = %err.code, message = %err.message, "action failed");
                    callbacks.failure(&input_value, &err);
                    return Err(err);
                }
            }
        }
    }

    /// Chain start callbacks, then the action's own. A panic fails the attempt.
    fn fire_start(&self, input: &Value) -> ActionResult<()> {
        for cb in self.inner.chain.start_callbacks() {
            lifecycle::guard("chain on_start", || cb(input))?;
        }
        if let Some(cb) = &self.inner.callbacks.on_start {
            lifecycle::guard("on_start", || cb(input))?;
        }
        Ok(())
    }

    /// Wait before the next attempt, or `None` when the failure is terminal.
    fn retry_delay(&self, attempt: u32, err: &ActionError) -> Option<Duration> {
        let policy = self.inner.retry.as_ref()?;
        let next = attempt + 1;
        (err.is_retryable() && policy.allows(next)).then(|| policy.delay_for(next, err))
    }

    async fn parse_input(&self, raw: Value) -> ActionResult<(Value, I)> {
        let validated = match &self.inner.input {
            Some(schema) => schema
                .validate(raw)
                .await
                .map_err(|issues| ActionError::input_parse(&issues))?,
            None => raw,
        };
        let typed = serde_json::from_value::<I>(validated.clone())
            .map_err(|e| ActionError::input_parse(&[Issue::form(e.to_string())]))?;
        Ok((validated, typed))
    }

    /// One attempt: chain fold and handler raced against the timeout, then
    /// output validation. Returns the output's JSON form when it was needed.
    async fn run_attempt(
        &self,
        input_value: Value,
        input: I,
        meta: RequestMeta,
    ) -> ActionResult<(O, Option<Value>)> {
        let inner = &self.inner;
        let work = async move {
            let ctx = inner.chain.run(input_value, meta.clone()).await?;
            (inner.handler)(HandlerArgs { input, ctx, meta }).await
        };
        let guarded = AssertUnwindSafe(work).catch_unwind();

        let settled = match inner.timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(settled) => settled,
                Err(_elapsed) => {
                    let timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
                    warn!(timeout_ms, "attempt timed out");
                    return Err(ActionError::timeout(timeout_ms));
                }
            },
            None => guarded.await,
        };

        let data = match settled {
            Ok(Ok(data)) => data,
            Ok(Err(err)) => return Err(classify(err)),
            Err(panic) => return Err(classify_panic(panic.as_ref())),
        };

        let Some(schema) = &inner.output else {
            return Ok((data, None));
        };
        let data_value = serde_json::to_value(&data)
            .map_err(|e| ActionError::output_parse(&[Issue::form(e.to_string())]))?;
        schema
            .validate(data_value.clone())
            .await
            .map_err(|issues| ActionError::output_parse(&issues))?;
        Ok((data, Some(data_value)))
    }
}

/// Shallow-merges `overlay` over `raw`. A non-object on either side means the
/// overlay replaces the raw input.
fn merge_input(raw: Value, overlay: Option<Value>) -> Value {
    match (raw, overlay) {
        (raw, None) => raw,
        (Value::Object(mut base), Some(Value::Object(top))) => {
            base.extend(top);
            Value::Object(base)
        }
        (_, Some(top)) => top,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
