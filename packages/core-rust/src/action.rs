//! Action definitions.
//!
//! An [`Action`] is an immutable descriptor: procedure chain, input and
//! output schemas, handler, retry policy, timeout, and lifecycle callbacks.
//! It is built once with an [`ActionBuilder`] and shared by reference
//! afterwards (cloning an `Action` clones an `Arc`).

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ActionError, ActionResult};
use crate::lifecycle::{Lifecycle, Outcome};
use crate::procedure::{ProcedureChain, RequestMeta};
use crate::retry::RetryPolicy;
use crate::schema::Schema;

/// Arguments handed to an action handler.
#[derive(Debug, Clone)]
pub struct HandlerArgs<I, C> {
    pub input: I,
    pub ctx: C,
    pub meta: RequestMeta,
}

pub(crate) type Handler<I, C, O> =
    Arc<dyn Fn(HandlerArgs<I, C>) -> BoxFuture<'static, anyhow::Result<O>> + Send + Sync>;

/// Per-call options for [`Action::execute`].
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Shallow-merged over the raw input before validation; its keys win.
    pub input_override: Option<Value>,
    /// Transport request the call arrived on, if any.
    pub request: Option<Arc<http::request::Parts>>,
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

pub(crate) struct ActionInner<I, O, C> {
    pub(crate) name: String,
    pub(crate) chain: ProcedureChain<C>,
    pub(crate) input: Option<Arc<dyn Schema>>,
    pub(crate) output: Option<Arc<dyn Schema>>,
    pub(crate) handler: Handler<I, C, O>,
    pub(crate) retry: Option<RetryPolicy>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) callbacks: Lifecycle,
}

/// A fully built action. `I` is the handler input, `O` its output, and `C`
/// the context produced by the procedure chain.
pub struct Action<I, O, C = ()> {
    pub(crate) inner: Arc<ActionInner<I, O, C>>,
}

impl<I, O, C> Clone for Action<I, O, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I, O, C> fmt::Debug for Action<I, O, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.inner.name)
            .field("chain_len", &self.inner.chain.len())
            .field("has_input_schema", &self.inner.input.is_some())
            .field("has_output_schema", &self.inner.output.is_some())
            .field("retry", &self.inner.retry)
            .field("timeout", &self.inner.timeout)
            .finish_non_exhaustive()
    }
}

impl<I, O, C> Action<I, O, C> {
    /// Name used in logs and spans.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Retry policy, if one was configured.
    #[must_use]
    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.inner.retry.as_ref()
    }

    /// Per-attempt timeout, if one was configured.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.inner.timeout
    }

    /// Whether raw input is validated before deserialization.
    #[must_use]
    pub fn has_input_schema(&self) -> bool {
        self.inner.input.is_some()
    }
}

// ---------------------------------------------------------------------------
// ActionBuilder
// ---------------------------------------------------------------------------

/// Builder for [`Action`]. The input type changes when an input schema is
/// declared and the context type changes when a chain is attached.
pub struct ActionBuilder<I, C> {
    name: String,
    chain: ProcedureChain<C>,
    input: Option<Arc<dyn Schema>>,
    output: Option<Arc<dyn Schema>>,
    retry: Option<RetryPolicy>,
    timeout: Option<Duration>,
    callbacks: Lifecycle,
    _input: PhantomData<fn() -> I>,
}

impl ActionBuilder<Value, ()> {
    /// A builder with no chain and no input schema. The handler receives the
    /// raw input as a `serde_json::Value`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chain: ProcedureChain::new(),
            input: None,
            output: None,
            retry: None,
            timeout: None,
            callbacks: Lifecycle::default(),
            _input: PhantomData,
        }
    }
}

impl<I, C> ActionBuilder<I, C> {
    /// Runs the given procedure chain before the handler.
    #[must_use]
    pub fn chain<C2>(self, chain: ProcedureChain<C2>) -> ActionBuilder<I, C2> {
        ActionBuilder {
            name: self.name,
            chain,
            input: self.input,
            output: self.output,
            retry: self.retry,
            timeout: self.timeout,
            callbacks: self.callbacks,
            _input: PhantomData,
        }
    }

    /// Declares the input schema. The validated value is deserialized into `T`.
    #[must_use]
    pub fn input<T>(self, schema: impl Schema + 'static) -> ActionBuilder<T, C> {
        ActionBuilder {
            name: self.name,
            chain: self.chain,
            input: Some(Arc::new(schema)),
            output: self.output,
            retry: self.retry,
            timeout: self.timeout,
            callbacks: self.callbacks,
            _input: PhantomData,
        }
    }

    /// Declares the output schema the handler's result is checked against.
    #[must_use]
    pub fn output(mut self, schema: impl Schema + 'static) -> Self {
        self.output = Some(Arc::new(schema));
        self
    }

    /// Retries failed attempts according to `policy`.
    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Limits each attempt (chain plus handler) to `timeout`.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Called with the validated input before every attempt.
    #[must_use]
    pub fn on_start(mut self, f: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.callbacks.on_start = Some(Arc::new(f));
        self
    }

    /// Called once with the input and output of a successful run.
    #[must_use]
    pub fn on_success(mut self, f: impl Fn(&Value, &Value) + Send + Sync + 'static) -> Self {
        self.callbacks.on_success = Some(Arc::new(f));
        self
    }

    /// Called once with the terminal error, after retries are exhausted.
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&Value, &ActionError) + Send + Sync + 'static) -> Self {
        self.callbacks.on_error = Some(Arc::new(f));
        self
    }

    /// Called last on every terminal outcome.
    #[must_use]
    pub fn on_complete(
        mut self,
        f: impl Fn(&Value, Outcome<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_complete = Some(Arc::new(f));
        self
    }

    /// Finishes the definition with the handler.
    #[must_use]
    pub fn handler<O, F, Fut>(self, handler: F) -> Action<I, O, C>
    where
        I: 'static,
        C: 'static,
        O: 'static,
        F: Fn(HandlerArgs<I, C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        let handler: Handler<I, C, O> = Arc::new(
            move |args: HandlerArgs<I, C>| -> BoxFuture<'static, anyhow::Result<O>> {
                Box::pin(handler(args))
            },
        );

        Action {
            inner: Arc::new(ActionInner {
                name: self.name,
                chain: self.chain,
                input: self.input,
                output: self.output,
                handler,
                retry: self.retry,
                timeout: self.timeout,
                callbacks: self.callbacks,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// DynAction (type-erased adapter)
// ---------------------------------------------------------------------------

/// Object-safe view of an action over JSON values. Route registries and other
/// heterogeneous collections hold actions through this trait.
pub trait DynAction: Send + Sync {
    fn name(&self) -> &str;

    /// Executes the action and serializes its output.
    fn call_json(&self, input: Value, opts: ExecuteOptions) -> BoxFuture<'_, ActionResult<Value>>;
}

/// Shared, type-erased action.
pub type SharedAction = Arc<dyn DynAction>;

impl<I, O, C> DynAction for Action<I, O, C>
where
    I: DeserializeOwned + Clone + Send + Sync + 'static,
    O: Serialize + Send + 'static,
    C: Send + 'static,
{
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn call_json(&self, input: Value, opts: ExecuteOptions) -> BoxFuture<'_, ActionResult<Value>> {
        Box::pin(async move {
            let data = self.execute(input, opts).await?;
            serde_json::to_value(data).map_err(|e| {
                ActionError::new(crate::error::ErrorCode::OutputParseError, e.to_string())
            })
        })
    }
}

impl<I, O, C> Action<I, O, C>
where
    I: DeserializeOwned + Clone + Send + Sync + 'static,
    O: Serialize + Send + 'static,
    C: Send + 'static,
{
    /// Erases the input/output/context types for storage in registries.
    #[must_use]
    pub fn shared(&self) -> SharedAction {
        Arc::new(self.clone())
    }
}
