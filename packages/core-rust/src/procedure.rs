//! Procedure chains: ordered, append-only context accumulation.
//!
//! A `ProcedureChain<C>` runs its links left to right and yields the final
//! context `C`. Extending a chain with [`ProcedureChain::then`] returns a new
//! chain and leaves the parent untouched, so one parent can back many actions.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::action::ActionBuilder;
use crate::lifecycle::StartCallback;

/// Per-attempt metadata handed to every link and to the handler.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    /// 1 for the first attempt, 2 for the first retry, and so on.
    pub attempt: u32,
    /// The transport request, when the call arrived over HTTP.
    pub request: Option<Arc<http::request::Parts>>,
}

type Runner<C> =
    Arc<dyn Fn(Value, RequestMeta) -> BoxFuture<'static, anyhow::Result<C>> + Send + Sync>;

/// An immutable chain of context-producing links.
pub struct ProcedureChain<C> {
    run: Runner<C>,
    len: usize,
    on_start: Vec<StartCallback>,
}

impl<C> Clone for ProcedureChain<C> {
    fn clone(&self) -> Self {
        Self {
            run: Arc::clone(&self.run),
            len: self.len,
            on_start: self.on_start.clone(),
        }
    }
}

impl ProcedureChain<()> {
    /// The empty chain. Its context is `()`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run: Arc::new(empty_context),
            len: 0,
            on_start: Vec::new(),
        }
    }
}

fn empty_context(_input: Value, _meta: RequestMeta) -> BoxFuture<'static, anyhow::Result<()>> {
    Box::pin(async { Ok(()) })
}

impl Default for ProcedureChain<()> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Send + 'static> ProcedureChain<C> {
    /// Appends a link that sees the validated input, the context so far, and
    /// the request metadata. Its output becomes the next context.
    #[must_use]
    pub fn then<N, F, Fut>(&self, link: F) -> ProcedureChain<N>
    where
        N: Send + 'static,
        F: Fn(Value, C, RequestMeta) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<N>> + Send + 'static,
    {
        let parent = Arc::clone(&self.run);
        let link = Arc::new(link);
        let run: Runner<N> = Arc::new(
            move |input: Value, meta: RequestMeta| -> BoxFuture<'static, anyhow::Result<N>> {
                let parent = Arc::clone(&parent);
                let link = Arc::clone(&link);
                Box::pin(async move {
                    let ctx = parent(input.clone(), meta.clone()).await?;
                    link(input, ctx, meta).await
                })
            },
        );

        ProcedureChain {
            run,
            len: self.len + 1,
            on_start: self.on_start.clone(),
        }
    }

    /// Appends a link that does not need the input.
    #[must_use]
    pub fn then_ctx<N, F, Fut>(&self, link: F) -> ProcedureChain<N>
    where
        N: Send + 'static,
        F: Fn(C, RequestMeta) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<N>> + Send + 'static,
    {
        self.then(move |_input, ctx, meta| link(ctx, meta))
    }
}

impl<C> ProcedureChain<C> {
    /// Returns a copy of this chain with an extra start callback, fired at the
    /// beginning of every attempt of every action built on it.
    #[must_use]
    pub fn on_start(&self, callback: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        let mut next = self.clone();
        next.on_start.push(Arc::new(callback));
        next
    }

    /// Starts an action definition on top of this chain.
    #[must_use]
    pub fn action(&self, name: impl Into<String>) -> ActionBuilder<Value, C> {
        ActionBuilder::new(name).chain(self.clone())
    }

    /// Number of links in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn start_callbacks(&self) -> &[StartCallback] {
        &self.on_start
    }

    /// Folds the chain. A failing link aborts the fold.
    pub(crate) async fn run(&self, input: Value, meta: RequestMeta) -> anyhow::Result<C> {
        (self.run)(input, meta).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::error::ActionError;

    #[tokio::test]
    async fn links_run_in_insertion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (Arc::clone(&log), Arc::clone(&log));

        let chain = ProcedureChain::new()
            .then_ctx(move |(), _| {
                let a = Arc::clone(&a);
                async move {
                    a.lock().push("first");
                    anyhow::Ok(1_u32)
                }
            })
            .then_ctx(move |n, _| {
                let b = Arc::clone(&b);
                async move {
                    b.lock().push("second");
                    anyhow::Ok(format!("user-{n}"))
                }
            });

        let ctx = chain.run(Value::Null, RequestMeta::default()).await.unwrap();
        assert_eq!(ctx, "user-1");
        assert_eq!(*log.lock(), vec!["first", "second"]);
        assert_eq!(chain.len(), 2);
    }

    #[tokio::test]
    async fn extending_does_not_mutate_parent() {
        let parent = ProcedureChain::new().then_ctx(|(), _| async { anyhow::Ok(10_i64) });
        let child = parent.then_ctx(|n, _| async move { anyhow::Ok(n * 2) });

        assert_eq!(parent.len(), 1);
        assert_eq!(child.len(), 2);
        assert_eq!(parent.run(Value::Null, RequestMeta::default()).await.unwrap(), 10);
        assert_eq!(child.run(Value::Null, RequestMeta::default()).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn links_receive_input_and_meta() {
        let chain = ProcedureChain::new().then(|input, (), meta| async move {
            anyhow::Ok((input["id"].as_i64().unwrap_or_default(), meta.attempt))
        });
        let meta = RequestMeta {
            attempt: 3,
            request: None,
        };
        let ctx = chain.run(json!({ "id": 7 }), meta).await.unwrap();
        assert_eq!(ctx, (7, 3));
    }

    #[tokio::test]
    async fn failing_link_aborts_fold() {
        let reached = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&reached);
        let chain = ProcedureChain::new()
            .then_ctx(|(), _| async {
                Err::<(), anyhow::Error>(ActionError::not_authorized("no session").into())
            })
            .then_ctx(move |(), _| {
                let flag = Arc::clone(&flag);
                async move {
                    *flag.lock() = true;
                    anyhow::Ok(())
                }
            });

        let err = chain.run(Value::Null, RequestMeta::default()).await.unwrap_err();
        assert!(err.downcast_ref::<ActionError>().is_some());
        assert!(!*reached.lock());
    }
}
