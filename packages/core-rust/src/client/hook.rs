//! Client invocation hook: request lifecycle, optimistic overlay, refetch.
//!
//! An [`ActionHandle`] wraps an [`Invoke`] implementation. All state
//! transitions happen under one lock and are published as whole
//! [`ActionSnapshot`]s, so observers never see a partial mix of state and data.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::bus::{key_matches, join_key, RefetchBus};
use super::invoke::Invoke;
use super::state::{ActionSnapshot, InvocationState};
use crate::error::{ActionError, ActionResult};
use crate::lifecycle::guard;
use crate::schema::Issue;

type StartHook = Arc<dyn Fn() + Send + Sync>;
type SuccessHook<T> = Arc<dyn Fn(&T) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&ActionError) + Send + Sync>;

// ---------------------------------------------------------------------------
// HookOptions
// ---------------------------------------------------------------------------

/// Options for [`ActionHandle::new`].
pub struct HookOptions<T> {
    initial_data: Option<T>,
    on_start: Option<StartHook>,
    on_success: Option<SuccessHook<T>>,
    on_error: Option<ErrorHook>,
    refetch: Option<(RefetchBus, String)>,
}

impl<T> Default for HookOptions<T> {
    fn default() -> Self {
        Self {
            initial_data: None,
            on_start: None,
            on_success: None,
            on_error: None,
            refetch: None,
        }
    }
}

impl<T> HookOptions<T> {
    /// Options with no initial data, callbacks or refetch key.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Confirmed data visible before the first call completes.
    #[must_use]
    pub fn initial_data(mut self, data: T) -> Self {
        self.initial_data = Some(data);
        self
    }

    /// Called when a call begins.
    #[must_use]
    pub fn on_start(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(f));
        self
    }

    /// Called with the data of every successful call.
    #[must_use]
    pub fn on_success(mut self, f: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    /// Called with the error of every failed call.
    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&ActionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Re-runs the hook whenever `bus` publishes a key that prefixes the
    /// joined `key`.
    #[must_use]
    pub fn refetch_on<S: AsRef<str>>(mut self, bus: &RefetchBus, key: &[S]) -> Self {
        self.refetch = Some((bus.clone(), join_key(key)));
        self
    }
}

// ---------------------------------------------------------------------------
// ActionHandle
// ---------------------------------------------------------------------------

struct HookInner<T> {
    state: InvocationState<T>,
    confirmed: Option<T>,
    /// Confirmed data captured when an optimistic overlay was first applied.
    /// At most one is pending at a time.
    snapshot: Option<Option<T>>,
    last_input: Option<Value>,
    /// Incremented per `execute` and `reset`; only the latest call may write.
    generation: u64,
}

struct Shared<T> {
    invoker: Arc<dyn Invoke<T>>,
    inner: Mutex<HookInner<T>>,
    tx: watch::Sender<ActionSnapshot<T>>,
    initial_data: Option<T>,
    on_start: Option<StartHook>,
    on_success: Option<SuccessHook<T>>,
    on_error: Option<ErrorHook>,
}

impl<T: Clone> Shared<T> {
    fn publish(&self, inner: &HookInner<T>) {
        self.tx.send_replace(ActionSnapshot {
            state: inner.state.clone(),
            confirmed: inner.confirmed.clone(),
        });
    }
}

/// Aborts the bus listener once the last handle clone is dropped.
struct RefetchTask(JoinHandle<()>);

impl Drop for RefetchTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Live handle to an action call site. Clones share state.
pub struct ActionHandle<T> {
    shared: Arc<Shared<T>>,
    _refetch: Option<Arc<RefetchTask>>,
}

impl<T> Clone for ActionHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            _refetch: self._refetch.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ActionHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionHandle")
            .field("snapshot", &*self.shared.tx.borrow())
            .finish_non_exhaustive()
    }
}

impl<T> ActionHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a handle in the `Idle` state.
    ///
    /// # Panics
    ///
    /// Panics if a refetch binding is configured and no tokio runtime is
    /// running, since the bus listener is spawned as a task.
    #[must_use]
    pub fn new(invoker: Arc<dyn Invoke<T>>, options: HookOptions<T>) -> Self {
        let inner = HookInner {
            state: InvocationState::Idle,
            confirmed: options.initial_data.clone(),
            snapshot: None,
            last_input: None,
            generation: 0,
        };
        let (tx, _rx) = watch::channel(ActionSnapshot {
            state: InvocationState::Idle,
            confirmed: options.initial_data.clone(),
        });

        let shared = Arc::new(Shared {
            invoker,
            inner: Mutex::new(inner),
            tx,
            initial_data: options.initial_data,
            on_start: options.on_start,
            on_success: options.on_success,
            on_error: options.on_error,
        });

        let refetch = options
            .refetch
            .map(|(bus, key)| Arc::new(spawn_refetch_listener(&bus, key, Arc::downgrade(&shared))));

        Self {
            shared,
            _refetch: refetch,
        }
    }

    /// Current state and confirmed data.
    #[must_use]
    pub fn snapshot(&self) -> ActionSnapshot<T> {
        self.shared.tx.borrow().clone()
    }

    /// Receiver that yields a new snapshot after every transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ActionSnapshot<T>> {
        self.shared.tx.subscribe()
    }

    /// Serializes `input` and runs the action.
    ///
    /// # Errors
    ///
    /// Returns the action's error; the hook state is `Error` afterwards.
    pub async fn execute(&self, input: impl Serialize) -> ActionResult<T> {
        match serde_json::to_value(input) {
            Ok(value) => self.execute_value(value).await,
            Err(e) => {
                let err = ActionError::input_parse(&[Issue::form(e.to_string())]);
                let generation = self.begin(Value::Null);
                self.settle(generation, Err(err))
            }
        }
    }

    /// Runs the action with an already-serialized input.
    ///
    /// # Errors
    ///
    /// Returns the action's error; the hook state is `Error` afterwards.
    pub async fn execute_value(&self, input: Value) -> ActionResult<T> {
        let generation = self.begin(input.clone());
        let result = self.shared.invoker.invoke(input).await;
        self.settle(generation, result)
    }

    /// Re-runs the last input. Without a prior call the input is `null`.
    ///
    /// # Errors
    ///
    /// Returns the action's error.
    pub async fn refetch(&self) -> ActionResult<T> {
        let input = self
            .shared
            .inner
            .lock()
            .last_input
            .clone()
            .unwrap_or(Value::Null);
        self.execute_value(input).await
    }

    /// Shows `data` immediately without calling the action. The confirmed
    /// data is restored if the next call fails.
    pub fn set_optimistic(&self, data: T) {
        self.set_optimistic_with(|_| data);
    }

    /// Like [`set_optimistic`](Self::set_optimistic), computing the overlay
    /// from the currently visible data.
    pub fn set_optimistic_with(&self, update: impl FnOnce(Option<&T>) -> T) {
        let mut inner = self.shared.inner.lock();
        if inner.snapshot.is_none() {
            inner.snapshot = Some(inner.confirmed.clone());
        }
        let visible = inner.state.data().or(inner.confirmed.as_ref());
        let data = update(visible);
        inner.state = InvocationState::LoadingOptimistic { data };
        self.shared.publish(&inner);
    }

    /// Returns to `Idle` with the initial data. In-flight calls still
    /// resolve for their callers but no longer affect the state.
    pub fn reset(&self) {
        let mut inner = self.shared.inner.lock();
        inner.generation += 1;
        inner.state = InvocationState::Idle;
        inner.confirmed = self.shared.initial_data.clone();
        inner.snapshot = None;
        inner.last_input = None;
        self.shared.publish(&inner);
    }

    fn begin(&self, input: Value) -> u64 {
        let generation = {
            let mut inner = self.shared.inner.lock();
            inner.generation += 1;
            inner.last_input = Some(input);
            if !inner.state.is_optimistic() {
                inner.state = InvocationState::Loading;
            }
            self.shared.publish(&inner);
            inner.generation
        };
        if let Some(cb) = &self.shared.on_start {
            let _ = guard("hook on_start", cb.as_ref());
        }
        generation
    }

    fn settle(&self, generation: u64, result: ActionResult<T>) -> ActionResult<T> {
        {
            let mut inner = self.shared.inner.lock();
            if inner.generation == generation {
                match &result {
                    Ok(data) => {
                        inner.snapshot = None;
                        inner.confirmed = Some(data.clone());
                        inner.state = InvocationState::Success { data: data.clone() };
                    }
                    Err(error) => {
                        if let Some(confirmed) = inner.snapshot.take() {
                            inner.confirmed = confirmed;
                        }
                        inner.state = InvocationState::Error {
                            error: error.clone(),
                        };
                    }
                }
                self.shared.publish(&inner);
            } else {
                debug!(generation, current = inner.generation, "discarding stale result");
            }
        }

        match &result {
            Ok(data) => {
                if let Some(cb) = &self.shared.on_success {
                    let _ = guard("hook on_success", || cb(data));
                }
            }
            Err(err) => {
                if let Some(cb) = &self.shared.on_error {
                    let _ = guard("hook on_error", || cb(err));
                }
            }
        }
        result
    }
}

fn spawn_refetch_listener<T>(bus: &RefetchBus, key: String, shared: Weak<Shared<T>>) -> RefetchTask
where
    T: Clone + Send + Sync + 'static,
{
    let mut subscription = bus.subscribe();
    RefetchTask(tokio::spawn(async move {
        while let Some(event) = subscription.next().await {
            if !key_matches(&event.key, &key) {
                continue;
            }
            let Some(shared) = shared.upgrade() else {
                break;
            };
            debug!(key = %key, published = %event.key, "refetching");
            let handle = ActionHandle {
                shared,
                _refetch: None,
            };
            // Errors already land in the hook state.
            let _ = handle.refetch().await;
        }
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::{mpsc, oneshot};

    use super::*;
    use crate::action::ActionBuilder;
    use crate::error::ErrorCode;

    /// Replies from a queue and reports every call's input.
    struct Scripted {
        replies: Mutex<VecDeque<ActionResult<i32>>>,
        calls: mpsc::UnboundedSender<Value>,
    }

    #[async_trait]
    impl Invoke<i32> for Scripted {
        async fn invoke(&self, input: Value) -> ActionResult<i32> {
            let _ = self.calls.send(input);
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(ActionError::new(ErrorCode::Error, "no reply scripted")))
        }
    }

    fn scripted(
        replies: Vec<ActionResult<i32>>,
    ) -> (Arc<dyn Invoke<i32>>, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let invoker = Scripted {
            replies: Mutex::new(replies.into()),
            calls: tx,
        };
        (Arc::new(invoker), rx)
    }

    fn failure() -> ActionError {
        ActionError::new(ErrorCode::Error, "write rejected")
    }

    /// Blocks until released, so the loading state can be observed.
    struct Gate {
        release: Mutex<Option<oneshot::Receiver<i32>>>,
    }

    #[async_trait]
    impl Invoke<i32> for Gate {
        async fn invoke(&self, _input: Value) -> ActionResult<i32> {
            let rx = self.release.lock().take();
            match rx {
                Some(rx) => rx.await.map_err(|_| failure()),
                None => Err(failure()),
            }
        }
    }

    #[tokio::test]
    async fn starts_idle_with_initial_data() {
        let (invoker, _calls) = scripted(vec![]);
        let handle = ActionHandle::new(invoker, HookOptions::new().initial_data(3));
        let snap = handle.snapshot();
        assert!(snap.state.is_idle());
        assert_eq!(snap.data(), Some(&3));
    }

    #[tokio::test]
    async fn loading_then_success() {
        let (release_tx, release_rx) = oneshot::channel();
        let gate: Arc<dyn Invoke<i32>> = Arc::new(Gate {
            release: Mutex::new(Some(release_rx)),
        });
        let handle = ActionHandle::new(gate, HookOptions::new());

        let runner = handle.clone();
        let call = tokio::spawn(async move { runner.execute(json!({})).await });

        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.state.is_loading()).await.unwrap();
        assert_eq!(handle.snapshot().state, InvocationState::Loading);

        release_tx.send(11).unwrap();
        assert_eq!(call.await.unwrap().unwrap(), 11);
        assert_eq!(
            handle.snapshot().state,
            InvocationState::Success { data: 11 }
        );
    }

    #[tokio::test]
    async fn failure_sets_error_and_keeps_confirmed_data() {
        let (invoker, _calls) = scripted(vec![Ok(1), Err(failure())]);
        let handle = ActionHandle::new(invoker, HookOptions::new());

        handle.execute(json!({})).await.unwrap();
        let err = handle.execute(json!({})).await.unwrap_err();

        let snap = handle.snapshot();
        assert_eq!(snap.state.error(), Some(&err));
        assert_eq!(snap.data(), Some(&1));
    }

    #[tokio::test]
    async fn optimistic_overlay_is_rolled_back_on_failure() {
        let (invoker, _calls) = scripted(vec![Ok(10), Err(failure())]);
        let handle = ActionHandle::new(invoker, HookOptions::new());
        handle.execute(json!({})).await.unwrap();

        handle.set_optimistic(20);
        let snap = handle.snapshot();
        assert!(snap.state.is_optimistic());
        assert_eq!(snap.data(), Some(&20));

        handle.execute(json!({ "likes": 20 })).await.unwrap_err();
        let snap = handle.snapshot();
        assert!(snap.state.is_error());
        assert_eq!(snap.data(), Some(&10));
    }

    #[tokio::test]
    async fn second_overlay_does_not_stack_snapshots() {
        let (invoker, _calls) = scripted(vec![Ok(1), Err(failure())]);
        let handle = ActionHandle::new(invoker, HookOptions::new());
        handle.execute(json!({})).await.unwrap();

        handle.set_optimistic(2);
        handle.set_optimistic_with(|current| current.copied().unwrap_or_default() + 1);
        assert_eq!(handle.snapshot().data(), Some(&3));

        handle.execute(json!({})).await.unwrap_err();
        assert_eq!(handle.snapshot().data(), Some(&1));
    }

    #[tokio::test]
    async fn optimistic_overlay_is_replaced_on_success() {
        let (invoker, _calls) = scripted(vec![Ok(5)]);
        let handle = ActionHandle::new(invoker, HookOptions::new());

        handle.set_optimistic(4);
        handle.execute(json!({})).await.unwrap();

        let snap = handle.snapshot();
        assert_eq!(snap.state, InvocationState::Success { data: 5 });
        assert_eq!(snap.confirmed, Some(5));
    }

    #[tokio::test]
    async fn refetch_reuses_last_input() {
        let (invoker, mut calls) = scripted(vec![Ok(1), Ok(2)]);
        let handle = ActionHandle::new(invoker, HookOptions::new());

        handle.execute(json!({ "page": 2 })).await.unwrap();
        assert_eq!(handle.refetch().await.unwrap(), 2);

        assert_eq!(calls.recv().await.unwrap(), json!({ "page": 2 }));
        assert_eq!(calls.recv().await.unwrap(), json!({ "page": 2 }));
    }

    #[tokio::test]
    async fn reset_returns_to_idle() {
        let (invoker, _calls) = scripted(vec![Ok(1)]);
        let handle = ActionHandle::new(invoker, HookOptions::new().initial_data(0));
        handle.execute(json!({})).await.unwrap();

        handle.reset();
        let snap = handle.snapshot();
        assert!(snap.state.is_idle());
        assert_eq!(snap.confirmed, Some(0));
    }

    #[tokio::test]
    async fn callbacks_fire_per_outcome() {
        let log = Arc::new(Mutex::new(Vec::<String>::new()));
        let (a, b, c) = (Arc::clone(&log), Arc::clone(&log), Arc::clone(&log));
        let (invoker, _calls) = scripted(vec![Ok(1), Err(failure())]);
        let handle = ActionHandle::new(
            invoker,
            HookOptions::new()
                .on_start(move || a.lock().push("start".into()))
                .on_success(move |d| b.lock().push(format!("ok:{d}")))
                .on_error(move |e| c.lock().push(format!("err:{}", e.code))),
        );

        handle.execute(json!({})).await.unwrap();
        handle.execute(json!({})).await.unwrap_err();
        assert_eq!(*log.lock(), vec!["start", "ok:1", "start", "err:ERROR"]);
    }

    #[tokio::test]
    async fn panicking_callbacks_do_not_break_the_hook() {
        let (invoker, _calls) = scripted(vec![Ok(1), Err(failure())]);
        let handle = ActionHandle::new(
            invoker,
            HookOptions::new()
                .on_start(|| panic!("start callback bug"))
                .on_success(|_| panic!("success callback bug"))
                .on_error(|_| panic!("error callback bug")),
        );

        assert_eq!(handle.execute(json!({})).await.unwrap(), 1);
        assert!(handle.snapshot().state.is_success());
        handle.execute(json!({})).await.unwrap_err();
        assert!(handle.snapshot().state.is_error());
    }

    #[tokio::test]
    async fn bus_publication_refetches_matching_hooks() {
        let bus = RefetchBus::new();
        let (posts, mut post_calls) = scripted(vec![Ok(1), Ok(2)]);
        let (users, mut user_calls) = scripted(vec![Ok(1)]);

        let post_handle =
            ActionHandle::new(posts, HookOptions::new().refetch_on(&bus, &["posts", "42"]));
        let _user_handle =
            ActionHandle::new(users, HookOptions::new().refetch_on(&bus, &["users"]));

        post_handle.execute(json!({ "id": 42 })).await.unwrap();
        post_calls.recv().await.unwrap();

        bus.refetch(&["posts"]);
        let refetched = tokio::time::timeout(Duration::from_secs(1), post_calls.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(refetched, json!({ "id": 42 }));

        let mut rx = post_handle.subscribe();
        rx.wait_for(|s| s.state == InvocationState::Success { data: 2 })
            .await
            .unwrap();
        assert!(user_calls.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropping_all_handles_unsubscribes_from_bus() {
        let bus = RefetchBus::new();
        let (invoker, _calls) = scripted(vec![]);
        let handle = ActionHandle::new(invoker, HookOptions::new().refetch_on(&bus, &["k"]));
        let clone = handle.clone();
        assert_eq!(bus.subscriber_count(), 1);

        drop(handle);
        drop(clone);
        // Aborted tasks release their receiver once the runtime polls them.
        for _ in 0..10 {
            if bus.subscriber_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn stale_results_do_not_overwrite_newer_calls() {
        let (slow_tx, slow_rx) = oneshot::channel();
        let gate: Arc<dyn Invoke<i32>> = Arc::new(Gate {
            release: Mutex::new(Some(slow_rx)),
        });
        let handle = ActionHandle::new(gate, HookOptions::new());

        let slow = handle.clone();
        let first = tokio::spawn(async move { slow.execute(json!({})).await });
        handle
            .subscribe()
            .wait_for(|s| s.state.is_loading())
            .await
            .unwrap();

        // The gate has no second receiver, so the newer call fails fast.
        handle.execute(json!({})).await.unwrap_err();
        slow_tx.send(99).unwrap();
        assert_eq!(first.await.unwrap().unwrap(), 99);

        assert!(handle.snapshot().state.is_error());
    }

    #[tokio::test]
    async fn wraps_an_in_process_action() {
        let action = ActionBuilder::new("double")
            .handler(|args| async move { anyhow::Ok(args.input["n"].as_i64().unwrap_or(0) * 2) });
        let invoker: Arc<dyn Invoke<i64>> = Arc::new(action);
        let handle = ActionHandle::new(invoker, HookOptions::new());
        assert_eq!(handle.execute(json!({ "n": 4 })).await.unwrap(), 8);
    }
}
