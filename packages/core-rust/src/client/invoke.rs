use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::action::{Action, ExecuteOptions, SharedAction};
use crate::error::ActionResult;

/// Something a hook can call: an in-process action or a remote endpoint.
#[async_trait]
pub trait Invoke<T>: Send + Sync {
    async fn invoke(&self, input: Value) -> ActionResult<T>;
}

#[async_trait]
impl<I, O, C> Invoke<O> for Action<I, O, C>
where
    I: DeserializeOwned + Clone + Send + Sync + 'static,
    O: Serialize + Send + 'static,
    C: Send + 'static,
{
    async fn invoke(&self, input: Value) -> ActionResult<O> {
        self.call(input).await
    }
}

#[async_trait]
impl Invoke<Value> for SharedAction {
    async fn invoke(&self, input: Value) -> ActionResult<Value> {
        self.call_json(input, ExecuteOptions::default()).await
    }
}
