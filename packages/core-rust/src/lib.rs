//! `ActionKit` Core: typed server actions, their execution engine, and the
//! client-side invocation hook.

pub mod action;
pub mod client;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod procedure;
pub mod result;
pub mod retry;
pub mod schema;

pub use action::{Action, ActionBuilder, DynAction, ExecuteOptions, HandlerArgs, SharedAction};
pub use client::{ActionHandle, HookOptions, InvocationState, Invoke, RefetchBus};
pub use error::{classify, ActionError, ActionResult, ErrorCode};
pub use lifecycle::Outcome;
pub use procedure::{ProcedureChain, RequestMeta};
pub use result::WireResult;
pub use retry::{RetryDelay, RetryPolicy};
pub use schema::{FieldDef, FieldKind, FnSchema, Issue, ObjectSchema, Schema};
