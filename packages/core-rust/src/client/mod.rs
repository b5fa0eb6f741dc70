//! Client-side call sites: invocation state, the hook, and the refetch bus.

pub mod bus;
pub mod hook;
pub mod invoke;
pub mod state;

pub use bus::{join_key, key_matches, RefetchBus, RefetchEvent, RefetchSubscription};
pub use hook::{ActionHandle, HookOptions};
pub use invoke::Invoke;
pub use state::{ActionSnapshot, InvocationState};
