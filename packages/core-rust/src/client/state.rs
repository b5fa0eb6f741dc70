//! Client-side invocation state.

use crate::error::ActionError;

/// Lifecycle of an action as seen by a call site.
///
/// `data` is carried only by `LoadingOptimistic` and `Success`; `error` only
/// by `Error`. There is no terminal state.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationState<T> {
    Idle,
    Loading,
    LoadingOptimistic { data: T },
    Success { data: T },
    Error { error: ActionError },
}

impl<T> InvocationState<T> {
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// True for both plain and optimistic loading.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading | Self::LoadingOptimistic { .. })
    }

    #[must_use]
    pub fn is_optimistic(&self) -> bool {
        matches!(self, Self::LoadingOptimistic { .. })
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Data carried by this state, if any.
    #[must_use]
    pub fn data(&self) -> Option<&T> {
        match self {
            Self::LoadingOptimistic { data } | Self::Success { data } => Some(data),
            _ => None,
        }
    }

    /// Error carried by this state, if any.
    #[must_use]
    pub fn error(&self) -> Option<&ActionError> {
        match self {
            Self::Error { error } => Some(error),
            _ => None,
        }
    }
}

/// One consistent observation of a hook: its state plus the last confirmed
/// (non-optimistic) data.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionSnapshot<T> {
    pub state: InvocationState<T>,
    pub confirmed: Option<T>,
}

impl<T> ActionSnapshot<T> {
    /// Data a UI should show: the state's own data, falling back to the last
    /// confirmed result while loading or after an error.
    #[must_use]
    pub fn data(&self) -> Option<&T> {
        self.state.data().or(self.confirmed.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn predicates_are_exclusive() {
        let states: Vec<InvocationState<i32>> = vec![
            InvocationState::Idle,
            InvocationState::Loading,
            InvocationState::LoadingOptimistic { data: 1 },
            InvocationState::Success { data: 2 },
            InvocationState::Error {
                error: ActionError::new(ErrorCode::Error, "x"),
            },
        ];
        for s in &states {
            let flags = [s.is_idle(), s.is_loading(), s.is_success(), s.is_error()];
            assert_eq!(flags.iter().filter(|f| **f).count(), 1, "{s:?}");
        }
    }

    #[test]
    fn snapshot_falls_back_to_confirmed() {
        let snap = ActionSnapshot {
            state: InvocationState::<i32>::Error {
                error: ActionError::new(ErrorCode::Error, "x"),
            },
            confirmed: Some(7),
        };
        assert_eq!(snap.data(), Some(&7));

        let snap = ActionSnapshot {
            state: InvocationState::LoadingOptimistic { data: 9 },
            confirmed: Some(7),
        };
        assert_eq!(snap.data(), Some(&9));
    }
}
