//! Wire form of an action result: `[data, null]` or `[null, error]`.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{ActionError, ActionResult};

/// An [`ActionResult`] that serializes as a two-element array.
#[derive(Debug, Clone, PartialEq)]
pub struct WireResult<T>(pub ActionResult<T>);

impl<T> WireResult<T> {
    /// Converts the wire pair back into a `Result`.
    #[must_use]
    pub fn into_result(self) -> ActionResult<T> {
        self.0
    }
}

impl<T> From<ActionResult<T>> for WireResult<T> {
    fn from(result: ActionResult<T>) -> Self {
        Self(result)
    }
}

impl<T: Serialize> Serialize for WireResult<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.0 {
            Ok(data) => (data, Option::<&ActionError>::None).serialize(serializer),
            Err(err) => (Option::<&T>::None, err).serialize(serializer),
        }
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for WireResult<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (data, error) = <(Value, Option<ActionError>)>::deserialize(deserializer)?;
        match error {
            Some(err) => Ok(Self(Err(err))),
            None => T::deserialize(data).map(|d| Self(Ok(d))).map_err(D::Error::custom),
        }
    }
}
