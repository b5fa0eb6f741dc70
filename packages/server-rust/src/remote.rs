//! Remote invocation of an action served by a [`RequestAdapter`](crate::adapter::RequestAdapter).

use std::fmt;
use std::marker::PhantomData;

use actionkit_core::client::Invoke;
use actionkit_core::{ActionError, ActionResult, ErrorCode};
use async_trait::async_trait;
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

/// Calls one HTTP route and decodes the response into the result contract.
///
/// GET sends the fields of an object input as query parameters; every other
/// method sends the input as a JSON body.
pub struct HttpInvoker<T> {
    client: reqwest::Client,
    method: Method,
    url: String,
    _output: PhantomData<fn() -> T>,
}

impl<T> Clone for HttpInvoker<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            method: self.method.clone(),
            url: self.url.clone(),
            _output: PhantomData,
        }
    }
}

impl<T> fmt::Debug for HttpInvoker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpInvoker")
            .field("method", &self.method)
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl<T> HttpInvoker<T> {
    /// Invoker using a fresh `reqwest::Client`.
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), method, url)
    }

    /// Shares an existing client and its connection pool.
    #[must_use]
    pub fn with_client(client: reqwest::Client, method: Method, url: impl Into<String>) -> Self {
        Self {
            client,
            method,
            url: url.into(),
            _output: PhantomData,
        }
    }

    fn request(&self, input: &Value) -> reqwest::RequestBuilder {
        let builder = self.client.request(self.method.clone(), &self.url);
        if self.method == Method::GET {
            match input {
                Value::Object(fields) => builder.query(&query_pairs(fields)),
                _ => builder,
            }
        } else {
            builder.json(input)
        }
    }
}

#[async_trait]
impl<T> Invoke<T> for HttpInvoker<T>
where
    T: DeserializeOwned + Send,
{
    async fn invoke(&self, input: Value) -> ActionResult<T> {
        let response = self.request(&input).send().await.map_err(transport_error)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(transport_error)?;
        debug!(url = %self.url, %status, len = bytes.len(), "remote action responded");

        if status == StatusCode::OK {
            return serde_json::from_slice(&bytes).map_err(|e| {
                ActionError::new(
                    ErrorCode::OutputParseError,
                    format!("response body did not decode: {e}"),
                )
            });
        }

        if let Ok(err) = serde_json::from_slice::<ActionError>(&bytes) {
            return Err(err);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ActionError::not_found(format!(
                "no route for {} {}",
                self.method, self.url
            )));
        }
        Err(ActionError::new(ErrorCode::Error, format!("unexpected status {status}"))
            .with_data(Value::from(status.as_u16())))
    }
}

fn query_pairs(fields: &serde_json::Map<String, Value>) -> Vec<(&str, String)> {
    fields
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.as_str(), value)
        })
        .collect()
}

fn transport_error(e: reqwest::Error) -> ActionError {
    ActionError::new(ErrorCode::Error, format!("request failed: {e}"))
}
