//! Input assembly: query string, then body, then path parameters.
//!
//! Later sources overwrite earlier keys, so path parameters are never
//! shadowed. Every source degrades to "nothing contributed" on parse failure;
//! schema validation downstream reports what is missing.

use std::collections::BTreeMap;

use axum::body::Body;
use axum::extract::{FromRequest, Multipart, Query};
use axum::Form;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, Method, Request, Uri};
use serde_json::{Map, Value};
use tracing::debug;

type Pairs = Vec<(String, String)>;

/// Methods whose body is read.
#[must_use]
pub fn carries_body(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Query parameters as string values. Repeated keys keep the last value.
#[must_use]
pub fn query_params(uri: &Uri) -> Map<String, Value> {
    match Query::<Pairs>::try_from_uri(uri) {
        Ok(Query(pairs)) => into_object(pairs),
        Err(e) => {
            debug!(error = %e, "ignoring malformed query string");
            Map::new()
        }
    }
}

/// Reads at most `limit` bytes of body and decodes it by content type.
///
/// Form and multipart bodies yield an object of their text fields; anything
/// else is parsed as JSON. An empty, oversized, or malformed body yields `None`.
pub async fn read_body(headers: &HeaderMap, body: Body, limit: usize) -> Option<Value> {
    let bytes = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, limit, "request body not read");
            return None;
        }
    };
    if bytes.is_empty() {
        return None;
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let req = rebuild(content_type, bytes)?;
        let Form(pairs) = Form::<Pairs>::from_request(req, &()).await.ok()?;
        Some(Value::Object(into_object(pairs)))
    } else if content_type.starts_with("multipart/form-data") {
        let req = rebuild(content_type, bytes)?;
        let multipart = Multipart::from_request(req, &()).await.ok()?;
        Some(Value::Object(multipart_text_fields(multipart).await))
    } else {
        serde_json::from_slice(&bytes).ok()
    }
}

/// Merges the three sources. A non-object body stands in for the whole input
/// only when neither query nor path contributes anything.
#[must_use]
pub fn assemble(
    query: Map<String, Value>,
    body: Option<Value>,
    path_params: BTreeMap<String, String>,
) -> Value {
    let mut input = query;
    let mut whole_body = None;

    match body {
        Some(Value::Object(fields)) => input.extend(fields),
        Some(Value::Null) | None => {}
        Some(other) if input.is_empty() => whole_body = Some(other),
        Some(_) => debug!("discarding non-object body alongside query parameters"),
    }

    if !path_params.is_empty() {
        whole_body = None;
        input.extend(
            path_params
                .into_iter()
                .map(|(k, v)| (k, Value::String(v))),
        );
    }

    whole_body.unwrap_or(Value::Object(input))
}

fn into_object(pairs: Pairs) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect()
}

fn rebuild(content_type: &str, bytes: bytes::Bytes) -> Option<Request<Body>> {
    Request::builder()
        .method(Method::POST)
        .header(CONTENT_TYPE, content_type)
        .body(Body::from(bytes))
        .ok()
}

async fn multipart_text_fields(mut multipart: Multipart) -> Map<String, Value> {
    let mut fields = Map::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        if field.file_name().is_some() {
            continue;
        }
        if let Ok(text) = field.text().await {
            fields.insert(name, Value::String(text));
        }
    }
    fields
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn headers(content_type: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(CONTENT_TYPE, content_type.parse().unwrap());
        h
    }

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn path_beats_body_beats_query() {
        let query = query_params(&"/x?id=q&sort=asc&page=1".parse().unwrap());
        let body = json!({ "id": "b", "page": 2 });
        let input = assemble(query, Some(body), params(&[("id", "p")]));
        assert_eq!(input, json!({ "id": "p", "sort": "asc", "page": 2 }));
    }

    #[test]
    fn repeated_query_keys_keep_the_last() {
        let query = query_params(&"/x?tag=a&tag=b".parse().unwrap());
        assert_eq!(query["tag"], "b");
    }

    #[test]
    fn non_object_body_is_the_input_when_alone() {
        assert_eq!(assemble(Map::new(), Some(json!(5)), BTreeMap::new()), json!(5));
        let with_param = assemble(Map::new(), Some(json!(5)), params(&[("id", "1")]));
        assert_eq!(with_param, json!({ "id": "1" }));
    }

    #[test]
    fn nothing_contributed_is_an_empty_object() {
        assert_eq!(assemble(Map::new(), None, BTreeMap::new()), json!({}));
    }

    #[test]
    fn body_methods() {
        assert!(carries_body(&Method::POST));
        assert!(carries_body(&Method::DELETE));
        assert!(!carries_body(&Method::GET));
    }

    #[tokio::test]
    async fn json_body() {
        let v = read_body(&headers("application/json"), Body::from(r#"{"a":1}"#), 1024).await;
        assert_eq!(v, Some(json!({ "a": 1 })));
    }

    #[tokio::test]
    async fn malformed_json_contributes_nothing() {
        let v = read_body(&headers("application/json"), Body::from("{oops"), 1024).await;
        assert!(v.is_none());
    }

    #[tokio::test]
    async fn oversized_body_contributes_nothing() {
        let v = read_body(&headers("application/json"), Body::from(r#"{"a":1}"#), 3).await;
        assert!(v.is_none());
    }

    #[tokio::test]
    async fn form_body() {
        let v = read_body(
            &headers("application/x-www-form-urlencoded"),
            Body::from("title=Hello+world&draft=true"),
            1024,
        )
        .await;
        assert_eq!(v, Some(json!({ "title": "Hello world", "draft": "true" })));
    }

    #[tokio::test]
    async fn multipart_text_fields_only() {
        let body = "--XYZ\r\n\
            Content-Disposition: form-data; name=\"title\"\r\n\r\n\
            Hi\r\n\
            --XYZ\r\n\
            Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\
            Content-Type: text/plain\r\n\r\n\
            file body\r\n\
            --XYZ--\r\n";
        let v = read_body(
            &headers("multipart/form-data; boundary=XYZ"),
            Body::from(body),
            4096,
        )
        .await;
        assert_eq!(v, Some(json!({ "title": "Hi" })));
    }
}
