//! REST path templates: validation, normalization, and segment matching.
//!
//! A template is a literal path whose segments may be `{name}` placeholders.
//! There are no wildcards and no regex; matching compares segment counts and
//! then segments positionally.

use std::collections::BTreeMap;

use super::RouteError;

/// Placeholder token used in canonical paths for duplicate detection.
/// Control characters are rejected by [`validate`], so no literal segment
/// can collide with it.
const CANONICAL_PARAM: &str = "\u{0}";

/// A validated, normalized path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    canonical: String,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

impl Segment {
    fn parse(s: &str) -> Self {
        match s.strip_prefix('{').and_then(|rest| rest.strip_suffix('}')) {
            Some(name) if !name.is_empty() => Self::Param(name.to_string()),
            _ => Self::Literal(s.to_string()),
        }
    }
}

impl PathTemplate {
    /// Validates and normalizes `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidPath`] if the path does not start with `/`
    /// or contains a space, a `?` or a control character.
    pub fn parse(path: &str) -> Result<Self, RouteError> {
        validate(path)?;
        let raw = normalize(path);
        let segments: Vec<Segment> = split(&raw).map(Segment::parse).collect();
        let canonical = if segments.is_empty() {
            "/".to_string()
        } else {
            segments
                .iter()
                .map(|s| match s {
                    Segment::Literal(l) => format!("/{l}"),
                    Segment::Param(_) => format!("/{CANONICAL_PARAM}"),
                })
                .collect()
        };
        Ok(Self {
            raw,
            canonical,
            segments,
        })
    }

    /// Normalized template as written, e.g. `/posts/{postId}`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Template with every placeholder replaced by the same token, so
    /// `/posts/{a}` and `/posts/{b}` compare equal.
    #[must_use]
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Placeholder names in positional order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Matches a request path, returning bound placeholder values.
    ///
    /// Placeholder values are percent-decoded; a value that does not decode
    /// to UTF-8 is bound as received.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let normalized = normalize(path);
        if normalized == self.raw {
            return Some(BTreeMap::new());
        }

        let incoming: Vec<&str> = split(&normalized).collect();
        if incoming.len() != self.segments.len() {
            return None;
        }

        let mut params = BTreeMap::new();
        for (segment, value) in self.segments.iter().zip(incoming) {
            match segment {
                Segment::Literal(l) if l == value => {}
                Segment::Literal(_) => return None,
                Segment::Param(name) => {
                    let decoded = urlencoding::decode(value)
                        .map_or_else(|_| value.to_string(), std::borrow::Cow::into_owned);
                    params.insert(name.clone(), decoded);
                }
            }
        }
        Some(params)
    }
}

/// Checks the structural rules every registered path must satisfy.
///
/// # Errors
///
/// Returns [`RouteError::InvalidPath`] naming the violated rule.
pub fn validate(path: &str) -> Result<(), RouteError> {
    let reason = if !path.starts_with('/') {
        "must start with '/'"
    } else if path.contains(' ') {
        "must not contain spaces"
    } else if path.contains('?') {
        "must not contain '?'"
    } else if path.chars().any(char::is_control) {
        "must not contain control characters"
    } else {
        return Ok(());
    };
    Err(RouteError::InvalidPath {
        path: path.to_string(),
        reason,
    })
}

/// Strips trailing slashes, keeping the root path as `/`.
#[must_use]
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Concatenates a router prefix and a route path.
#[must_use]
pub fn join_prefix(prefix: &str, path: &str) -> String {
    if prefix.is_empty() {
        return path.to_string();
    }
    format!("{}{}", prefix.trim_end_matches('/'), path)
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}
