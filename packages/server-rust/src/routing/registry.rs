//! Route registry builder with construction-time conflict detection.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use actionkit_core::SharedAction;
use http::Method;
use tracing::debug;

use super::metadata::RouteMetadata;
use super::path::{join_prefix, PathTemplate};
use super::RouteError;

/// Methods registered by [`RouteRegistry::all`].
pub const ALL_METHODS: [Method; 5] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::PATCH,
    Method::DELETE,
];

// ---------------------------------------------------------------------------
// RouteEntry
// ---------------------------------------------------------------------------

/// One registered route. Cloning shares the action.
#[derive(Clone)]
pub struct RouteEntry {
    pub method: Method,
    pub template: PathTemplate,
    pub action: SharedAction,
    pub metadata: RouteMetadata,
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteEntry")
            .field("method", &self.method)
            .field("path", &self.template.as_str())
            .field("action", &self.action.name())
            .finish_non_exhaustive()
    }
}

/// A request resolved to a route.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub entry: &'a RouteEntry,
    pub params: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// RouteRegistry
// ---------------------------------------------------------------------------

/// Ordered set of routes, unique by `(method, canonical path)`.
///
/// Set the prefix and defaults before registering routes; both apply at
/// registration time.
#[derive(Debug, Clone, Default)]
pub struct RouteRegistry {
    prefix: String,
    defaults: RouteMetadata,
    entries: Vec<RouteEntry>,
    /// `(method, canonical path)` -> path as first registered.
    keys: HashMap<(Method, String), String>,
}

impl RouteRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// String-concatenated before every path registered afterwards.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Metadata merged under every route's own metadata.
    #[must_use]
    pub fn with_defaults(mut self, defaults: RouteMetadata) -> Self {
        self.defaults = defaults;
        self
    }

    /// Registers `action` for `method` at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidPath`] for a malformed path and
    /// [`RouteError::Duplicate`] when a structurally equal route exists.
    pub fn route(
        mut self,
        method: Method,
        path: &str,
        action: SharedAction,
        metadata: Option<RouteMetadata>,
    ) -> Result<Self, RouteError> {
        let template = PathTemplate::parse(&join_prefix(&self.prefix, path))?;
        let metadata = metadata.unwrap_or_default().merged_over(&self.defaults);
        self.insert(RouteEntry {
            method,
            template,
            action,
            metadata,
        })?;
        Ok(self)
    }

    /// # Errors
    ///
    /// See [`route`](Self::route).
    pub fn get(self, path: &str, action: SharedAction) -> Result<Self, RouteError> {
        self.route(Method::GET, path, action, None)
    }

    /// # Errors
    ///
    /// See [`route`](Self::route).
    pub fn post(self, path: &str, action: SharedAction) -> Result<Self, RouteError> {
        self.route(Method::POST, path, action, None)
    }

    /// # Errors
    ///
    /// See [`route`](Self::route).
    pub fn put(self, path: &str, action: SharedAction) -> Result<Self, RouteError> {
        self.route(Method::PUT, path, action, None)
    }

    /// # Errors
    ///
    /// See [`route`](Self::route).
    pub fn patch(self, path: &str, action: SharedAction) -> Result<Self, RouteError> {
        self.route(Method::PATCH, path, action, None)
    }

    /// # Errors
    ///
    /// See [`route`](Self::route).
    pub fn delete(self, path: &str, action: SharedAction) -> Result<Self, RouteError> {
        self.route(Method::DELETE, path, action, None)
    }

    /// Registers `action` under GET, POST, PUT, PATCH and DELETE.
    ///
    /// # Errors
    ///
    /// See [`route`](Self::route).
    pub fn all(self, path: &str, action: SharedAction) -> Result<Self, RouteError> {
        ALL_METHODS.into_iter().try_fold(self, |registry, method| {
            registry.route(method, path, SharedAction::clone(&action), None)
        })
    }

    /// Copies every route of `other` into this registry. Entries keep their
    /// own prefix and metadata.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::Duplicate`] if any copied route collides.
    pub fn extend(mut self, other: &RouteRegistry) -> Result<Self, RouteError> {
        for entry in &other.entries {
            self.insert(entry.clone())?;
        }
        Ok(self)
    }

    /// Builds a registry holding the routes of every registry in order.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::Duplicate`] on the first collision across sets.
    pub fn merged<'a>(
        registries: impl IntoIterator<Item = &'a RouteRegistry>,
    ) -> Result<Self, RouteError> {
        registries
            .into_iter()
            .try_fold(Self::new(), |merged, other| merged.extend(other))
    }

    fn insert(&mut self, entry: RouteEntry) -> Result<(), RouteError> {
        let key = (entry.method.clone(), entry.template.canonical().to_string());
        if let Some(existing) = self.keys.get(&key) {
            return Err(RouteError::Duplicate {
                method: entry.method,
                path: entry.template.as_str().to_string(),
                existing: existing.clone(),
            });
        }
        debug!(
            method = %entry.method,
            path = entry.template.as_str(),
            action = entry.action.name(),
            "route registered"
        );
        self.keys.insert(key, entry.template.as_str().to_string());
        self.entries.push(entry);
        Ok(())
    }

    /// First route whose method and path structurally match.
    #[must_use]
    pub fn find(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        self.entries
            .iter()
            .filter(|e| e.method == *method)
            .find_map(|entry| {
                entry
                    .template
                    .matches(path)
                    .map(|params| RouteMatch { entry, params })
            })
    }

    /// Routes in registration order.
    #[must_use]
    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
