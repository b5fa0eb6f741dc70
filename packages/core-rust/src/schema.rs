//! Schema validation capability.
//!
//! Actions treat validation as an opaque capability: a [`Schema`] either
//! returns the parsed value or a list of [`Issue`]s. [`ObjectSchema`] is a
//! small built-in validator for JSON objects; any closure with the right
//! shape can stand in via [`FnSchema`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// A single validation failure. An empty `path` denotes a whole-object issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub path: Vec<String>,
    pub message: String,
}

impl Issue {
    /// Issue at `path`. An empty path is a form-level issue.
    #[must_use]
    pub fn new(path: Vec<String>, message: impl Into<String>) -> Self {
        Self {
            path,
            message: message.into(),
        }
    }

    /// Issue that applies to the value as a whole.
    #[must_use]
    pub fn form(message: impl Into<String>) -> Self {
        Self::new(Vec::new(), message)
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path.join("."), self.message)
        }
    }
}

/// Validates a value, returning the parsed (possibly transformed) value.
#[async_trait]
pub trait Schema: Send + Sync {
    async fn validate(&self, value: Value) -> Result<Value, Vec<Issue>>;
}

// ---------------------------------------------------------------------------
// FnSchema
// ---------------------------------------------------------------------------

/// Adapts a synchronous closure into a [`Schema`].
pub struct FnSchema<F>(pub F);

#[async_trait]
impl<F> Schema for FnSchema<F>
where
    F: Fn(Value) -> Result<Value, Vec<Issue>> + Send + Sync,
{
    async fn validate(&self, value: Value) -> Result<Value, Vec<Issue>> {
        (self.0)(value)
    }
}

// ---------------------------------------------------------------------------
// ObjectSchema
// ---------------------------------------------------------------------------

/// Expected type of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldKind {
    Any,
    String,
    Number,
    Integer,
    Boolean,
    Array(Box<FieldKind>),
    Object(ObjectSchema),
}

impl FieldKind {
    fn describe(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }
}

/// Single field definition within an [`ObjectSchema`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    /// Whether the field must be present (and non-null).
    pub required: bool,
    /// Parse string values into numbers/booleans before checking the kind.
    pub coerce: bool,
}

impl FieldDef {
    /// A required field without coercion.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            coerce: false,
        }
    }

    /// Allows the field to be absent or `null`.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Accepts string forms of numbers and booleans, as sent by query strings and forms.
    #[must_use]
    pub fn coerce(mut self) -> Self {
        self.coerce = true;
        self
    }
}

/// Validator for JSON objects. Unknown keys are stripped from the output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectSchema {
    pub fields: Vec<FieldDef>,
}

impl ObjectSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field definition.
    #[must_use]
    pub fn field(mut self, def: FieldDef) -> Self {
        self.fields.push(def);
        self
    }

    /// Shorthand for a required field of the given kind.
    #[must_use]
    pub fn required(self, name: &str, kind: FieldKind) -> Self {
        self.field(FieldDef::new(name, kind))
    }

    /// Synchronous validation entry point, also used for nested objects.
    ///
    /// # Errors
    ///
    /// Returns every issue found; validation does not stop at the first.
    pub fn check(&self, value: &Value) -> Result<Value, Vec<Issue>> {
        let mut issues = Vec::new();
        let out = check_object(self, value, &[], &mut issues);
        if issues.is_empty() {
            Ok(out.unwrap_or(Value::Null))
        } else {
            Err(issues)
        }
    }
}

#[async_trait]
impl Schema for ObjectSchema {
    async fn validate(&self, value: Value) -> Result<Value, Vec<Issue>> {
        self.check(&value)
    }
}

fn check_object(
    schema: &ObjectSchema,
    value: &Value,
    path: &[String],
    issues: &mut Vec<Issue>,
) -> Option<Value> {
    let Value::Object(obj) = value else {
        issues.push(Issue::new(
            path.to_vec(),
            format!("expected object, received {}", type_name(value)),
        ));
        return None;
    };

    let mut out = Map::new();
    for def in &schema.fields {
        let mut field_path = path.to_vec();
        field_path.push(def.name.clone());

        match obj.get(&def.name) {
            None | Some(Value::Null) => {
                if def.required {
                    issues.push(Issue::new(field_path, "required"));
                }
            }
            Some(v) => {
                if let Some(parsed) = check_kind(&def.kind, v, def.coerce, &field_path, issues) {
                    out.insert(def.name.clone(), parsed);
                }
            }
        }
    }
    Some(Value::Object(out))
}

fn check_kind(
    kind: &FieldKind,
    value: &Value,
    coerce: bool,
    path: &[String],
    issues: &mut Vec<Issue>,
) -> Option<Value> {
    let value = if coerce {
        coerce_scalar(kind, value)
    } else {
        value.clone()
    };

    let ok = match (kind, &value) {
        (FieldKind::Any, _)
        | (FieldKind::String, Value::String(_))
        | (FieldKind::Number, Value::Number(_))
        | (FieldKind::Boolean, Value::Bool(_)) => true,
        (FieldKind::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
        (FieldKind::Array(inner), Value::Array(items)) => {
            let mut parsed = Vec::with_capacity(items.len());
            let before = issues.len();
            for (i, item) in items.iter().enumerate() {
                let mut item_path = path.to_vec();
                item_path.push(i.to_string());
                if let Some(v) = check_kind(inner, item, coerce, &item_path, issues) {
                    parsed.push(v);
                }
            }
            return (issues.len() == before).then_some(Value::Array(parsed));
        }
        (FieldKind::Object(nested), v) => return check_object(nested, v, path, issues),
        _ => false,
    };

    if ok {
        Some(value)
    } else {
        issues.push(Issue::new(
            path.to_vec(),
            format!("expected {}, received {}", kind.describe(), type_name(&value)),
        ));
        None
    }
}

fn coerce_scalar(kind: &FieldKind, value: &Value) -> Value {
    let Value::String(s) = value else {
        return value.clone();
    };
    let trimmed = s.trim();
    let coerced = match kind {
        FieldKind::Integer => trimmed.parse::<i64>().ok().map(Value::from),
        FieldKind::Number => trimmed
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(|n| {
                // Keep integral strings integral so `Integer`-shaped consumers deserialize them.
                trimmed.parse::<i64>().map_or(Value::Number(n), Value::from)
            }),
        FieldKind::Boolean => match trimmed {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    };
    coerced.unwrap_or_else(|| value.clone())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
