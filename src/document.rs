//! Structured documents for generic cluster resources.
//!
//! Custom resources such as operator subscriptions or routes are fetched as
//! arbitrary nested JSON. Observers never deserialize them into a schema;
//! they read individual fields through [`Document::lookup`], which reports
//! a missing or mistyped field instead of panicking.

use std::fmt;

use serde_json::Value;

/// Result of looking up a nested field.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// The field exists and has the requested type.
    Found(T),
    /// Some segment of the path does not exist.
    Missing { path: String },
    /// A segment exists but holds a different JSON type than required.
    WrongType {
        path: String,
        expected: &'static str,
    },
}

impl<T> Lookup<T> {
    /// Convert into an `Option`, discarding why the field was unavailable.
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(v) => Some(v),
            Lookup::Missing { .. } | Lookup::WrongType { .. } => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(v) => Lookup::Found(f(v)),
            Lookup::Missing { path } => Lookup::Missing { path },
            Lookup::WrongType { path, expected } => Lookup::WrongType { path, expected },
        }
    }
}

impl<T> fmt::Display for Lookup<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookup::Found(_) => write!(f, "found"),
            Lookup::Missing { path } => write!(f, "field {} is missing", path),
            Lookup::WrongType { path, expected } => {
                write!(f, "field {} is not a {}", path, expected)
            }
        }
    }
}

/// A generic resource document (arbitrary nested mapping).
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    root: Value,
}

impl Document {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    /// The underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.root
    }

    /// Resource name from `metadata.name`, if present.
    pub fn name(&self) -> Option<&str> {
        self.str_at(&["metadata", "name"]).found()
    }

    /// Walk `path` through nested objects.
    ///
    /// Every segment except the last must resolve to an object; anything else
    /// is reported as [`Lookup::WrongType`]. An explicit JSON `null` counts as
    /// missing.
    pub fn lookup(&self, path: &[&str]) -> Lookup<&Value> {
        let mut current = &self.root;
        for (depth, segment) in path.iter().enumerate() {
            let Value::Object(map) = current else {
                return Lookup::WrongType {
                    path: join_path(path.get(..depth).unwrap_or_default()),
                    expected: "object",
                };
            };
            match map.get(*segment) {
                Some(Value::Null) | None => {
                    return Lookup::Missing {
                        path: join_path(path.get(..=depth).unwrap_or(path)),
                    };
                }
                Some(next) => current = next,
            }
        }
        Lookup::Found(current)
    }

    /// Look up a string field.
    pub fn str_at(&self, path: &[&str]) -> Lookup<&str> {
        match self.lookup(path) {
            Lookup::Found(Value::String(s)) => Lookup::Found(s.as_str()),
            Lookup::Found(_) => Lookup::WrongType {
                path: join_path(path),
                expected: "string",
            },
            other => other.map(|_| ""),
        }
    }

    /// Look up an array field.
    pub fn array_at(&self, path: &[&str]) -> Lookup<&[Value]> {
        match self.lookup(path) {
            Lookup::Found(Value::Array(items)) => Lookup::Found(items.as_slice()),
            Lookup::Found(_) => Lookup::WrongType {
                path: join_path(path),
                expected: "array",
            },
            other => other.map(|_| &[][..]),
        }
    }
}

impl From<Value> for Document {
    fn from(root: Value) -> Self {
        Self::new(root)
    }
}

fn join_path(segments: &[&str]) -> String {
    if segments.is_empty() {
        ".".to_string()
    } else {
        segments.join(".")
    }
}
