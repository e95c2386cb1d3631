//! Typed property values
//!
//! A desired property is either concrete JSON or something that becomes
//! concrete later: a configuration key (resolved when the graph is built) or
//! another resource's output attribute (resolved when that resource has been
//! applied).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Concrete property or output values, keyed by attribute name.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Declared properties of a resource, keyed by property name.
pub type Properties = BTreeMap<String, Value>;

/// Reference to an output attribute of another resource
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    pub resource: String,
    pub attribute: String,
}

impl OutputRef {
    pub fn new(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.attribute)
    }
}

/// A desired property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Concrete JSON value
    Literal(serde_json::Value),
    /// Required configuration key
    Config(String),
    /// Output attribute of another resource
    Output(OutputRef),
    /// String interpolation of the parts
    Concat(Vec<Value>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

/// Why a value could not be made concrete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    /// The referenced output is not known (yet)
    Output(OutputRef),
    /// A configuration key survived graph building
    Config(String),
    /// A concat part is not a scalar
    NotAString(String),
}

impl fmt::Display for Unresolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Output(r) => write!(f, "output {r} is not known"),
            Self::Config(key) => write!(f, "configuration key '{key}' was never resolved"),
            Self::NotAString(v) => write!(f, "cannot interpolate non-scalar value {v}"),
        }
    }
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Self::Literal(serde_json::Value::String(s.into()))
    }

    pub fn bool(b: bool) -> Self {
        Self::Literal(serde_json::Value::Bool(b))
    }

    pub fn config(key: impl Into<String>) -> Self {
        Self::Config(key.into())
    }

    pub fn output(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self::Output(OutputRef::new(resource, attribute))
    }

    pub fn concat(parts: impl IntoIterator<Item = Value>) -> Self {
        Self::Concat(parts.into_iter().collect())
    }

    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Collect every output reference contained in this value.
    pub fn output_refs(&self, into: &mut BTreeSet<OutputRef>) {
        match self {
            Self::Output(r) => {
                into.insert(r.clone());
            }
            Self::Concat(parts) | Self::List(parts) => {
                for part in parts {
                    part.output_refs(into);
                }
            }
            Self::Map(entries) => {
                for value in entries.values() {
                    value.output_refs(into);
                }
            }
            Self::Literal(_) | Self::Config(_) => {}
        }
    }

    /// Replace configuration keys with their values.
    ///
    /// Returns the first key that has no value.
    pub fn substitute_config(
        self,
        lookup: &dyn Fn(&str) -> Option<serde_json::Value>,
    ) -> Result<Self, String> {
        Ok(match self {
            Self::Config(key) => match lookup(&key) {
                Some(v) => Self::Literal(v),
                None => return Err(key),
            },
            Self::Concat(parts) => Self::Concat(
                parts
                    .into_iter()
                    .map(|p| p.substitute_config(lookup))
                    .collect::<Result<_, _>>()?,
            ),
            Self::List(items) => Self::List(
                items
                    .into_iter()
                    .map(|p| p.substitute_config(lookup))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Map(entries) => Self::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| Ok((k, v.substitute_config(lookup)?)))
                    .collect::<Result<_, String>>()?,
            ),
            other => other,
        })
    }

    /// Produce a concrete JSON value, looking up outputs with `outputs`.
    pub fn resolve(
        &self,
        outputs: &dyn Fn(&OutputRef) -> Option<serde_json::Value>,
    ) -> Result<serde_json::Value, Unresolved> {
        match self {
            Self::Literal(v) => Ok(v.clone()),
            Self::Config(key) => Err(Unresolved::Config(key.clone())),
            Self::Output(r) => outputs(r).ok_or_else(|| Unresolved::Output(r.clone())),
            Self::Concat(parts) => {
                let mut joined = String::new();
                for part in parts {
                    match part.resolve(outputs)? {
                        serde_json::Value::String(s) => joined.push_str(&s),
                        v @ (serde_json::Value::Number(_) | serde_json::Value::Bool(_)) => {
                            joined.push_str(&v.to_string());
                        }
                        other => return Err(Unresolved::NotAString(other.to_string())),
                    }
                }
                Ok(serde_json::Value::String(joined))
            }
            Self::List(items) => items
                .iter()
                .map(|v| v.resolve(outputs))
                .collect::<Result<Vec<_>, _>>()
                .map(serde_json::Value::Array),
            Self::Map(entries) => {
                let mut object = serde_json::Map::new();
                for (k, v) in entries {
                    object.insert(k.clone(), v.resolve(outputs)?);
                }
                Ok(serde_json::Value::Object(object))
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::string(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::bool(b)
    }
}

impl From<OutputRef> for Value {
    fn from(r: OutputRef) -> Self {
        Self::Output(r)
    }
}

/// Resolve every property of a resource.
pub fn resolve_properties(
    properties: &Properties,
    outputs: &dyn Fn(&OutputRef) -> Option<serde_json::Value>,
) -> Result<Attributes, Unresolved> {
    properties
        .iter()
        .map(|(k, v)| Ok((k.clone(), v.resolve(outputs)?)))
        .collect()
}
