//! Typed parameter schemas and lenient coercion.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParamType {
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "filepath")]
    FilePath,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "[string]")]
    StringList,
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "username")]
    Username,
}

impl ParamType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::FilePath => "filepath",
            Self::String => "string",
            Self::StringList => "[string]",
            Self::Text => "text",
            Self::Username => "username",
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared parameter of a command kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParamDesc {
    pub id: &'static str,
    pub title: &'static str,
    #[serde(rename = "type")]
    pub kind: ParamType,
}

impl ParamDesc {
    pub const fn new(id: &'static str, title: &'static str, kind: ParamType) -> Self {
        Self { id, title, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Bool(bool),
    String(String),
    List(Vec<String>),
}

impl ParamValue {
    /// Coerce a raw JSON value. Missing or wrong-typed values become the
    /// zero value of the declared type.
    fn coerce(kind: ParamType, raw: Option<&Value>) -> Self {
        match kind {
            ParamType::Bool => Self::Bool(raw.and_then(Value::as_bool).unwrap_or(false)),
            ParamType::FilePath | ParamType::String | ParamType::Text | ParamType::Username => {
                Self::String(raw.and_then(Value::as_str).unwrap_or_default().to_string())
            }
            ParamType::StringList => Self::List(
                raw.and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .map(|item| item.as_str().unwrap_or_default().to_string())
                            .collect()
                    })
                    .unwrap_or_default(),
            ),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Bool(b) => Value::Bool(*b),
            Self::String(s) => Value::String(s.clone()),
            Self::List(items) => Value::Array(items.iter().cloned().map(Value::String).collect()),
        }
    }
}

/// Parameters coerced against a schema. Every declared id is present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    /// Coerce `raw` against `schema`. Never fails; undeclared keys are dropped.
    pub fn coerce(schema: &[ParamDesc], raw: &Map<String, Value>) -> Self {
        Self(
            schema
                .iter()
                .map(|desc| (desc.id.to_string(), ParamValue::coerce(desc.kind, raw.get(desc.id))))
                .collect(),
        )
    }

    pub fn bool(&self, id: &str) -> bool {
        matches!(self.0.get(id), Some(ParamValue::Bool(true)))
    }

    pub fn string(&self, id: &str) -> &str {
        match self.0.get(id) {
            Some(ParamValue::String(s)) => s,
            _ => "",
        }
    }

    pub fn list(&self, id: &str) -> &[String] {
        match self.0.get(id) {
            Some(ParamValue::List(items)) => items,
            _ => &[],
        }
    }

    /// Typed parameters as stored in the tree
    pub fn to_map(&self) -> Map<String, Value> {
        self.0.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCHEMA: &[ParamDesc] = &[
        ParamDesc::new("purge", "Purge", ParamType::Bool),
        ParamDesc::new("path", "Path", ParamType::FilePath),
        ParamDesc::new("packages", "Packages", ParamType::StringList),
    ];

    fn raw(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_well_typed_values_are_kept() {
        let params = Params::coerce(
            SCHEMA,
            &raw(json!({"purge": true, "path": "/etc/x", "packages": ["a", "b"]})),
        );
        assert!(params.bool("purge"));
        assert_eq!(params.string("path"), "/etc/x");
        assert_eq!(params.list("packages"), ["a", "b"]);
    }

    #[test]
    fn test_missing_and_wrong_types_become_zero_values() {
        let params = Params::coerce(
            SCHEMA,
            &raw(json!({"purge": "yes", "path": 3, "packages": ["a", 1, null], "extra": 1})),
        );
        assert!(!params.bool("purge"));
        assert_eq!(params.string("path"), "");
        assert_eq!(params.list("packages"), ["a", "", ""]);

        let empty = Params::coerce(SCHEMA, &Map::new());
        assert_eq!(empty.list("packages"), Vec::<String>::new().as_slice());
        assert_eq!(
            Value::Object(empty.to_map()),
            json!({"purge": false, "path": "", "packages": []})
        );
    }

    #[test]
    fn test_param_desc_wire_shape() {
        assert_eq!(
            serde_json::to_value(SCHEMA[2]).unwrap(),
            json!({"id": "packages", "title": "Packages", "type": "[string]"})
        );
    }
}
