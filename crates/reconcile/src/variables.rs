//! Placeholder substitution.
//!
//! Variables map a token such as `<hostname>` to a value. Commands keep
//! their parameters as templates and resolve them against the current
//! snapshot every time they compute a target.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mapping from placeholder token to value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables(BTreeMap<String, String>);

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Placeholder token for a variable name
    pub fn token(name: &str) -> String {
        format!("<{name}>")
    }

    /// Define `<name>` as `value`.
    pub fn define(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(Self::token(name), value.into());
    }

    /// Insert a raw token. Unlike [`define`](Self::define) the key is used as is.
    pub fn insert(&mut self, token: impl Into<String>, value: impl Into<String>) {
        self.0.insert(token.into(), value.into());
    }

    /// Value of `<name>`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&Self::token(name)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Substitute every known token in one left-to-right pass.
    ///
    /// Substituted values are copied verbatim: a token appearing inside a
    /// value is not expanded again. When several tokens match at the same
    /// position the longest one wins.
    pub fn replace(&self, text: &str) -> String {
        if self.0.is_empty() {
            return text.to_string();
        }

        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while !rest.is_empty() {
            let matched = self
                .0
                .iter()
                .filter(|(token, _)| !token.is_empty() && rest.starts_with(token.as_str()))
                .max_by_key(|(token, _)| token.len());

            if let Some((token, value)) = matched {
                out.push_str(value);
                rest = &rest[token.len()..];
            } else {
                let mut chars = rest.chars();
                if let Some(c) = chars.next() {
                    out.push(c);
                }
                rest = chars.as_str();
            }
        }
        out
    }

    /// [`replace`](Self::replace) applied to every element
    pub fn replace_all(&self, items: &[String]) -> Vec<String> {
        items.iter().map(|item| self.replace(item)).collect()
    }

    /// Make this snapshot equal to `other`, reporting whether anything
    /// was added, removed or changed.
    pub fn update(&mut self, other: &Variables) -> bool {
        if self.0 == other.0 {
            return false;
        }
        self.0.clone_from(&other.0);
        true
    }

    /// Merge `other` into this snapshot, overriding existing tokens.
    pub fn extend(&mut self, other: &Variables) {
        for (token, value) in &other.0 {
            self.0.insert(token.clone(), value.clone());
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Variables
where
    K: Into<String>,
    V: Into<String>,
{
    /// Build from raw tokens
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A host-level variable, seeded once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalVariable {
    pub name: String,
    pub description: String,
    pub value: String,
}

impl GlobalVariable {
    pub fn new(name: &str, description: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            value: value.into(),
        }
    }
}

/// Snapshot holding every global variable
pub fn globals_snapshot(globals: &[GlobalVariable]) -> Variables {
    let mut vars = Variables::new();
    for global in globals {
        vars.define(&global.name, global.value.clone());
    }
    vars
}
