//! `@variable` placeholder substitution.
//!
//! Paths, bodies, header values and credentials may carry `@name`
//! placeholders. Each is resolved against the site map's variable
//! definitions, either a uniform pick from a list or a uniform integer from an
//! inclusive range. A distinct name resolves once per call, so a template
//! mentioning `@id` twice sees the same value twice.

use std::fmt;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::entropy::{Entropy, choose};

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([A-Za-z0-9_]+)").expect("Invalid regex pattern provided"));

/// Errors produced when resolving a [`Variable`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A list variable has no members.
    #[error("list variable has no values")]
    EmptyList,
    /// A range variable is not exactly two integers.
    #[error("range variable must be exactly two integers, got {0}")]
    MalformedRange(String),
    /// A range variable has its bounds reversed.
    #[error("range variable lower bound {lo} exceeds upper bound {hi}")]
    InvertedRange {
        /// Declared lower bound
        lo: i64,
        /// Declared upper bound
        hi: i64,
    },
}

/// The shape of a [`Variable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    /// Uniform pick among the declared values
    List,
    /// Uniform integer in `[lo, hi]`
    Range,
}

impl VariableKind {
    /// Parse a kind name, ignoring case.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "list" => Some(Self::List),
            "range" => Some(Self::Range),
            _ => None,
        }
    }
}

impl fmt::Display for VariableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List => write!(f, "list"),
            Self::Range => write!(f, "range"),
        }
    }
}

/// A named source of placeholder values.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    kind: VariableKind,
    values: Vec<Value>,
}

impl Variable {
    /// Create a new, unchecked, [`Variable`].
    #[must_use]
    pub fn new(kind: VariableKind, values: Vec<Value>) -> Self {
        Self { kind, values }
    }

    /// Confirm this variable can resolve.
    ///
    /// # Errors
    ///
    /// Returns an error if a list is empty or a range is not two ordered
    /// integers.
    pub fn check(&self) -> Result<(), Error> {
        match self.kind {
            VariableKind::List if self.values.is_empty() => Err(Error::EmptyList),
            VariableKind::List => Ok(()),
            VariableKind::Range => self.bounds().map(|_| ()),
        }
    }

    fn bounds(&self) -> Result<(i64, i64), Error> {
        let malformed = || Error::MalformedRange(Value::Array(self.values.clone()).to_string());
        let [lo, hi] = self.values.as_slice() else {
            return Err(malformed());
        };
        let (Some(lo), Some(hi)) = (lo.as_i64(), hi.as_i64()) else {
            return Err(malformed());
        };
        if lo > hi {
            return Err(Error::InvertedRange { lo, hi });
        }
        Ok((lo, hi))
    }

    /// Draw one value.
    ///
    /// # Errors
    ///
    /// See [`Variable::check`].
    pub fn resolve<E>(&self, entropy: &mut E) -> Result<Value, Error>
    where
        E: Entropy + ?Sized,
    {
        match self.kind {
            VariableKind::List => choose(entropy, &self.values)
                .cloned()
                .ok_or(Error::EmptyList),
            VariableKind::Range => {
                let (lo, hi) = self.bounds()?;
                Ok(Value::from(entropy.integer(lo, hi)))
            }
        }
    }
}

/// The variables declared by a site map, keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variables {
    inner: FxHashMap<String, Variable>,
}

impl FromIterator<(String, Variable)> for Variables {
    fn from_iter<T: IntoIterator<Item = (String, Variable)>>(iter: T) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

impl Variables {
    /// Look up a variable by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.inner.get(name)
    }

    /// Replace every `@name` placeholder in `text`.
    ///
    /// Unknown names are left in place with a warning. Names whose
    /// definition cannot resolve are left in place with an error. Neither
    /// stops the substitution of other placeholders.
    pub fn substitute<E>(&self, text: &str, entropy: &mut E) -> String
    where
        E: Entropy + ?Sized,
    {
        if self.inner.is_empty() || !text.contains('@') {
            return text.to_string();
        }

        let mut resolved: FxHashMap<String, Option<String>> = FxHashMap::default();
        PLACEHOLDER
            .replace_all(text, |caps: &Captures<'_>| {
                let placeholder = &caps[0];
                let name = &caps[1];
                let value = resolved
                    .entry(name.to_string())
                    .or_insert_with(|| self.render(name, entropy));
                value
                    .clone()
                    .unwrap_or_else(|| placeholder.to_string())
            })
            .into_owned()
    }

    fn render<E>(&self, name: &str, entropy: &mut E) -> Option<String>
    where
        E: Entropy + ?Sized,
    {
        let Some(variable) = self.get(name) else {
            warn!("Placeholder @{name} has no matching variable definition");
            return None;
        };
        match variable.resolve(entropy) {
            Ok(value) => {
                let raw = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                let encoded = encode(&raw);
                if encoded != raw {
                    debug!("Variable @{name} value {raw:?} encoded to {encoded:?}");
                }
                Some(encoded)
            }
            Err(err) => {
                error!("Invalid {kind} definition for variable @{name}: {err}", kind = variable.kind);
                None
            }
        }
    }

    /// Substitute every string leaf of `value`, keeping its shape. Object
    /// keys are left untouched.
    pub fn substitute_json<E>(&self, value: &Value, entropy: &mut E) -> Value
    where
        E: Entropy + ?Sized,
    {
        match value {
            Value::String(s) => Value::String(self.substitute(s, entropy)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.substitute_json(item, entropy))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.substitute_json(v, entropy)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

fn is_unreserved(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '~' | '-')
}

fn starts_with_escape(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() >= 3
        && bytes[0] == b'%'
        && bytes[1].is_ascii_hexdigit()
        && bytes[2].is_ascii_hexdigit()
}

/// Percent-encode `value` unless it is made only of unreserved characters or
/// already begins with a `%XX` escape.
fn encode(value: &str) -> String {
    if value.chars().all(is_unreserved) || starts_with_escape(value) {
        value.to_string()
    } else {
        urlencoding::encode(value).into_owned()
    }
}
