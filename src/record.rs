use std::collections::BTreeMap;

#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};

/// A candidate row as seen by the evaluator: string-valued tags that make up
/// the series key, plus typed field values.
pub trait Record {
    fn tag(&self, key: &str) -> Option<&str>;

    fn field(&self, key: &str) -> Option<FieldValue<'_>>;
}

impl<R: Record + ?Sized> Record for &R {
    fn tag(&self, key: &str) -> Option<&str> {
        (**self).tag(key)
    }

    fn field(&self, key: &str) -> Option<FieldValue<'_>> {
        (**self).field(key)
    }
}

/// Borrowed view of a stored field value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    String(&'a str),
    Boolean(bool),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
}

/// Owned field value.
///
/// In JSON a field is a bare value; integers that fit `i64` are signed, larger
/// ones unsigned, and anything with a fraction or exponent is a float.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize), serde(untagged))]
pub enum Field {
    Boolean(bool),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    String(String),
}

impl Field {
    pub fn as_value(&self) -> FieldValue<'_> {
        match self {
            Field::Boolean(b) => FieldValue::Boolean(*b),
            Field::Integer(i) => FieldValue::Integer(*i),
            Field::Unsigned(u) => FieldValue::Unsigned(*u),
            Field::Float(f) => FieldValue::Float(*f),
            Field::String(s) => FieldValue::String(s),
        }
    }
}

impl From<&str> for Field {
    fn from(value: &str) -> Self {
        Field::String(value.to_owned())
    }
}

impl From<String> for Field {
    fn from(value: String) -> Self {
        Field::String(value)
    }
}

impl From<bool> for Field {
    fn from(value: bool) -> Self {
        Field::Boolean(value)
    }
}

impl From<i64> for Field {
    fn from(value: i64) -> Self {
        Field::Integer(value)
    }
}

impl From<u64> for Field {
    fn from(value: u64) -> Self {
        Field::Unsigned(value)
    }
}

impl From<f64> for Field {
    fn from(value: f64) -> Self {
        Field::Float(value)
    }
}

/// In-memory record backed by sorted maps
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
pub struct Row {
    #[cfg_attr(feature = "json", serde(default))]
    pub tags: BTreeMap<String, String>,
    #[cfg_attr(feature = "json", serde(default))]
    pub fields: BTreeMap<String, Field>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Field>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

impl Record for Row {
    fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    fn field(&self, key: &str) -> Option<FieldValue<'_>> {
        self.fields.get(key).map(Field::as_value)
    }
}
