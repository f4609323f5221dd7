use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A value stamped onto a target record after a successful store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Size(u64),
}

impl FieldValue {
    pub fn empty() -> Self {
        Self::Text(String::new())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Size(_) => None,
        }
    }

    pub fn as_size(&self) -> Option<u64> {
        match self {
            Self::Size(size) => Some(*size),
            Self::Text(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Size(size) => write!(f, "{size}"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        Self::Size(value)
    }
}

/// Caller-owned structure that receives metadata by field name.
///
/// The saver only ever writes the field names it was configured with; it never
/// reads a record back. Implementations are free to ignore names they do not
/// know.
pub trait TargetRecord {
    fn set_field(&mut self, name: &str, value: FieldValue);
}

impl<T: TargetRecord + ?Sized> TargetRecord for &mut T {
    fn set_field(&mut self, name: &str, value: FieldValue) {
        (**self).set_field(name, value)
    }
}

/// Record that keeps every stamped field in a sorted map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapRecord {
    fields: BTreeMap<String, FieldValue>,
}

impl MapRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_text)
    }

    pub fn size(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(FieldValue::as_size)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl TargetRecord for MapRecord {
    fn set_field(&mut self, name: &str, value: FieldValue) {
        self.fields.insert(name.to_string(), value);
    }
}

impl TargetRecord for BTreeMap<String, FieldValue> {
    fn set_field(&mut self, name: &str, value: FieldValue) {
        self.insert(name.to_string(), value);
    }
}

/// Record that drops everything, for callers that only want the identifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRecord;

impl TargetRecord for NoRecord {
    fn set_field(&mut self, _name: &str, _value: FieldValue) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_record_overwrites_fields() {
        let mut record = MapRecord::new();
        record.set_field("kind", "s3".into());
        record.set_field("kind", FieldValue::empty());
        record.set_field("size", 12u64.into());

        assert_eq!(record.text("kind"), Some(""));
        assert_eq!(record.size("size"), Some(12));
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn map_record_serializes_flat() {
        let mut record = MapRecord::new();
        record.set_field("bucket", "uploads".into());
        record.set_field("size", 3u64.into());

        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"bucket":"uploads","size":3}"#);
    }
}
