//! The response envelope and its error records.

use crate::error::ErrorCode;
use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// `{"data": ..., "errors": [...], "extensions": ...}`.
///
/// `data` and `extensions` are kept as raw JSON; they are parsed only when
/// decoded into a target or bound to a destination.
#[derive(Debug, Default, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub data: Option<Box<RawValue>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub errors: Vec<ErrorRecord>,
    #[serde(default)]
    pub extensions: Option<Box<RawValue>>,
}

impl Envelope {
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// `data` as bytes; empty when absent or `null`.
    pub fn data_bytes(&self) -> Bytes {
        raw_bytes(self.data.as_deref()).unwrap_or_default()
    }

    pub fn extensions_bytes(&self) -> Option<Bytes> {
        raw_bytes(self.extensions.as_deref())
    }

    /// Parses `data` into a JSON tree.
    pub fn data_value(&self) -> Result<Option<Value>, serde_json::Error> {
        self.data
            .as_deref()
            .map(|raw| serde_json::from_str(raw.get()))
            .transpose()
    }

    pub fn extensions_value(&self) -> Result<Option<Value>, serde_json::Error> {
        self.extensions
            .as_deref()
            .map(|raw| serde_json::from_str(raw.get()))
            .transpose()
    }

    /// The protocol errors, if any.
    pub fn errors(&self) -> Option<Errors> {
        Errors::from_vec(self.errors.clone())
    }
}

fn raw_bytes(raw: Option<&RawValue>) -> Option<Bytes> {
    raw.map(|raw| Bytes::copy_from_slice(raw.get().as_bytes()))
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A position in the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

/// One step of an error path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Field(String),
}

impl From<String> for PathSegment {
    fn from(s: String) -> Self {
        Self::Field(s)
    }
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self {
        Self::Field(s.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => f.write_str(name),
            Self::Index(i) => write!(f, "{i}"),
        }
    }
}

type Cause = Arc<dyn StdError + Send + Sync>;

/// One entry of the `errors` list, or a record synthesized on the client.
#[derive(Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub message: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub locations: Vec<Location>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub path: Vec<PathSegment>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub extensions: IndexMap<String, Value>,
    #[serde(skip)]
    cause: Option<Cause>,
}

impl ErrorRecord {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: Vec::new(),
            extensions: IndexMap::new(),
            cause: None,
        }
    }

    /// A record carrying `extensions.code` and the error that caused it.
    pub fn from_cause<E>(code: ErrorCode, message: impl Into<String>, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let mut record = Self::new(message).with_code(code);
        record.cause = Some(Arc::new(cause));
        record
    }

    #[must_use]
    pub fn with_code(self, code: ErrorCode) -> Self {
        self.with_extension("code", Value::from(code.as_str()))
    }

    #[must_use]
    pub fn with_path(mut self, path: impl IntoIterator<Item = impl Into<PathSegment>>) -> Self {
        self.path = path.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_location(mut self, line: u32, column: u32) -> Self {
        self.locations.push(Location { line, column });
        self
    }

    #[must_use]
    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// `extensions.code`, when it is a string.
    pub fn code(&self) -> Option<&str> {
        self.extensions.get("code").and_then(Value::as_str)
    }
}

impl fmt::Debug for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorRecord")
            .field("message", &self.message)
            .field("locations", &self.locations)
            .field("path", &self.path)
            .field("extensions", &self.extensions)
            .field("cause", &self.cause.as_ref().map(ToString::to_string))
            .finish()
    }
}

/// `Message: m, Locations: [{Line:1 Column:2}], Extensions: map[k:v], Path: [a 0]`
impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message: {}, Locations: [", self.message)?;
        for (i, loc) in self.locations.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{{Line:{} Column:{}}}", loc.line, loc.column)?;
        }
        f.write_str("], Extensions: ")?;
        write_map(f, self.extensions.iter())?;
        f.write_str(", Path: [")?;
        for (i, segment) in self.path.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{segment}")?;
        }
        f.write_str("]")
    }
}

fn write_map<'a>(
    f: &mut fmt::Formatter<'_>,
    entries: impl Iterator<Item = (&'a String, &'a Value)>,
) -> fmt::Result {
    let mut entries: Vec<_> = entries.collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    f.write_str("map[")?;
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{key}:")?;
        write_value(f, value)?;
    }
    f.write_str("]")
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::Null => f.write_str("<nil>"),
        Value::Bool(b) => write!(f, "{b}"),
        Value::Number(n) => write!(f, "{n}"),
        Value::String(s) => f.write_str(s),
        Value::Array(items) => {
            f.write_str("[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(" ")?;
                }
                write_value(f, item)?;
            }
            f.write_str("]")
        }
        Value::Object(map) => write_map(f, map.iter()),
    }
}

impl StdError for ErrorRecord {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

/// A non-empty, ordered aggregate of [`ErrorRecord`]s.
#[derive(Debug, Clone)]
pub struct Errors(Vec<ErrorRecord>);

impl Errors {
    pub fn single(record: ErrorRecord) -> Self {
        Self(vec![record])
    }

    /// Returns `None` for an empty list.
    pub fn from_vec(records: Vec<ErrorRecord>) -> Option<Self> {
        if records.is_empty() {
            None
        } else {
            Some(Self(records))
        }
    }

    pub fn push(&mut self, record: ErrorRecord) {
        self.0.push(record);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> &ErrorRecord {
        &self.0[0]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ErrorRecord> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, ErrorRecord> {
        self.0.iter_mut()
    }

    pub fn into_vec(self) -> Vec<ErrorRecord> {
        self.0
    }

    /// Synthesized from a transport failure or a non-2xx status.
    pub fn is_request_error(&self) -> bool {
        self.0
            .iter()
            .any(|record| record.code() == Some(ErrorCode::RequestError.as_str()))
    }

    /// Reported by the server in the envelope.
    pub fn is_protocol_error(&self) -> bool {
        !self.is_request_error()
    }
}

impl std::ops::Deref for Errors {
    type Target = [ErrorRecord];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'a> IntoIterator for &'a Errors {
    type Item = &'a ErrorRecord;
    type IntoIter = std::slice::Iter<'a, ErrorRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for Errors {
    type Item = ErrorRecord;
    type IntoIter = std::vec::IntoIter<ErrorRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, record) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{record}")?;
        }
        Ok(())
    }
}

impl StdError for Errors {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.first().and_then(StdError::source)
    }
}
