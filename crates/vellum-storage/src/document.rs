//! Self-describing document model and its on-disk codec.
//!
//! A document is an ordered mapping from string keys to tagged values.
//! The encoded form is a length-prefixed, type-tagged byte stream:
//!
//! ```text
//! total_size: i32 | element* | 0x00
//! element = tag: u8 | key (NUL-terminated) | payload
//! ```
//!
//! The total size covers the whole stream including itself and is
//! back-patched after serialization. All integers are little-endian.

use bytes::BufMut;
use std::cmp::Ordering;
use vellum_common::{Result, VellumError};

/// Type tag for a 64-bit IEEE-754 float.
pub const TAG_DOUBLE: u8 = 0x01;
/// Type tag for a UTF-8 string.
pub const TAG_STRING: u8 = 0x02;
/// Type tag for a nested document.
pub const TAG_DOCUMENT: u8 = 0x03;
/// Type tag for a boolean.
pub const TAG_BOOLEAN: u8 = 0x08;
/// Type tag for null.
pub const TAG_NULL: u8 = 0x0A;
/// Type tag for a 32-bit signed integer.
pub const TAG_INT32: u8 = 0x10;
/// Type tag for a 64-bit signed integer.
pub const TAG_INT64: u8 = 0x12;

/// A tagged document value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Double(f64),
    String(String),
    Document(Box<Document>),
    Boolean(bool),
    Null,
    Int32(i32),
    Int64(i64),
}

impl Value {
    /// Returns the on-disk type tag of this value.
    pub fn type_tag(&self) -> u8 {
        match self {
            Value::Double(_) => TAG_DOUBLE,
            Value::String(_) => TAG_STRING,
            Value::Document(_) => TAG_DOCUMENT,
            Value::Boolean(_) => TAG_BOOLEAN,
            Value::Null => TAG_NULL,
            Value::Int32(_) => TAG_INT32,
            Value::Int64(_) => TAG_INT64,
        }
    }

    /// Returns the string content, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// String form of this value as an index key: strings index as-is,
    /// 32-bit ints in decimal. Other kinds are not indexable.
    pub fn index_key(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Int32(v) => Some(v.to_string()),
            _ => None,
        }
    }

    /// Orders two values of the same kind. Mixed kinds, booleans, nulls,
    /// and nested documents have no ordering.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Int32(a), Value::Int32(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

/// An ordered string-keyed document. Keys are unique; setting an existing
/// key overwrites in place, preserving its position.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    elements: Vec<(String, Value)>,
}

impl Document {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, overwriting an existing entry.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.elements.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.elements.push((key, value)),
        }
    }

    /// Returns the value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.elements.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Iterates elements in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.elements.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Merges `other` into self, overwriting matching keys.
    pub fn merge(&mut self, other: &Document) {
        for (key, value) in other.iter() {
            self.set(key, value.clone());
        }
    }

    /// Serializes to the self-delimiting byte stream.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.put_i32_le(0); // back-patched below

        for (key, value) in &self.elements {
            buf.put_u8(value.type_tag());
            buf.put_slice(key.as_bytes());
            buf.put_u8(0);

            match value {
                Value::Double(v) => buf.put_f64_le(*v),
                Value::String(s) => {
                    buf.put_i32_le(s.len() as i32 + 1);
                    buf.put_slice(s.as_bytes());
                    buf.put_u8(0);
                }
                Value::Document(doc) => buf.put_slice(&doc.to_bytes()),
                Value::Boolean(v) => buf.put_u8(*v as u8),
                Value::Null => {}
                Value::Int32(v) => buf.put_i32_le(*v),
                Value::Int64(v) => buf.put_i64_le(*v),
            }
        }

        buf.put_u8(0);
        let total = buf.len() as i32;
        buf[0..4].copy_from_slice(&total.to_le_bytes());
        buf
    }

    /// Deserializes from a byte stream produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(data: &[u8]) -> Result<Document> {
        let mut offset = 0usize;
        let doc_size = read_i32(data, &mut offset)? as usize;

        if doc_size < 5 || doc_size > data.len() {
            return Err(VellumError::DocumentCorrupted(format!(
                "size field {} out of range for {} bytes",
                doc_size,
                data.len()
            )));
        }

        let mut doc = Document::new();
        while offset < doc_size - 1 {
            let tag = read_u8(data, &mut offset)?;
            if tag == 0 {
                break;
            }

            let key = read_cstring(data, doc_size, &mut offset)?;
            let value = match tag {
                TAG_DOUBLE => Value::Double(read_f64(data, &mut offset)?),
                TAG_STRING => Value::String(read_string(data, doc_size, &mut offset)?),
                TAG_DOCUMENT => {
                    let mut peek = offset;
                    let sub_len = read_i32(data, &mut peek)? as usize;
                    if sub_len < 5 || offset + sub_len > doc_size {
                        return Err(VellumError::DocumentCorrupted(
                            "nested document size out of range".to_string(),
                        ));
                    }
                    let sub = Document::from_bytes(&data[offset..offset + sub_len])?;
                    offset += sub_len;
                    Value::Document(Box::new(sub))
                }
                TAG_BOOLEAN => Value::Boolean(read_u8(data, &mut offset)? == 0x01),
                TAG_NULL => Value::Null,
                TAG_INT32 => Value::Int32(read_i32(data, &mut offset)?),
                TAG_INT64 => Value::Int64(read_i64(data, &mut offset)?),
                other => return Err(VellumError::UnknownTypeTag(other)),
            };
            doc.elements.push((key, value));
        }

        Ok(doc)
    }
}

fn read_u8(data: &[u8], offset: &mut usize) -> Result<u8> {
    let b = *data
        .get(*offset)
        .ok_or_else(|| VellumError::DocumentCorrupted("unexpected end of stream".to_string()))?;
    *offset += 1;
    Ok(b)
}

fn read_i32(data: &[u8], offset: &mut usize) -> Result<i32> {
    let end = *offset + 4;
    let bytes = data
        .get(*offset..end)
        .ok_or_else(|| VellumError::DocumentCorrupted("truncated i32".to_string()))?;
    *offset = end;
    Ok(i32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_i64(data: &[u8], offset: &mut usize) -> Result<i64> {
    let end = *offset + 8;
    let bytes = data
        .get(*offset..end)
        .ok_or_else(|| VellumError::DocumentCorrupted("truncated i64".to_string()))?;
    *offset = end;
    Ok(i64::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_f64(data: &[u8], offset: &mut usize) -> Result<f64> {
    let end = *offset + 8;
    let bytes = data
        .get(*offset..end)
        .ok_or_else(|| VellumError::DocumentCorrupted("truncated f64".to_string()))?;
    *offset = end;
    Ok(f64::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_cstring(data: &[u8], limit: usize, offset: &mut usize) -> Result<String> {
    let start = *offset;
    let nul = data[start..limit.min(data.len())]
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| VellumError::DocumentCorrupted("unterminated string".to_string()))?;
    let s = std::str::from_utf8(&data[start..start + nul])
        .map_err(|_| VellumError::DocumentCorrupted("invalid UTF-8".to_string()))?
        .to_string();
    *offset = start + nul + 1;
    Ok(s)
}

fn read_string(data: &[u8], limit: usize, offset: &mut usize) -> Result<String> {
    let len = read_i32(data, offset)? as usize;
    if len == 0 || *offset + len > limit {
        return Err(VellumError::DocumentCorrupted(
            "string length out of range".to_string(),
        ));
    }
    let s = std::str::from_utf8(&data[*offset..*offset + len - 1])
        .map_err(|_| VellumError::DocumentCorrupted("invalid UTF-8".to_string()))?
        .to_string();
    *offset += len;
    Ok(s)
}
