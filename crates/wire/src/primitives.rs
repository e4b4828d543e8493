// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Primitive property values, maps and lists.
//!
//! Message properties travel as one length-prefixed blob produced by
//! [`PrimitiveMap::marshal`]. Receivers keep the blob and parse it on
//! first property access, so a malformed blob surfaces at the accessor,
//! never in the receive path.
//!
//! Typed getters coerce between compatible kinds (numeric widening,
//! string parsing); incompatible reads fail with
//! [`WireError::Conversion`].

use bytes::{Bytes, BytesMut};
use indexmap::IndexMap;

use crate::codec::{
    read_blob, read_bool, read_f32, read_f64, read_i16, read_string, read_u8, read_varint,
    read_zigzag, write_blob, write_string, write_varint, write_zigzag, Result,
};
use crate::error::WireError;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_BYTE: u8 = 2;
const TAG_SHORT: u8 = 3;
const TAG_INT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_FLOAT: u8 = 6;
const TAG_DOUBLE: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_BYTES: u8 = 9;
const TAG_LIST: u8 = 10;
const TAG_MAP: u8 = 11;

#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveValue {
    Null,
    Bool(bool),
    Byte(u8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    List(PrimitiveList),
    Map(PrimitiveMap),
}

impl PrimitiveValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Byte(_) => "byte",
            Self::Short(_) => "short",
            Self::Int(_) => "int",
            Self::Long(_) => "long",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    fn conversion(&self, to: &'static str) -> WireError {
        WireError::Conversion { from: self.kind_name(), to }
    }

    /// Bool, or a string parsing as `"true"` / `"false"`.
    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Self::Bool(v) => Ok(*v),
            Self::String(s) => s.parse::<bool>().map_err(|_| self.conversion("bool")),
            other => Err(other.conversion("bool")),
        }
    }

    /// Integral widening plus string parsing.
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Self::Byte(v) => Ok(i64::from(*v)),
            Self::Short(v) => Ok(i64::from(*v)),
            Self::Int(v) => Ok(i64::from(*v)),
            Self::Long(v) => Ok(*v),
            Self::String(s) => s.parse::<i64>().map_err(|_| self.conversion("long")),
            other => Err(other.conversion("long")),
        }
    }

    pub fn as_i32(&self) -> Result<i32> {
        let wide = self.as_i64().map_err(|_| self.conversion("int"))?;
        i32::try_from(wide).map_err(|_| self.conversion("int"))
    }

    /// Float/double widening plus integral and string sources.
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Self::Float(v) => Ok(f64::from(*v)),
            Self::Double(v) => Ok(*v),
            Self::String(s) => s.parse::<f64>().map_err(|_| self.conversion("double")),
            other => other.as_i64().map(|v| v as f64).map_err(|_| other.conversion("double")),
        }
    }

    /// Everything except bytes/list/map renders to a string.
    pub fn as_string(&self) -> Result<String> {
        match self {
            Self::Null => Ok("null".to_owned()),
            Self::Bool(v) => Ok(v.to_string()),
            Self::Byte(v) => Ok(v.to_string()),
            Self::Short(v) => Ok(v.to_string()),
            Self::Int(v) => Ok(v.to_string()),
            Self::Long(v) => Ok(v.to_string()),
            Self::Float(v) => Ok(v.to_string()),
            Self::Double(v) => Ok(v.to_string()),
            Self::String(s) => Ok(s.clone()),
            other => Err(other.conversion("string")),
        }
    }

    fn write(&self, out: &mut BytesMut) {
        match self {
            Self::Null => out.extend_from_slice(&[TAG_NULL]),
            Self::Bool(v) => out.extend_from_slice(&[TAG_BOOL, u8::from(*v)]),
            Self::Byte(v) => out.extend_from_slice(&[TAG_BYTE, *v]),
            Self::Short(v) => {
                out.extend_from_slice(&[TAG_SHORT]);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Self::Int(v) => {
                out.extend_from_slice(&[TAG_INT]);
                write_zigzag(out, i64::from(*v));
            }
            Self::Long(v) => {
                out.extend_from_slice(&[TAG_LONG]);
                write_zigzag(out, *v);
            }
            Self::Float(v) => {
                out.extend_from_slice(&[TAG_FLOAT]);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Self::Double(v) => {
                out.extend_from_slice(&[TAG_DOUBLE]);
                out.extend_from_slice(&v.to_be_bytes());
            }
            Self::String(s) => {
                out.extend_from_slice(&[TAG_STRING]);
                write_string(out, s);
            }
            Self::Bytes(b) => {
                out.extend_from_slice(&[TAG_BYTES]);
                write_blob(out, b);
            }
            Self::List(l) => {
                out.extend_from_slice(&[TAG_LIST]);
                l.write(out);
            }
            Self::Map(m) => {
                out.extend_from_slice(&[TAG_MAP]);
                m.write(out);
            }
        }
    }

    fn read(buf: &mut Bytes) -> Result<Self> {
        match read_u8(buf, "primitive tag")? {
            TAG_NULL => Ok(Self::Null),
            TAG_BOOL => Ok(Self::Bool(read_bool(buf, "primitive bool")?)),
            TAG_BYTE => Ok(Self::Byte(read_u8(buf, "primitive byte")?)),
            TAG_SHORT => Ok(Self::Short(read_i16(buf, "primitive short")?)),
            TAG_INT => {
                let wide = read_zigzag(buf, "primitive int")?;
                let narrow = i32::try_from(wide)
                    .map_err(|_| WireError::corrupt("int out of range"))?;
                Ok(Self::Int(narrow))
            }
            TAG_LONG => Ok(Self::Long(read_zigzag(buf, "primitive long")?)),
            TAG_FLOAT => Ok(Self::Float(read_f32(buf, "primitive float")?)),
            TAG_DOUBLE => Ok(Self::Double(read_f64(buf, "primitive double")?)),
            TAG_STRING => Ok(Self::String(read_string(buf, "primitive string")?)),
            TAG_BYTES => Ok(Self::Bytes(read_blob(buf, "primitive bytes")?.to_vec())),
            TAG_LIST => Ok(Self::List(PrimitiveList::read(buf)?)),
            TAG_MAP => Ok(Self::Map(PrimitiveMap::read(buf)?)),
            other => Err(WireError::corrupt(format!("unknown primitive tag {other}"))),
        }
    }
}

/// Insertion-ordered name → value map for message properties.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrimitiveMap {
    entries: IndexMap<String, PrimitiveValue>,
}

impl PrimitiveMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn put(&mut self, key: impl Into<String>, value: PrimitiveValue) {
        self.entries.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<PrimitiveValue> {
        self.entries.shift_remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&PrimitiveValue> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    fn get_required(&self, key: &str) -> Result<&PrimitiveValue> {
        self.get(key)
            .ok_or_else(|| WireError::Conversion { from: "missing", to: "present value" })
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.get_required(key)?.as_bool()
    }

    pub fn get_i32(&self, key: &str) -> Result<i32> {
        self.get_required(key)?.as_i32()
    }

    pub fn get_i64(&self, key: &str) -> Result<i64> {
        self.get_required(key)?.as_i64()
    }

    pub fn get_f64(&self, key: &str) -> Result<f64> {
        self.get_required(key)?.as_f64()
    }

    pub fn get_string(&self, key: &str) -> Result<String> {
        self.get_required(key)?.as_string()
    }

    fn write(&self, out: &mut BytesMut) {
        write_varint(out, self.entries.len() as u64);
        for (key, value) in &self.entries {
            write_string(out, key);
            value.write(out);
        }
    }

    fn read(buf: &mut Bytes) -> Result<Self> {
        let count = read_varint(buf, "primitive map size")? as usize;
        let mut entries = IndexMap::with_capacity(count.min(256));
        for _ in 0..count {
            let key = read_string(buf, "primitive map key")?;
            let value = PrimitiveValue::read(buf)?;
            entries.insert(key, value);
        }
        Ok(Self { entries })
    }

    /// Marshal to the blob form carried on a message.
    pub fn marshal(&self) -> Bytes {
        let mut out = BytesMut::new();
        self.write(&mut out);
        out.freeze()
    }

    /// Parse a property blob. Truncation inside the blob is reported as
    /// corruption: the enclosing frame was complete, so missing bytes can
    /// only mean a bad blob.
    pub fn unmarshal(blob: &Bytes) -> Result<Self> {
        let mut buf = blob.clone();
        let map = Self::read(&mut buf).map_err(|e| match e {
            WireError::Truncated { context, .. } => {
                WireError::corrupt(format!("property blob truncated at {context}"))
            }
            other => other,
        })?;
        if !buf.is_empty() {
            return Err(WireError::corrupt("trailing bytes after property map"));
        }
        Ok(map)
    }
}

/// Ordered value list; the collection counterpart of [`PrimitiveMap`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrimitiveList {
    values: Vec<PrimitiveValue>,
}

impl PrimitiveList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn push(&mut self, value: PrimitiveValue) {
        self.values.push(value);
    }

    pub fn get(&self, index: usize) -> Option<&PrimitiveValue> {
        self.values.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PrimitiveValue> {
        self.values.iter()
    }

    fn write(&self, out: &mut BytesMut) {
        write_varint(out, self.values.len() as u64);
        for value in &self.values {
            value.write(out);
        }
    }

    fn read(buf: &mut Bytes) -> Result<Self> {
        let count = read_varint(buf, "primitive list size")? as usize;
        let mut values = Vec::with_capacity(count.min(256));
        for _ in 0..count {
            values.push(PrimitiveValue::read(buf)?);
        }
        Ok(Self { values })
    }
}

#[cfg(test)]
#[path = "primitives_tests.rs"]
mod tests;
