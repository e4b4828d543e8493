// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Destination model: queues, topics, their temporary variants, and
//! composite destinations.
//!
//! A composite destination is a single logical destination fanning out to
//! two or more physical ones. It is written as one structure in the queue
//! or topic family with the composite flag set; component order is
//! preserved on the wire and through parsing.

use std::fmt;

use bytes::{Buf, Bytes, BytesMut};

use crate::codec::{read_string, read_u8, read_varint, write_string, write_varint, Result};
use crate::error::WireError;

pub const TYPE_QUEUE: u8 = 100;
pub const TYPE_TOPIC: u8 = 101;
pub const TYPE_TEMP_QUEUE: u8 = 102;
pub const TYPE_TEMP_TOPIC: u8 = 103;

const FLAG_COMPOSITE: u8 = 0x01;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    Queue(String),
    Topic(String),
    TempQueue(String),
    TempTopic(String),
    /// Insertion-ordered component list; components are never themselves
    /// composite.
    Composite(Vec<Destination>),
}

impl Destination {
    pub fn queue(name: impl Into<String>) -> Self {
        Self::Queue(name.into())
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self::Topic(name.into())
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::TempQueue(_) | Self::TempTopic(_))
    }

    pub fn is_topic(&self) -> bool {
        match self {
            Self::Topic(_) | Self::TempTopic(_) => true,
            Self::Composite(parts) => parts.first().is_some_and(Destination::is_topic),
            _ => false,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Composite(_))
    }

    /// Physical name; composites render as the comma-joined component
    /// list.
    pub fn name(&self) -> String {
        match self {
            Self::Queue(n) | Self::Topic(n) | Self::TempQueue(n) | Self::TempTopic(n) => n.clone(),
            Self::Composite(parts) => {
                parts.iter().map(Destination::qualified).collect::<Vec<_>>().join(",")
            }
        }
    }

    /// Scheme-qualified form, e.g. `queue://orders`.
    pub fn qualified(&self) -> String {
        match self {
            Self::Queue(n) => format!("queue://{n}"),
            Self::Topic(n) => format!("topic://{n}"),
            Self::TempQueue(n) => format!("temp-queue://{n}"),
            Self::TempTopic(n) => format!("temp-topic://{n}"),
            Self::Composite(_) => self.name(),
        }
    }

    fn type_id(&self) -> u8 {
        match self {
            Self::Queue(_) => TYPE_QUEUE,
            Self::Topic(_) => TYPE_TOPIC,
            Self::TempQueue(_) => TYPE_TEMP_QUEUE,
            Self::TempTopic(_) => TYPE_TEMP_TOPIC,
            // A composite is carried in the family of its first component.
            Self::Composite(parts) => match parts.first() {
                Some(first) => first.type_id(),
                None => TYPE_QUEUE,
            },
        }
    }

    pub fn is_destination_type(tag: u8) -> bool {
        (TYPE_QUEUE..=TYPE_TEMP_TOPIC).contains(&tag)
    }

    fn from_type(tag: u8, name: String) -> Result<Self> {
        match tag {
            TYPE_QUEUE => Ok(Self::Queue(name)),
            TYPE_TOPIC => Ok(Self::Topic(name)),
            TYPE_TEMP_QUEUE => Ok(Self::TempQueue(name)),
            TYPE_TEMP_TOPIC => Ok(Self::TempTopic(name)),
            other => Err(WireError::UnknownType(other)),
        }
    }

    pub fn write(&self, out: &mut BytesMut) {
        out.extend_from_slice(&[self.type_id()]);
        match self {
            Self::Composite(parts) => {
                out.extend_from_slice(&[FLAG_COMPOSITE]);
                write_varint(out, parts.len() as u64);
                for part in parts {
                    out.extend_from_slice(&[part.type_id()]);
                    write_string(out, &part.name());
                }
            }
            simple => {
                out.extend_from_slice(&[0]);
                write_string(out, &simple.name());
            }
        }
    }

    pub fn read(buf: &mut Bytes) -> Result<Self> {
        let tag = read_u8(buf, "destination type")?;
        if !Self::is_destination_type(tag) {
            return Err(WireError::UnknownType(tag));
        }
        let flags = read_u8(buf, "destination flags")?;
        if flags & FLAG_COMPOSITE != 0 {
            let count = read_varint(buf, "composite destination")? as usize;
            if count == 0 {
                return Err(WireError::corrupt("composite destination with no components"));
            }
            let mut parts = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                if buf.remaining() == 0 {
                    return Err(WireError::Truncated { context: "composite component", needed: 1 });
                }
                let part_tag = read_u8(buf, "composite component type")?;
                let name = read_string(buf, "composite component name")?;
                parts.push(Self::from_type(part_tag, name)?);
            }
            Ok(Self::Composite(parts))
        } else {
            Self::from_type(tag, read_string(buf, "destination name")?)
        }
    }

    /// Parse a destination string into a destination, splitting composite
    /// syntax `a,b` and honoring per-component `queue://` / `topic://`
    /// prefixes. Components without a prefix take the default kind.
    /// Component order is preserved.
    pub fn parse(input: &str, default_topic: bool) -> Result<Self> {
        let components: Vec<&str> =
            input.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
        if components.is_empty() {
            return Err(WireError::corrupt("empty destination name"));
        }
        let mut parts = Vec::with_capacity(components.len());
        for component in &components {
            parts.push(Self::parse_component(component, default_topic)?);
        }
        if parts.len() == 1 {
            Ok(parts.remove(0))
        } else {
            Ok(Self::Composite(parts))
        }
    }

    fn parse_component(component: &str, default_topic: bool) -> Result<Self> {
        let (kind, name) = match component.split_once("://") {
            Some((scheme, rest)) => (Some(scheme), rest),
            None => (None, component),
        };
        if name.is_empty() {
            return Err(WireError::corrupt(format!("empty destination component in {component:?}")));
        }
        match kind {
            None => {
                if default_topic {
                    Ok(Self::Topic(name.to_owned()))
                } else {
                    Ok(Self::Queue(name.to_owned()))
                }
            }
            Some("queue") => Ok(Self::Queue(name.to_owned())),
            Some("topic") => Ok(Self::Topic(name.to_owned())),
            Some("temp-queue") => Ok(Self::TempQueue(name.to_owned())),
            Some("temp-topic") => Ok(Self::TempTopic(name.to_owned())),
            Some(other) => Err(WireError::corrupt(format!("unknown destination scheme {other:?}"))),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified())
    }
}

#[cfg(test)]
#[path = "destination_tests.rs"]
mod tests;
