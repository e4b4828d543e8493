// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The stateful OpenWire marshaller.
//!
//! Two framings:
//! - **loose**: every boolean and presence flag is a byte in the data
//!   stream; easy to evolve, used until negotiation completes.
//! - **tight**: a scan pass collects all booleans and presence flags into
//!   a [`BooleanStream`] written after the command header, then a write
//!   pass emits the packed field data.
//!
//! The marshal cache replaces repeated destinations and producer ids with
//! small integer indices once both peers advertise `cacheEnabled`.
//! Until the peer's `WireFormatInfo` has been seen, everything is loose,
//! uncached, and size-prefixed; `renegotiate` fixes the framing for the
//! rest of the connection.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use indexmap::IndexMap;
use std::collections::HashMap;

use crate::codec::{
    read_blob, read_string, read_u32, read_u8, read_varint, read_zigzag, write_blob,
    write_string, write_varint, write_zigzag, BooleanStream, Result,
};
use crate::command::{Command, CommandKind, WireFormatInfo, TYPE_WIREFORMAT_INFO};
use crate::destination::Destination;
use crate::error::WireError;
use crate::ids::{ProducerId, WireStruct};

/// Default protocol version; also the fallback both peers settle on.
pub const DEFAULT_VERSION: u32 = 12;

const CTRL_INLINE: u8 = 0;
const CTRL_STORE: u8 = 1;
const CTRL_REF: u8 = 2;

/// Local wire-format preferences, typically populated from URI options.
#[derive(Debug, Clone)]
pub struct WireFormatOptions {
    pub version: u32,
    pub cache_enabled: bool,
    pub cache_size: u32,
    pub tight_encoding_enabled: bool,
    pub size_prefix_disabled: bool,
    pub tcp_no_delay_enabled: bool,
    pub max_inactivity_duration: i64,
    pub max_inactivity_duration_initial_delay: i64,
    pub max_frame_size: usize,
}

impl Default for WireFormatOptions {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION,
            cache_enabled: true,
            cache_size: 1024,
            tight_encoding_enabled: true,
            size_prefix_disabled: false,
            tcp_no_delay_enabled: true,
            max_inactivity_duration: 30_000,
            max_inactivity_duration_initial_delay: 10_000,
            max_frame_size: 100 * 1024 * 1024,
        }
    }
}

/// Outcome of the `WireFormatInfo` exchange, consumed by the transport
/// layer (inactivity monitor, socket options).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedConfig {
    pub version: u32,
    pub tight_encoding: bool,
    pub cache_enabled: bool,
    pub size_prefix_disabled: bool,
    pub tcp_no_delay: bool,
    pub max_inactivity_duration: i64,
    pub max_inactivity_duration_initial_delay: i64,
}

/// One side of the marshal cache: value → index for encode, index → value
/// for decode. The encode side is LRU over a fixed capacity; the decode
/// side just mirrors whatever indices the sender assigns.
#[derive(Debug, Default)]
pub struct MarshalContext {
    cache_enabled: bool,
    cache_size: usize,
    encode_cache: IndexMap<CachedValue, u32>,
    decode_cache: HashMap<u32, CachedValue>,
    next_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CachedValue {
    Destination(Destination),
    ProducerId(ProducerId),
}

enum CacheOutcome {
    Reference(u32),
    Store(u32),
}

impl MarshalContext {
    fn enable(&mut self, cache_size: usize) {
        self.cache_enabled = true;
        self.cache_size = cache_size.max(1);
    }

    fn encode_lookup(&mut self, value: CachedValue) -> CacheOutcome {
        if let Some(index) = self.encode_cache.shift_remove(&value) {
            // Move to back: most recently used.
            self.encode_cache.insert(value, index);
            return CacheOutcome::Reference(index);
        }
        let index = if self.encode_cache.len() >= self.cache_size {
            // Evict the least recently used entry and reuse its slot.
            match self.encode_cache.shift_remove_index(0) {
                Some((_, reused)) => reused,
                None => self.fresh_index(),
            }
        } else {
            self.fresh_index()
        };
        self.encode_cache.insert(value, index);
        CacheOutcome::Store(index)
    }

    fn fresh_index(&mut self) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    fn decode_store(&mut self, index: u32, value: CachedValue) {
        self.decode_cache.insert(index, value);
    }

    fn decode_fetch(&self, index: u32) -> Result<&CachedValue> {
        self.decode_cache
            .get(&index)
            .ok_or_else(|| WireError::corrupt(format!("unknown cache index {index}")))
    }
}

/// Self-delimiting nested body. Ids get this via [`WireStruct`];
/// polymorphic structures implement it directly.
pub trait WireBody: Sized {
    fn wire_write(&self, out: &mut BytesMut);
    fn wire_read(buf: &mut Bytes) -> Result<Self>;
}

impl<T: WireStruct> WireBody for T {
    fn wire_write(&self, out: &mut BytesMut) {
        self.write(out);
    }

    fn wire_read(buf: &mut Bytes) -> Result<Self> {
        Self::read(buf)
    }
}

impl WireBody for Destination {
    fn wire_write(&self, out: &mut BytesMut) {
        self.write(out);
    }

    fn wire_read(buf: &mut Bytes) -> Result<Self> {
        Self::read(buf)
    }
}

impl WireBody for crate::ids::TransactionId {
    fn wire_write(&self, out: &mut BytesMut) {
        self.write(out);
    }

    fn wire_read(buf: &mut Bytes) -> Result<Self> {
        Self::read(buf)
    }
}

impl WireBody for crate::ids::DataStructure {
    fn wire_write(&self, out: &mut BytesMut) {
        self.write(out);
    }

    fn wire_read(buf: &mut Bytes) -> Result<Self> {
        Self::read(buf)
    }
}

enum EncodeMode<'a> {
    Loose(&'a mut BytesMut),
    /// Pass one of the tight marshal: collect flags only.
    TightScan(&'a mut BooleanStream),
    /// Pass two: emit field data; flags already live in the stream.
    TightWrite(&'a mut BytesMut),
}

/// Field sink shared by every command codec. Each payload is written once
/// against this API; the tight framing simply runs it twice.
pub struct Encoder<'a> {
    mode: EncodeMode<'a>,
    ctx: &'a mut MarshalContext,
}

impl<'a> Encoder<'a> {
    fn data_out(&mut self) -> Option<&mut BytesMut> {
        match &mut self.mode {
            EncodeMode::Loose(out) | EncodeMode::TightWrite(out) => Some(out),
            EncodeMode::TightScan(_) => None,
        }
    }

    /// A boolean or presence flag: byte in loose, bit in tight.
    pub fn flag(&mut self, value: bool) {
        match &mut self.mode {
            EncodeMode::Loose(out) => out.put_u8(u8::from(value)),
            EncodeMode::TightScan(bits) => bits.push(value),
            EncodeMode::TightWrite(_) => {}
        }
    }

    pub fn u8(&mut self, value: u8) {
        if let Some(out) = self.data_out() {
            out.put_u8(value);
        }
    }

    pub fn u32(&mut self, value: u32) {
        if let Some(out) = self.data_out() {
            out.put_u32(value);
        }
    }

    pub fn zigzag(&mut self, value: i64) {
        if let Some(out) = self.data_out() {
            write_zigzag(out, value);
        }
    }

    pub fn varint(&mut self, value: u64) {
        if let Some(out) = self.data_out() {
            write_varint(out, value);
        }
    }

    pub fn string(&mut self, value: &str) {
        if let Some(out) = self.data_out() {
            write_string(out, value);
        }
    }

    /// Fixed-width bytes with no length prefix (magic preambles).
    pub fn raw(&mut self, value: &[u8]) {
        if let Some(out) = self.data_out() {
            out.put_slice(value);
        }
    }

    pub fn opt_string(&mut self, value: Option<&str>) {
        self.flag(value.is_some());
        if let Some(value) = value {
            self.string(value);
        }
    }

    pub fn blob(&mut self, value: &[u8]) {
        if let Some(out) = self.data_out() {
            write_blob(out, value);
        }
    }

    pub fn opt_blob(&mut self, value: Option<&[u8]>) {
        self.flag(value.is_some());
        if let Some(value) = value {
            self.blob(value);
        }
    }

    pub fn structure<T: WireBody>(&mut self, value: &T) {
        if let Some(out) = self.data_out() {
            value.wire_write(out);
        }
    }

    pub fn opt_structure<T: WireBody>(&mut self, value: Option<&T>) {
        self.flag(value.is_some());
        if let Some(value) = value {
            self.structure(value);
        }
    }

    pub fn structures<T: WireBody>(&mut self, values: &[T]) {
        self.varint(values.len() as u64);
        for value in values {
            self.structure(value);
        }
    }

    fn cached(&mut self, value: CachedValue) {
        let out = match &mut self.mode {
            EncodeMode::Loose(out) | EncodeMode::TightWrite(out) => out,
            EncodeMode::TightScan(_) => return,
        };
        if !self.ctx.cache_enabled {
            out.put_u8(CTRL_INLINE);
            match &value {
                CachedValue::Destination(d) => d.write(out),
                CachedValue::ProducerId(p) => p.write(out),
            }
            return;
        }
        match self.ctx.encode_lookup(value.clone()) {
            CacheOutcome::Reference(index) => {
                out.put_u8(CTRL_REF);
                write_varint(out, u64::from(index));
            }
            CacheOutcome::Store(index) => {
                out.put_u8(CTRL_STORE);
                write_varint(out, u64::from(index));
                match &value {
                    CachedValue::Destination(d) => d.write(out),
                    CachedValue::ProducerId(p) => p.write(out),
                }
            }
        }
    }

    pub fn cached_destination(&mut self, value: &Destination) {
        self.cached(CachedValue::Destination(value.clone()));
    }

    pub fn opt_cached_destination(&mut self, value: Option<&Destination>) {
        self.flag(value.is_some());
        if let Some(value) = value {
            self.cached_destination(value);
        }
    }

    pub fn cached_producer_id(&mut self, value: &ProducerId) {
        self.cached(CachedValue::ProducerId(value.clone()));
    }
}

enum DecodeMode<'a> {
    Loose(&'a mut Bytes),
    Tight { buf: &'a mut Bytes, bits: BooleanStream },
}

/// Field source mirroring [`Encoder`].
pub struct Decoder<'a> {
    mode: DecodeMode<'a>,
    ctx: &'a mut MarshalContext,
}

impl<'a> Decoder<'a> {
    fn buf(&mut self) -> &mut Bytes {
        match &mut self.mode {
            DecodeMode::Loose(buf) => buf,
            DecodeMode::Tight { buf, .. } => buf,
        }
    }

    pub fn flag(&mut self) -> Result<bool> {
        match &mut self.mode {
            DecodeMode::Loose(buf) => crate::codec::read_bool(buf, "flag"),
            DecodeMode::Tight { bits, .. } => bits.pop(),
        }
    }

    pub fn u8(&mut self, context: &'static str) -> Result<u8> {
        read_u8(self.buf(), context)
    }

    pub fn u32(&mut self, context: &'static str) -> Result<u32> {
        read_u32(self.buf(), context)
    }

    pub fn zigzag(&mut self, context: &'static str) -> Result<i64> {
        read_zigzag(self.buf(), context)
    }

    pub fn varint(&mut self, context: &'static str) -> Result<u64> {
        read_varint(self.buf(), context)
    }

    pub fn string(&mut self, context: &'static str) -> Result<String> {
        read_string(self.buf(), context)
    }

    pub fn opt_string(&mut self, context: &'static str) -> Result<Option<String>> {
        if self.flag()? {
            Ok(Some(self.string(context)?))
        } else {
            Ok(None)
        }
    }

    /// Fixed-width counterpart of [`Encoder::raw`].
    pub fn raw(&mut self, len: usize, context: &'static str) -> Result<Bytes> {
        let buf = self.buf();
        if buf.remaining() < len {
            return Err(WireError::Truncated { context, needed: len - buf.remaining() });
        }
        Ok(buf.copy_to_bytes(len))
    }

    pub fn bytes(&mut self, context: &'static str) -> Result<Bytes> {
        read_blob(self.buf(), context)
    }

    pub fn opt_bytes(&mut self, context: &'static str) -> Result<Option<Bytes>> {
        if self.flag()? {
            Ok(Some(self.bytes(context)?))
        } else {
            Ok(None)
        }
    }

    pub fn structure<T: WireBody>(&mut self) -> Result<T> {
        T::wire_read(self.buf())
    }

    pub fn opt_structure<T: WireBody>(&mut self) -> Result<Option<T>> {
        if self.flag()? {
            Ok(Some(self.structure()?))
        } else {
            Ok(None)
        }
    }

    pub fn structures<T: WireBody>(&mut self, context: &'static str) -> Result<Vec<T>> {
        let count = self.varint(context)? as usize;
        let mut values = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            values.push(self.structure()?);
        }
        Ok(values)
    }

    fn cached_value(&mut self) -> Result<CachedValue> {
        let ctrl = self.u8("cache control")?;
        match ctrl {
            CTRL_INLINE => self.read_cached_body(),
            CTRL_STORE => {
                let index = self.varint("cache index")? as u32;
                let value = self.read_cached_body()?;
                self.ctx.decode_store(index, value.clone());
                Ok(value)
            }
            CTRL_REF => {
                let index = self.varint("cache index")? as u32;
                Ok(self.ctx.decode_fetch(index)?.clone())
            }
            other => Err(WireError::corrupt(format!("bad cache control byte {other}"))),
        }
    }

    fn read_cached_body(&mut self) -> Result<CachedValue> {
        let buf = self.buf();
        let Some(&tag) = buf.first() else {
            return Err(WireError::Truncated { context: "cached structure", needed: 1 });
        };
        if Destination::is_destination_type(tag) {
            Ok(CachedValue::Destination(Destination::read(buf)?))
        } else {
            Ok(CachedValue::ProducerId(ProducerId::read(buf)?))
        }
    }

    pub fn cached_destination(&mut self) -> Result<Destination> {
        match self.cached_value()? {
            CachedValue::Destination(d) => Ok(d),
            CachedValue::ProducerId(_) => {
                Err(WireError::corrupt("cache index resolved to a producer id, expected destination"))
            }
        }
    }

    pub fn opt_cached_destination(&mut self) -> Result<Option<Destination>> {
        if self.flag()? {
            Ok(Some(self.cached_destination()?))
        } else {
            Ok(None)
        }
    }

    pub fn cached_producer_id(&mut self) -> Result<ProducerId> {
        match self.cached_value()? {
            CachedValue::ProducerId(p) => Ok(p),
            CachedValue::Destination(_) => {
                Err(WireError::corrupt("cache index resolved to a destination, expected producer id"))
            }
        }
    }
}

/// Per-connection marshaller. Not thread safe; the transport owns one and
/// serializes access through its read/write halves.
#[derive(Debug)]
pub struct OpenWireFormat {
    options: WireFormatOptions,
    version: u32,
    tight: bool,
    size_prefix_disabled: bool,
    negotiated: bool,
    cache: MarshalContext,
}

impl OpenWireFormat {
    pub fn new(options: WireFormatOptions) -> Self {
        Self {
            version: options.version,
            tight: false,
            size_prefix_disabled: false,
            negotiated: false,
            cache: MarshalContext::default(),
            options,
        }
    }

    pub fn is_negotiated(&self) -> bool {
        self.negotiated
    }

    pub fn is_tight(&self) -> bool {
        self.tight
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// The local proposal sent as the first frame on every connection.
    pub fn preferred_wireformat_info(&self) -> WireFormatInfo {
        WireFormatInfo {
            version: self.options.version,
            cache_enabled: self.options.cache_enabled,
            cache_size: self.options.cache_size,
            tight_encoding_enabled: self.options.tight_encoding_enabled,
            size_prefix_disabled: self.options.size_prefix_disabled,
            tcp_no_delay_enabled: self.options.tcp_no_delay_enabled,
            max_inactivity_duration: self.options.max_inactivity_duration,
            max_inactivity_duration_initial_delay: self.options
                .max_inactivity_duration_initial_delay,
        }
    }

    /// Intersect the peer's advertisement with the local proposal and fix
    /// the framing for the rest of the connection.
    pub fn renegotiate(&mut self, peer: &WireFormatInfo) -> NegotiatedConfig {
        let local = self.preferred_wireformat_info();

        self.version = local.version.min(peer.version).max(1);
        self.tight = local.tight_encoding_enabled && peer.tight_encoding_enabled;
        self.size_prefix_disabled = local.size_prefix_disabled && peer.size_prefix_disabled;

        let cache_enabled = local.cache_enabled && peer.cache_enabled;
        if cache_enabled {
            let size = local.cache_size.min(peer.cache_size);
            self.cache.enable(size as usize);
        }

        // 0 disables the monitor on either side; otherwise the lower bound
        // wins.
        let inactivity = if local.max_inactivity_duration == 0 || peer.max_inactivity_duration == 0
        {
            0
        } else {
            local.max_inactivity_duration.min(peer.max_inactivity_duration)
        };
        let initial_delay = local
            .max_inactivity_duration_initial_delay
            .min(peer.max_inactivity_duration_initial_delay);

        self.negotiated = true;

        let config = NegotiatedConfig {
            version: self.version,
            tight_encoding: self.tight,
            cache_enabled,
            size_prefix_disabled: self.size_prefix_disabled,
            tcp_no_delay: local.tcp_no_delay_enabled && peer.tcp_no_delay_enabled,
            max_inactivity_duration: inactivity,
            max_inactivity_duration_initial_delay: initial_delay,
        };
        tracing::debug!(
            version = config.version,
            tight = config.tight_encoding,
            cache = config.cache_enabled,
            inactivity_ms = config.max_inactivity_duration,
            "wire format negotiated"
        );
        config
    }

    pub fn marshal(&mut self, command: &Command, out: &mut BytesMut) -> Result<()> {
        let mut body = BytesMut::with_capacity(64);
        body.put_u8(command.kind.type_id());
        body.put_u32(command.command_id);
        body.put_u8(u8::from(command.response_required));

        // WireFormatInfo bootstraps the negotiation; it is always loose so
        // a peer can read it before any options are agreed.
        if self.tight && !command.kind.force_loose() {
            let mut bits = BooleanStream::new();
            command.kind.encode(&mut Encoder {
                mode: EncodeMode::TightScan(&mut bits),
                ctx: &mut self.cache,
            });
            bits.marshal(&mut body);
            command.kind.encode(&mut Encoder {
                mode: EncodeMode::TightWrite(&mut body),
                ctx: &mut self.cache,
            });
        } else {
            command.kind.encode(&mut Encoder {
                mode: EncodeMode::Loose(&mut body),
                ctx: &mut self.cache,
            });
        }

        if body.len() > self.options.max_frame_size {
            return Err(WireError::FrameTooLarge {
                size: body.len(),
                max: self.options.max_frame_size,
            });
        }

        if !self.size_prefix_disabled {
            out.put_u32(body.len() as u32);
        }
        out.extend_from_slice(&body);
        Ok(())
    }

    /// Incremental unmarshal from a growing read buffer. Returns
    /// `Ok(None)` until a full frame is buffered; consumes exactly one
    /// frame per `Some`.
    pub fn unmarshal(&mut self, src: &mut BytesMut) -> Result<Option<Command>> {
        if !self.size_prefix_disabled {
            if src.len() < 4 {
                return Ok(None);
            }
            let frame_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
            if frame_len > self.options.max_frame_size {
                return Err(WireError::FrameTooLarge {
                    size: frame_len,
                    max: self.options.max_frame_size,
                });
            }
            if src.len() < 4 + frame_len {
                return Ok(None);
            }
            src.advance(4);
            let mut frame = src.split_to(frame_len).freeze();
            let command = self.parse_frame(&mut frame).map_err(strict)?;
            if !frame.is_empty() {
                return Err(WireError::corrupt("trailing bytes inside framed command"));
            }
            Ok(Some(command))
        } else {
            // No prefix: attempt a parse and wait for more bytes on
            // truncation.
            let mut attempt = Bytes::copy_from_slice(src);
            let total = attempt.len();
            match self.parse_frame(&mut attempt) {
                Ok(command) => {
                    src.advance(total - attempt.len());
                    Ok(Some(command))
                }
                Err(WireError::Truncated { .. }) => Ok(None),
                Err(other) => Err(other),
            }
        }
    }

    fn parse_frame(&mut self, frame: &mut Bytes) -> Result<Command> {
        let type_id = read_u8(frame, "command type")?;
        let command_id = read_u32(frame, "command id")?;
        let response_required = read_u8(frame, "response required")? != 0;

        let kind = if self.tight && type_id != TYPE_WIREFORMAT_INFO {
            let bits = BooleanStream::unmarshal(frame)?;
            CommandKind::decode(
                type_id,
                &mut Decoder { mode: DecodeMode::Tight { buf: frame, bits }, ctx: &mut self.cache },
            )?
        } else {
            CommandKind::decode(
                type_id,
                &mut Decoder { mode: DecodeMode::Loose(frame), ctx: &mut self.cache },
            )?
        };

        Ok(Command { command_id, response_required, kind })
    }
}

impl Default for OpenWireFormat {
    fn default() -> Self {
        Self::new(WireFormatOptions::default())
    }
}

/// Inside a complete frame, missing bytes mean corruption, not a short
/// read.
fn strict(err: WireError) -> WireError {
    match err {
        WireError::Truncated { context, .. } => {
            WireError::corrupt(format!("frame ends early at {context}"))
        }
        other => other,
    }
}

#[cfg(test)]
#[path = "wireformat_tests.rs"]
mod tests;
