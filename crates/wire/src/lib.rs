// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OpenWire v12 binary codec.
//!
//! This crate is the wire layer only: primitive encoding, the command
//! model, and the stateful [`wireformat::OpenWireFormat`] marshaller with
//! its loose and tight framings. It performs no I/O; transports feed it
//! byte buffers and take byte buffers back.

pub mod codec;
pub mod command;
pub mod destination;
pub mod error;
pub mod ids;
pub mod primitives;
pub mod wireformat;

pub use command::{Command, CommandKind};
pub use destination::Destination;
pub use error::WireError;
pub use wireformat::{OpenWireFormat, WireFormatOptions};
