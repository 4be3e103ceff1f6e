// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! The subset of the MySQL client/server protocol the manager speaks: the 4.1
//! handshake with native password authentication, OK/error/EOF packets and
//! text result sets.

pub mod buffer;
pub mod client;
pub mod net;
pub mod packets;
pub mod scramble;
pub mod vio;

use std::io;
use thiserror::Error;

pub use buffer::{Buffer, BufferError};
pub use net::Net;
pub use vio::Vio;

pub const PROTOCOL_VERSION: u8 = 10;
pub const SCRAMBLE_LENGTH: usize = 20;
/// Length of the first scramble chunk in the greeting.
pub const SCRAMBLE_LENGTH_323: usize = 8;
/// Largest payload a single packet may carry.
pub const MAX_PACKET_LENGTH: usize = 0xFF_FFFF;
/// latin1_swedish_ci
pub const DEFAULT_CHARSET: u8 = 8;
pub const SERVER_STATUS_AUTOCOMMIT: u16 = 2;

pub const CLIENT_LONG_PASSWORD: u32 = 1;
pub const CLIENT_LONG_FLAG: u32 = 4;
pub const CLIENT_PROTOCOL_41: u32 = 512;
pub const CLIENT_SECURE_CONNECTION: u32 = 32768;

/// Capabilities advertised in the greeting.
pub const SERVER_CAPABILITIES: u32 =
    CLIENT_LONG_PASSWORD | CLIENT_LONG_FLAG | CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION;

pub const COM_QUIT: u8 = 0x01;
pub const COM_QUERY: u8 = 0x03;
pub const COM_PING: u8 = 0x0e;

pub const MYSQL_TYPE_VAR_STRING: u8 = 253;
pub const MYSQL_TYPE_STRING: u8 = 254;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("packet of {0} bytes exceeds the protocol limit")]
    PacketTooLarge(usize),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
    #[error("server error {code}: {message}")]
    Server { code: u16, message: String },
}
