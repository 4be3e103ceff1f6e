// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Packet layouts for both directions.

use super::buffer::{Buffer, BufferError};
use super::net::Net;
use super::scramble::Digest20;
use super::{
    CLIENT_PROTOCOL_41, DEFAULT_CHARSET, MYSQL_TYPE_STRING, PROTOCOL_VERSION, ProtocolError,
    SCRAMBLE_LENGTH, SCRAMBLE_LENGTH_323,
};
use std::io::{Read, Write};

const OK_HEADER: u8 = 0x00;
const EOF_HEADER: u8 = 0xfe;
const ERR_HEADER: u8 = 0xff;

/// Offset of the user name in a 4.1 handshake response: capabilities (4),
/// max packet size (4), charset (1) and 23 reserved bytes.
pub const HANDSHAKE_USER_OFFSET: usize = 32;

/// Minimal column width reported in result-set column definitions.
const MIN_COLUMN_LENGTH: usize = 20;

/// Server greeting (initial handshake packet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub server_version: String,
    pub connection_id: u32,
    pub scramble: Digest20,
    pub capabilities: u16,
    pub charset: u8,
    pub status: u16,
}

impl Greeting {
    pub fn encode(&self) -> Result<Buffer, BufferError> {
        let mut buf = Buffer::new();
        buf.push_u8(PROTOCOL_VERSION)?;
        buf.push_nul_str(&self.server_version)?;
        buf.push_u32(self.connection_id)?;
        let (head, tail) = self.scramble.split_at(SCRAMBLE_LENGTH_323);
        buf.push(head)?;
        buf.push_u8(0)?;
        buf.push_u16(self.capabilities)?;
        buf.push_u8(self.charset)?;
        buf.push_u16(self.status)?;
        buf.push(&[0u8; 13])?;
        buf.push(tail)?;
        buf.push_u8(0)?;
        Ok(buf)
    }

    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        if r.u8()? != PROTOCOL_VERSION {
            return Err(ProtocolError::Malformed("unsupported protocol version"));
        }
        let server_version = r.nul_str()?;
        let connection_id = r.u32()?;
        let mut scramble = [0u8; SCRAMBLE_LENGTH];
        let (head, tail) = scramble.split_at_mut(SCRAMBLE_LENGTH_323);
        head.copy_from_slice(r.bytes(SCRAMBLE_LENGTH_323)?);
        r.u8()?;
        let capabilities = r.u16()?;
        let charset = r.u8()?;
        let status = r.u16()?;
        r.bytes(13)?;
        tail.copy_from_slice(r.bytes(SCRAMBLE_LENGTH - SCRAMBLE_LENGTH_323)?);
        Ok(Self {
            server_version,
            connection_id,
            scramble,
            capabilities,
            charset,
            status,
        })
    }
}

/// Why a handshake response was refused before the password was checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeReject {
    /// Packet too short to hold the mandatory fields.
    Malformed,
    /// Client does not speak the 4.1 protocol.
    Pre41Client,
}

/// Client reply to the greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub capabilities: u32,
    pub user: String,
    pub auth: Vec<u8>,
}

impl HandshakeResponse {
    pub fn encode(&self) -> Result<Buffer, BufferError> {
        let mut buf = Buffer::new();
        buf.push_u32(self.capabilities)?;
        buf.push_u32(super::MAX_PACKET_LENGTH as u32)?;
        buf.push_u8(DEFAULT_CHARSET)?;
        buf.push(&[0u8; 23])?;
        buf.push_nul_str(&self.user)?;
        buf.push_u8(self.auth.len() as u8)?;
        buf.push(&self.auth)?;
        Ok(buf)
    }

    pub fn parse(payload: &[u8]) -> Result<Self, HandshakeReject> {
        // The low two bytes of the capabilities are all a pre-4.1 client sends
        // in the same position, so the protocol check comes first.
        let Some(low) = payload.first_chunk::<2>() else {
            return Err(HandshakeReject::Malformed);
        };
        if u16::from_le_bytes(*low) as u32 & CLIENT_PROTOCOL_41 == 0 {
            return Err(HandshakeReject::Pre41Client);
        }
        let mut r = Reader::new(payload);
        let capabilities = r.u32().map_err(|_| HandshakeReject::Malformed)?;
        let mut r = Reader::new(
            payload
                .get(HANDSHAKE_USER_OFFSET..)
                .ok_or(HandshakeReject::Malformed)?,
        );
        // at least the user terminator and the password length byte
        if r.remaining() < 2 {
            return Err(HandshakeReject::Malformed);
        }
        let user = r.nul_str().map_err(|_| HandshakeReject::Malformed)?;
        let auth_len = r.u8().map_err(|_| HandshakeReject::Malformed)?;
        let auth = r
            .bytes(auth_len as usize)
            .map_err(|_| HandshakeReject::Malformed)?
            .to_vec();
        Ok(Self {
            capabilities,
            user,
            auth,
        })
    }
}

pub fn ok_packet(affected_rows: u64, insert_id: u64, status: u16) -> Result<Buffer, BufferError> {
    let mut buf = Buffer::with_capacity(16);
    buf.push_u8(OK_HEADER)?;
    buf.push_lenenc_int(affected_rows)?;
    buf.push_lenenc_int(insert_id)?;
    buf.push_u16(status)?;
    buf.push_u16(0)?;
    Ok(buf)
}

pub fn error_packet(code: u16, sqlstate: &str, message: &str) -> Result<Buffer, BufferError> {
    let mut buf = Buffer::with_capacity(message.len() + 9);
    buf.push_u8(ERR_HEADER)?;
    buf.push_u16(code)?;
    buf.push_u8(b'#')?;
    buf.push(sqlstate.as_bytes())?;
    buf.push(message.as_bytes())?;
    Ok(buf)
}

/// Error packet in the pre-4.1 layout (no SQLSTATE marker).
pub fn error_packet_323(code: u16, message: &str) -> Result<Buffer, BufferError> {
    let mut buf = Buffer::with_capacity(message.len() + 3);
    buf.push_u8(ERR_HEADER)?;
    buf.push_u16(code)?;
    buf.push(message.as_bytes())?;
    Ok(buf)
}

pub fn eof_packet(warnings: u16, status: u16) -> Result<Buffer, BufferError> {
    let mut buf = Buffer::with_capacity(5);
    buf.push_u8(EOF_HEADER)?;
    buf.push_u16(warnings)?;
    buf.push_u16(status)?;
    Ok(buf)
}

/// A text result set: every column is a string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ResultSet {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row<I, S>(&mut self, row: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(row.into_iter().map(Into::into).collect());
    }

    fn column_length(&self, index: usize) -> u32 {
        let widest = self
            .rows
            .iter()
            .filter_map(|row| row.get(index))
            .map(String::len)
            .max()
            .unwrap_or(0);
        u32::try_from(widest.max(MIN_COLUMN_LENGTH)).unwrap_or(u32::MAX)
    }

    fn column_definition(&self, index: usize, name: &str) -> Result<Buffer, BufferError> {
        let mut buf = Buffer::with_capacity(name.len() * 2 + 24);
        // catalog, db, table, org_table
        for _ in 0..4 {
            buf.push_lenenc_bytes(b"")?;
        }
        buf.push_lenenc_bytes(name.as_bytes())?;
        buf.push_lenenc_bytes(name.as_bytes())?;
        buf.push_u8(0x0c)?;
        buf.push_u16(DEFAULT_CHARSET as u16)?;
        buf.push_u32(self.column_length(index))?;
        buf.push_u8(MYSQL_TYPE_STRING)?;
        buf.push_u16(0)?;
        buf.push_u8(0)?;
        buf.push_u16(0)?;
        Ok(buf)
    }

    pub fn send<S: Read + Write>(&self, net: &mut Net<S>, status: u16) -> Result<(), ProtocolError> {
        let mut count = Buffer::with_capacity(9);
        count.push_lenenc_int(self.columns.len() as u64)?;
        net.write_packet(count.as_slice())?;
        for (index, name) in self.columns.iter().enumerate() {
            net.write_packet(self.column_definition(index, name)?.as_slice())?;
        }
        net.write_packet(eof_packet(0, status)?.as_slice())?;
        for row in &self.rows {
            let mut buf = Buffer::new();
            for value in row {
                buf.push_lenenc_bytes(value.as_bytes())?;
            }
            net.write_packet(buf.as_slice())?;
        }
        net.write_packet(eof_packet(0, status)?.as_slice())?;
        Ok(())
    }

    /// Reads the remainder of a result set whose column-count packet has
    /// already been consumed.
    pub fn read<S: Read + Write>(
        net: &mut Net<S>,
        column_count: u64,
    ) -> Result<Self, ProtocolError> {
        let mut columns = Vec::new();
        for _ in 0..column_count {
            let packet = net.read_packet()?;
            let mut r = Reader::new(&packet);
            for _ in 0..4 {
                r.lenenc_bytes()?;
            }
            columns.push(String::from_utf8_lossy(r.lenenc_bytes()?).into_owned());
        }
        if !is_eof(&net.read_packet()?) {
            return Err(ProtocolError::Malformed("missing EOF after column definitions"));
        }
        let mut rows = Vec::new();
        loop {
            let packet = net.read_packet()?;
            if is_eof(&packet) {
                break;
            }
            let mut r = Reader::new(&packet);
            let mut row = Vec::with_capacity(columns.len());
            for _ in 0..columns.len() {
                row.push(String::from_utf8_lossy(r.lenenc_bytes()?).into_owned());
            }
            rows.push(row);
        }
        Ok(Self { columns, rows })
    }
}

/// A server response as seen by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok { affected_rows: u64, insert_id: u64 },
    Err { code: u16, message: String },
    ResultSet(ResultSet),
}

pub fn is_eof(packet: &[u8]) -> bool {
    packet.first() == Some(&EOF_HEADER) && packet.len() < 9
}

/// Parses an OK or error packet. Anything else yields `None`.
pub fn parse_ok_or_err(packet: &[u8]) -> Result<Option<Response>, ProtocolError> {
    let mut r = Reader::new(packet);
    match r.u8()? {
        OK_HEADER => Ok(Some(Response::Ok {
            affected_rows: r.lenenc_int()?,
            insert_id: r.lenenc_int()?,
        })),
        ERR_HEADER => {
            let code = r.u16()?;
            let rest = r.rest();
            let message = match rest.split_first() {
                Some((b'#', tail)) if tail.len() >= 5 => tail.get(5..).unwrap_or_default(),
                _ => rest,
            };
            Ok(Some(Response::Err {
                code,
                message: String::from_utf8_lossy(message).into_owned(),
            }))
        }
        _ => Ok(None),
    }
}

/// Bounds-checked cursor over a packet payload.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self.pos.checked_add(n).ok_or(ProtocolError::Malformed("length overflow"))?;
        let out = self
            .data
            .get(self.pos..end)
            .ok_or(ProtocolError::Malformed("truncated packet"))?;
        self.pos = end;
        Ok(out)
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let out = self.data.get(self.pos..).unwrap_or_default();
        self.pos = self.data.len();
        out
    }

    /// The next `N` bytes as an array.
    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        self.bytes(N)?
            .try_into()
            .map_err(|_| ProtocolError::Malformed("truncated packet"))
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        let [b] = self.array::<1>()?;
        Ok(b)
    }

    pub fn u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn lenenc_int(&mut self) -> Result<u64, ProtocolError> {
        match self.u8()? {
            n @ 0..=250 => Ok(n as u64),
            0xfc => Ok(self.u16()? as u64),
            0xfd => {
                let [b0, b1, b2] = self.array::<3>()?;
                Ok(u32::from_le_bytes([b0, b1, b2, 0]) as u64)
            }
            0xfe => {
                Ok(u64::from_le_bytes(self.array()?))
            }
            _ => Err(ProtocolError::Malformed("invalid length-encoded integer")),
        }
    }

    pub fn lenenc_bytes(&mut self) -> Result<&'a [u8], ProtocolError> {
        let len = self.lenenc_int()?;
        let len = usize::try_from(len).map_err(|_| ProtocolError::Malformed("length overflow"))?;
        self.bytes(len)
    }

    pub fn nul_str(&mut self) -> Result<String, ProtocolError> {
        let rest = self.data.get(self.pos..).unwrap_or_default();
        let end = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(ProtocolError::Malformed("unterminated string"))?;
        let text = rest.get(..end).unwrap_or_default();
        self.pos += end + 1;
        Ok(String::from_utf8_lossy(text).into_owned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::protocol::{SERVER_CAPABILITIES, SERVER_STATUS_AUTOCOMMIT};
    use std::io::Cursor;

    fn greeting() -> Greeting {
        Greeting {
            server_version: "5.1.99-im".to_string(),
            connection_id: 42,
            scramble: *b"ABCDEFGHIJKLMNOPQRST",
            capabilities: SERVER_CAPABILITIES as u16,
            charset: DEFAULT_CHARSET,
            status: SERVER_STATUS_AUTOCOMMIT,
        }
    }

    #[test]
    fn test_greeting_layout() {
        let bytes = greeting().encode().unwrap().into_vec();
        let version_end = 1 + "5.1.99-im".len();
        assert_eq!(bytes[0], PROTOCOL_VERSION);
        assert_eq!(&bytes[1..version_end], b"5.1.99-im");
        assert_eq!(bytes[version_end], 0);
        let rest = &bytes[version_end + 1..];
        assert_eq!(&rest[..4], &42u32.to_le_bytes());
        assert_eq!(&rest[4..12], b"ABCDEFGH");
        assert_eq!(rest[12], 0);
        assert_eq!(
            u16::from_le_bytes([rest[13], rest[14]]) as u32,
            SERVER_CAPABILITIES
        );
        assert_eq!(rest[15], DEFAULT_CHARSET);
        assert_eq!(&rest[16..18], &SERVER_STATUS_AUTOCOMMIT.to_le_bytes());
        assert_eq!(&rest[18..31], &[0u8; 13]);
        assert_eq!(&rest[31..43], b"IJKLMNOPQRST");
        assert_eq!(rest[43], 0);
        assert_eq!(rest.len(), 44);
    }

    #[test]
    fn test_greeting_parse_recovers_scramble() {
        let bytes = greeting().encode().unwrap().into_vec();
        assert_eq!(Greeting::parse(&bytes).unwrap(), greeting());
    }

    #[test]
    fn test_handshake_response_parse() {
        let response = HandshakeResponse {
            capabilities: SERVER_CAPABILITIES,
            user: "admin".to_string(),
            auth: vec![7; 20],
        };
        let bytes = response.encode().unwrap().into_vec();
        assert_eq!(&bytes[HANDSHAKE_USER_OFFSET..HANDSHAKE_USER_OFFSET + 5], b"admin");
        assert_eq!(HandshakeResponse::parse(&bytes).unwrap(), response);
    }

    #[test]
    fn test_handshake_response_rejections() {
        assert_eq!(
            HandshakeResponse::parse(&[0x85]),
            Err(HandshakeReject::Malformed)
        );
        // 3.23-style reply: 2-byte capabilities without PROTOCOL_41
        assert_eq!(
            HandshakeResponse::parse(&[0x85, 0x00, 0, 0, 0, b'u', 0]),
            Err(HandshakeReject::Pre41Client)
        );
        let mut short = vec![0u8; HANDSHAKE_USER_OFFSET];
        short[..4].copy_from_slice(&CLIENT_PROTOCOL_41.to_le_bytes());
        assert_eq!(
            HandshakeResponse::parse(&short),
            Err(HandshakeReject::Malformed)
        );
    }

    #[test]
    fn test_ok_packet_carries_insert_id() {
        let bytes = ok_packet(0, 300, SERVER_STATUS_AUTOCOMMIT).unwrap().into_vec();
        assert_eq!(bytes, vec![0x00, 0x00, 0xfc, 0x2c, 0x01, 0x02, 0x00, 0x00, 0x00]);
        assert_eq!(
            parse_ok_or_err(&bytes).unwrap(),
            Some(Response::Ok {
                affected_rows: 0,
                insert_id: 300
            })
        );
    }

    #[test]
    fn test_error_packet_formats() {
        let v41 = error_packet(1045, "28000", "denied").unwrap().into_vec();
        assert_eq!(&v41[..4], &[0xff, 0x15, 0x04, b'#']);
        assert_eq!(&v41[4..9], b"28000");
        let v323 = error_packet_323(1251, "old").unwrap().into_vec();
        assert_eq!(v323, vec![0xff, 0xe3, 0x04, b'o', b'l', b'd']);
        for (bytes, code, message) in [(v41, 1045, "denied"), (v323, 1251, "old")] {
            assert_eq!(
                parse_ok_or_err(&bytes).unwrap(),
                Some(Response::Err {
                    code,
                    message: message.to_string()
                })
            );
        }
    }

    #[test]
    fn test_result_set_wire_shape() {
        let mut rs = ResultSet::new(["instance_name", "state"]);
        rs.push_row(["mysqld1", "online"]);
        let mut net = Net::new(Cursor::new(Vec::new()));
        rs.send(&mut net, SERVER_STATUS_AUTOCOMMIT).unwrap();
        let written = net.into_inner().into_inner();

        let mut net = Net::new(Cursor::new(written));
        assert_eq!(net.read_packet().unwrap(), vec![2]);
        let def = net.read_packet().unwrap();
        let mut r = Reader::new(&def);
        for _ in 0..4 {
            assert_eq!(r.lenenc_bytes().unwrap(), b"");
        }
        assert_eq!(r.lenenc_bytes().unwrap(), b"instance_name");
        assert_eq!(r.lenenc_bytes().unwrap(), b"instance_name");
        assert_eq!(r.u8().unwrap(), 0x0c);
        assert_eq!(r.u16().unwrap(), DEFAULT_CHARSET as u16);
        assert_eq!(r.u32().unwrap(), 20);
        assert_eq!(r.u8().unwrap(), MYSQL_TYPE_STRING);
        assert_eq!(r.remaining(), 5);
    }

    #[test]
    fn test_result_set_read_back() {
        let mut rs = ResultSet::new(["Log"]);
        rs.push_row(["x".repeat(300)]);
        let mut net = Net::new(Cursor::new(Vec::new()));
        rs.send(&mut net, 0).unwrap();
        let mut net = Net::new(Cursor::new(net.into_inner().into_inner()));
        assert_eq!(net.read_packet().unwrap(), vec![1]);
        assert_eq!(ResultSet::read(&mut net, 1).unwrap(), rs);
    }
}
