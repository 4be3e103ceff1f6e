// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Packet framing: 3-byte little-endian payload length followed by a 1-byte
//! sequence number.

use super::{MAX_PACKET_LENGTH, ProtocolError};
use std::io::{Read, Write};

pub struct Net<S> {
    stream: S,
    seq: u8,
}

impl<S: Read + Write> Net<S> {
    pub fn new(stream: S) -> Self {
        Self { stream, seq: 0 }
    }

    /// Starts a new exchange; the next packet written carries sequence 0.
    pub fn reset_seq(&mut self) {
        self.seq = 0;
    }

    pub fn read_packet(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let mut header = [0u8; 4];
        self.stream.read_exact(&mut header)?;
        let [l0, l1, l2, seq] = header;
        let len = u32::from_le_bytes([l0, l1, l2, 0]) as usize;
        if len >= MAX_PACKET_LENGTH {
            return Err(ProtocolError::PacketTooLarge(len));
        }
        self.seq = seq.wrapping_add(1);
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload)?;
        Ok(payload)
    }

    pub fn write_packet(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        if payload.len() >= MAX_PACKET_LENGTH {
            return Err(ProtocolError::PacketTooLarge(payload.len()));
        }
        let [l0, l1, l2, _] = (payload.len() as u32).to_le_bytes();
        self.stream.write_all(&[l0, l1, l2, self.seq])?;
        self.stream.write_all(payload)?;
        self.seq = self.seq.wrapping_add(1);
        self.stream.flush()?;
        Ok(())
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}
