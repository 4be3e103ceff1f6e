// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Growable byte buffer used to assemble outgoing packets.

use thiserror::Error;

/// Hard ceiling on the buffer size.
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;
const DEFAULT_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("buffer cannot hold {requested} bytes (limit is {MAX_BUFFER_SIZE})")]
pub struct BufferError {
    pub requested: usize,
}

#[derive(Debug, Clone)]
pub struct Buffer {
    data: Vec<u8>,
    capacity: usize,
    error: bool,
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Buffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_BUFFER_SIZE);
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
            error: false,
        }
    }

    /// Makes room for `len` bytes at `position`. Capacity grows by a factor of
    /// 1.5 until it fits. Reaching the ceiling fails and latches the error
    /// flag.
    pub fn reserve(&mut self, position: usize, len: usize) -> Result<(), BufferError> {
        let needed = position.saturating_add(len);
        if needed >= MAX_BUFFER_SIZE {
            self.error = true;
            return Err(BufferError { requested: needed });
        }
        if needed > self.capacity {
            let mut capacity = self.capacity;
            while capacity < needed {
                capacity = (capacity + capacity / 2).max(capacity + 1);
            }
            let capacity = capacity.min(MAX_BUFFER_SIZE);
            self.data.reserve_exact(capacity - self.data.len());
            self.capacity = capacity;
        }
        Ok(())
    }

    /// Writes `bytes` at `position`, overwriting what is there and zero-filling
    /// any gap. Returns the position just past the written bytes.
    pub fn append(&mut self, position: usize, bytes: &[u8]) -> Result<usize, BufferError> {
        self.reserve(position, bytes.len())?;
        let end = position + bytes.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data
            .get_mut(position..end)
            .ok_or(BufferError { requested: end })?
            .copy_from_slice(bytes);
        Ok(end)
    }

    pub fn push(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.append(self.data.len(), bytes).map(|_| ())
    }

    pub fn push_u8(&mut self, value: u8) -> Result<(), BufferError> {
        self.push(&[value])
    }

    pub fn push_u16(&mut self, value: u16) -> Result<(), BufferError> {
        self.push(&value.to_le_bytes())
    }

    pub fn push_u32(&mut self, value: u32) -> Result<(), BufferError> {
        self.push(&value.to_le_bytes())
    }

    /// Length-encoded integer.
    pub fn push_lenenc_int(&mut self, value: u64) -> Result<(), BufferError> {
        match value {
            0..=250 => self.push_u8(value as u8),
            251..=0xFFFF => {
                self.push_u8(0xfc)?;
                self.push(&(value as u16).to_le_bytes())
            }
            0x1_0000..=0xFF_FFFF => {
                self.push_u8(0xfd)?;
                let [b0, b1, b2, _] = (value as u32).to_le_bytes();
                self.push(&[b0, b1, b2])
            }
            _ => {
                self.push_u8(0xfe)?;
                self.push(&value.to_le_bytes())
            }
        }
    }

    pub fn push_lenenc_bytes(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.push_lenenc_int(bytes.len() as u64)?;
        self.push(bytes)
    }

    pub fn push_nul_str(&mut self, s: &str) -> Result<(), BufferError> {
        self.push(s.as_bytes())?;
        self.push_u8(0)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}
