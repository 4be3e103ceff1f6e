// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Accounts allowed to talk to the manager, read from the password file.
//!
//! One account per line: `user:*<40 hex digits>`, the digits being
//! `SHA1(SHA1(password))` as printed by the server's `PASSWORD()` function.

use crate::protocol::SCRAMBLE_LENGTH;
use crate::protocol::scramble::{Digest20, check_scramble};
use anyhow::{Context, Result};
use log::{info, warn};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Default, Clone)]
pub struct UserMap {
    users: HashMap<String, Digest20>,
}

impl UserMap {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read password file {}", path.display()))?;
        let map = Self::parse(&text, path);
        info!("loaded {} user(s) from {}", map.users.len(), path.display());
        Ok(map)
    }

    fn parse(text: &str, path: &Path) -> Self {
        let mut users = HashMap::new();
        for (n, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_line(line) {
                Some((user, digest)) => {
                    users.insert(user.to_string(), digest);
                }
                None => warn!(
                    "{}:{}: malformed password entry, skipped",
                    path.display(),
                    n + 1
                ),
            }
        }
        Self { users }
    }

    #[cfg(test)]
    pub(crate) fn with_user(mut self, user: &str, password: &str) -> Self {
        self.users
            .insert(user.to_string(), crate::protocol::scramble::hash_stage2(password));
        self
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Checks the handshake token of `user` against the scramble that was
    /// sent in the greeting.
    pub fn authenticate(&self, user: &str, token: &[u8], scramble: &[u8]) -> bool {
        self.users
            .get(user)
            .is_some_and(|stage2| check_scramble(token, scramble, stage2))
    }
}

fn parse_line(line: &str) -> Option<(&str, Digest20)> {
    let (user, hash) = line.split_once(':')?;
    let hex_digits = hash.strip_prefix('*')?;
    if user.is_empty() || hex_digits.len() != SCRAMBLE_LENGTH * 2 {
        return None;
    }
    let mut digest = [0u8; SCRAMBLE_LENGTH];
    hex::decode_to_slice(hex_digits, &mut digest).ok()?;
    Some((user, digest))
}
