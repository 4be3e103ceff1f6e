// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Native password authentication (the 4.1 "secure connection" scheme).
//!
//! The server stores `stage2 = SHA1(SHA1(password))`. The client sends
//! `token = SHA1(password) XOR SHA1(scramble || stage2)`. The server recovers
//! the candidate `SHA1(password)` by XOR-ing the token with
//! `SHA1(scramble || stage2)` and accepts when hashing it yields `stage2`.

use super::SCRAMBLE_LENGTH;
use rand::Rng;
use sha1::{Digest, Sha1};

pub type Digest20 = [u8; SCRAMBLE_LENGTH];

fn sha1(parts: &[&[u8]]) -> Digest20 {
    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; SCRAMBLE_LENGTH];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn xor(a: &Digest20, b: &Digest20) -> Digest20 {
    let mut out = [0u8; SCRAMBLE_LENGTH];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
        *o = x ^ y;
    }
    out
}

/// Twenty random printable ASCII characters. The greeting sends them as
/// NUL-terminated strings, so NUL must never appear.
pub fn random_scramble() -> Digest20 {
    let mut rng = rand::thread_rng();
    let mut out = [0u8; SCRAMBLE_LENGTH];
    for b in &mut out {
        *b = rng.gen_range(33u8..127);
    }
    out
}

/// `SHA1(SHA1(password))`, the form stored in the password file.
pub fn hash_stage2(password: &str) -> Digest20 {
    let stage1 = sha1(&[password.as_bytes()]);
    sha1(&[&stage1])
}

/// Client side: the token sent in the handshake response.
pub fn scramble_password(scramble: &[u8], password: &str) -> Digest20 {
    let stage1 = sha1(&[password.as_bytes()]);
    let stage2 = sha1(&[&stage1]);
    let mask = sha1(&[scramble, &stage2]);
    xor(&stage1, &mask)
}

/// Server side: verifies `token` against the stored `stage2` hash.
pub fn check_scramble(token: &[u8], scramble: &[u8], stage2: &Digest20) -> bool {
    let Ok(token) = <&Digest20>::try_from(token) else {
        return false;
    };
    let mask = sha1(&[scramble, stage2]);
    let candidate = xor(token, &mask);
    sha1(&[&candidate]) == *stage2
}
