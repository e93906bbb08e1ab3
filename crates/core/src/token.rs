// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Player bearer credential minting and salted-hash lookup. The raw
//! credential is generated with a CSPRNG and returned exactly once at
//! admission; everything after that looks it up by its salted hash.

use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};

/// Fixed application-wide salt prefix. Paired with per-token entropy this is
/// not a password hash (no per-user salt needed — the raw token already has
/// 256 bits of entropy), just a one-way map so the raw value never touches
/// the database.
const SALT: &[u8] = b"claw-player-token-v1:";

/// Mint a new raw bearer credential: 32 random bytes, hex-encoded.
pub fn mint() -> anyhow::Result<String> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes).map_err(|_| anyhow::anyhow!("CSPRNG unavailable"))?;
    Ok(hex_encode(&bytes))
}

/// Salted SHA-256 hash of a raw credential, for durable lookup.
pub fn hash(raw: &str) -> String {
    let mut input = Vec::with_capacity(SALT.len() + raw.len());
    input.extend_from_slice(SALT);
    input.extend_from_slice(raw.as_bytes());
    let digest = digest::digest(&digest::SHA256, &input);
    hex_encode(digest.as_ref())
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}
