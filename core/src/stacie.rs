/*
 * stacie.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Magma, a multi-protocol mail server.
 *
 * Magma is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Magma is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Magma.  If not, see <http://www.gnu.org/licenses/>.
 */

//! STACIE credential derivation (Safely Turning Authentication
//! Credentials Into Entropy). Six deterministic stages turn a password
//! into keys and tokens the server can verify without ever storing the
//! password: round selection, seed, password key, tokens, realm key,
//! and realm material. Every derived value is exactly 64 bytes.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha512};

type HmacSha512 = Hmac<Sha512>;

/// Hash rounds are clamped to the range a 24-bit counter can express.
pub const KEY_ROUNDS_MIN: u32 = 8;
pub const KEY_ROUNDS_MAX: u32 = 16_777_216;

/// Token derivation always runs a fixed number of rounds.
pub const TOKEN_ROUNDS: u32 = 8;

pub const SALT_LENGTH: usize = 128;
pub const NONCE_LENGTH: usize = 128;
pub const SHARD_LENGTH: usize = 64;
pub const KEY_LENGTH: usize = 64;

/// STACIE derivation error (bad input length, empty credential).
#[derive(Debug)]
pub struct StacieError {
    pub message: String,
}

impl StacieError {
    fn new(msg: impl Into<String>) -> Self {
        Self { message: msg.into() }
    }
}

impl std::fmt::Display for StacieError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StacieError {}

/// Estimate password entropy in bits. Deterministic: the pool is the sum
/// of the character-class sizes present (lower 26, upper 26, digit 10,
/// other 33) and the estimate is `floor(len * log2(pool))`.
pub fn entropy_bits(password: &str) -> u32 {
    let (mut lower, mut upper, mut digit, mut other) = (false, false, false, false);
    for c in password.chars() {
        if c.is_ascii_lowercase() {
            lower = true;
        } else if c.is_ascii_uppercase() {
            upper = true;
        } else if c.is_ascii_digit() {
            digit = true;
        } else {
            other = true;
        }
    }
    let mut pool = 0u32;
    if lower {
        pool += 26;
    }
    if upper {
        pool += 26;
    }
    if digit {
        pool += 10;
    }
    if other {
        pool += 33;
    }
    if pool == 0 {
        return 0;
    }
    let bits = password.chars().count() as f64 * (pool as f64).log2();
    bits as u32
}

/// Select the hash round count for a password: weak passwords stretch
/// harder. `2^(24 - entropy_bits) + bonus`, clamped to
/// [[`KEY_ROUNDS_MIN`], [`KEY_ROUNDS_MAX`]].
pub fn derive_rounds(password: &str, bonus: u32) -> u32 {
    let bits = entropy_bits(password);
    let base: u64 = if bits >= 24 { 0 } else { 1u64 << (24 - bits) };
    let total = base.saturating_add(bonus as u64);
    total.clamp(KEY_ROUNDS_MIN as u64, KEY_ROUNDS_MAX as u64) as u32
}

/// Stage two: the seed is a single HMAC-SHA-512 of the password keyed by
/// the 128 byte salt.
pub fn derive_seed(password: &str, salt: &[u8]) -> Result<[u8; KEY_LENGTH], StacieError> {
    if password.is_empty() {
        return Err(StacieError::new("seed derivation requires a password"));
    }
    if salt.len() != SALT_LENGTH {
        return Err(StacieError::new(format!(
            "seed derivation requires a {} byte salt, got {}",
            SALT_LENGTH,
            salt.len()
        )));
    }
    let mut mac = HmacSha512::new_from_slice(salt)
        .map_err(|_| StacieError::new("HMAC initialization failed"))?;
    mac.update(password.as_bytes());
    let mut out = [0u8; KEY_LENGTH];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Three byte big endian round counter, matching the wire order used by
/// every hashing stage.
fn be24(count: u32) -> [u8; 3] {
    let be = count.to_be_bytes();
    [be[1], be[2], be[3]]
}

/// Stage three: stretch the seed into the password key. Each round
/// hashes `prev || base || password || username || salt || be24(round)`,
/// with the previous output omitted on the first round.
pub fn derive_key(
    base: &[u8; KEY_LENGTH],
    rounds: u32,
    username: &str,
    password: &str,
    salt: &[u8],
) -> Result<[u8; KEY_LENGTH], StacieError> {
    if username.is_empty() || password.is_empty() {
        return Err(StacieError::new("key derivation requires a username and password"));
    }
    if salt.len() != SALT_LENGTH {
        return Err(StacieError::new(format!(
            "key derivation requires a {} byte salt, got {}",
            SALT_LENGTH,
            salt.len()
        )));
    }
    if !(KEY_ROUNDS_MIN..=KEY_ROUNDS_MAX).contains(&rounds) {
        return Err(StacieError::new(format!("round count {} outside the permitted range", rounds)));
    }

    let mut key = [0u8; KEY_LENGTH];
    for count in 0..rounds {
        let mut hasher = Sha512::new();
        if count != 0 {
            hasher.update(key);
        }
        hasher.update(base);
        hasher.update(password.as_bytes());
        hasher.update(username.as_bytes());
        hasher.update(salt);
        hasher.update(be24(count));
        key.copy_from_slice(&hasher.finalize());
    }
    Ok(key)
}

/// Stage four: derive a token from a 64 byte base over a fixed 8 rounds.
/// The base is the password key for the static verification token, or
/// the verification token (plus a single-use 128 byte nonce) for an
/// ephemeral login token.
pub fn derive_token(
    base: &[u8; KEY_LENGTH],
    username: &str,
    salt: &[u8],
    nonce: Option<&[u8]>,
) -> Result<[u8; KEY_LENGTH], StacieError> {
    if username.is_empty() {
        return Err(StacieError::new("token derivation requires a username"));
    }
    if salt.len() != SALT_LENGTH {
        return Err(StacieError::new(format!(
            "token derivation requires a {} byte salt, got {}",
            SALT_LENGTH,
            salt.len()
        )));
    }
    if let Some(n) = nonce {
        if n.len() != NONCE_LENGTH {
            return Err(StacieError::new(format!(
                "token derivation requires a {} byte nonce, got {}",
                NONCE_LENGTH,
                n.len()
            )));
        }
    }

    let mut token = [0u8; KEY_LENGTH];
    for count in 0..TOKEN_ROUNDS {
        let mut hasher = Sha512::new();
        if count != 0 {
            hasher.update(token);
        }
        hasher.update(base);
        hasher.update(username.as_bytes());
        hasher.update(salt);
        if let Some(n) = nonce {
            hasher.update(n);
        }
        hasher.update(be24(count));
        token.copy_from_slice(&hasher.finalize());
    }
    Ok(token)
}

/// Stage five: combine the master key with the realm label, the user
/// salt, and the 64 byte realm shard.
pub fn realm_key(
    master_key: &[u8; KEY_LENGTH],
    realm: &str,
    salt: &[u8],
    shard: &[u8],
) -> Result<[u8; KEY_LENGTH], StacieError> {
    if realm.is_empty() {
        return Err(StacieError::new("realm key derivation requires a realm label"));
    }
    if salt.len() != SALT_LENGTH {
        return Err(StacieError::new(format!(
            "realm key derivation requires a {} byte salt, got {}",
            SALT_LENGTH,
            salt.len()
        )));
    }
    if shard.len() != SHARD_LENGTH {
        return Err(StacieError::new(format!(
            "realm key derivation requires a {} byte shard, got {}",
            SHARD_LENGTH,
            shard.len()
        )));
    }
    let mut mac = HmacSha512::new_from_slice(master_key)
        .map_err(|_| StacieError::new("HMAC initialization failed"))?;
    mac.update(realm.as_bytes());
    mac.update(salt);
    mac.update(shard);
    let mut out = [0u8; KEY_LENGTH];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Stage six: split a realm key into the symmetric material via
/// domain-separated hashing.
fn realm_split(realm_key: &[u8; KEY_LENGTH], tag: &str, take: usize) -> Vec<u8> {
    let mut hasher = Sha512::new();
    hasher.update(realm_key);
    hasher.update(tag.as_bytes());
    hasher.finalize()[..take].to_vec()
}

/// First 32 bytes of `SHA-512(realm_key || "cipher")`.
pub fn realm_cipher_key(realm_key: &[u8; KEY_LENGTH]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&realm_split(realm_key, "cipher", 32));
    out
}

/// First 16 bytes of `SHA-512(realm_key || "vector")`.
pub fn realm_vector(realm_key: &[u8; KEY_LENGTH]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&realm_split(realm_key, "vector", 16));
    out
}

/// First 32 bytes of `SHA-512(realm_key || "tag")`.
pub fn realm_tag_key(realm_key: &[u8; KEY_LENGTH]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&realm_split(realm_key, "tag", 32));
    out
}

fn random_exact(len: usize) -> Result<Vec<u8>, StacieError> {
    let mut out = vec![0u8; len];
    getrandom::getrandom(&mut out)
        .map_err(|e| StacieError::new(format!("random generation failed: {}", e)))?;
    Ok(out)
}

/// Fresh 128 byte salt from the platform CSPRNG.
pub fn create_salt() -> Result<Vec<u8>, StacieError> {
    random_exact(SALT_LENGTH)
}

/// Fresh 128 byte single-use nonce.
pub fn create_nonce() -> Result<Vec<u8>, StacieError> {
    random_exact(NONCE_LENGTH)
}

/// Fresh 64 byte realm shard.
pub fn create_shard() -> Result<Vec<u8>, StacieError> {
    random_exact(SHARD_LENGTH)
}

/// Constant-time comparison for verification tokens.
pub fn tokens_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn salt() -> Vec<u8> {
        vec![0u8; SALT_LENGTH]
    }

    #[test]
    fn rounds_clamp() {
        // Empty password: zero entropy, maximum stretch.
        assert_eq!(derive_rounds("", 0), KEY_ROUNDS_MAX);
        // A long mixed password collapses to the floor.
        assert_eq!(derive_rounds("CorrectHorseBattery1!Staple", 0), KEY_ROUNDS_MIN);
        // The bonus raises the floor.
        assert_eq!(derive_rounds("CorrectHorseBattery1!Staple", 128), 128);
        assert!(derive_rounds("a", 0) <= KEY_ROUNDS_MAX);
    }

    #[test]
    fn entropy_counts_character_classes() {
        assert!(entropy_bits("password") < entropy_bits("Password1!"));
        assert_eq!(entropy_bits(""), 0);
    }

    #[test]
    fn derivation_is_deterministic() {
        let seed = derive_seed("password", &salt()).unwrap();
        let key_a = derive_key(&seed, 8, "user", "password", &salt()).unwrap();
        let key_b = derive_key(&seed, 8, "user", "password", &salt()).unwrap();
        assert_eq!(key_a, key_b);

        let token_a = derive_token(&key_a, "user", &salt(), None).unwrap();
        let token_b = derive_token(&key_a, "user", &salt(), None).unwrap();
        assert_eq!(token_a, token_b);
    }

    #[test]
    fn inputs_change_outputs() {
        let seed = derive_seed("password", &salt()).unwrap();
        let key = derive_key(&seed, 8, "user", "password", &salt()).unwrap();
        let other_user = derive_key(&seed, 8, "user2", "password", &salt()).unwrap();
        let other_rounds = derive_key(&seed, 9, "user", "password", &salt()).unwrap();
        assert_ne!(key, other_user);
        assert_ne!(key, other_rounds);
        assert_ne!(key, seed);
    }

    #[test]
    fn nonce_changes_token() {
        let seed = derive_seed("password", &salt()).unwrap();
        let key = derive_key(&seed, 8, "user", "password", &salt()).unwrap();
        let plain = derive_token(&key, "user", &salt(), None).unwrap();
        let nonce = vec![7u8; NONCE_LENGTH];
        let login = derive_token(&key, "user", &salt(), Some(&nonce)).unwrap();
        assert_ne!(plain, login);
    }

    #[test]
    fn length_violations_fail() {
        assert!(derive_seed("password", &[0u8; 64]).is_err());
        let seed = derive_seed("password", &salt()).unwrap();
        assert!(derive_key(&seed, 7, "user", "password", &salt()).is_err());
        assert!(derive_key(&seed, 8, "", "password", &salt()).is_err());
        assert!(derive_token(&seed, "user", &salt(), Some(&[0u8; 4])).is_err());
        assert!(realm_key(&seed, "mail", &salt(), &[0u8; 16]).is_err());
    }

    #[test]
    fn realm_material_sizes_and_separation() {
        let seed = derive_seed("password", &salt()).unwrap();
        let master = derive_key(&seed, 8, "user", "password", &salt()).unwrap();
        let shard = vec![3u8; SHARD_LENGTH];
        let realm = realm_key(&master, "mail", &salt(), &shard).unwrap();
        let cipher = realm_cipher_key(&realm);
        let vector = realm_vector(&realm);
        let tag = realm_tag_key(&realm);
        assert_ne!(cipher, tag);
        assert_ne!(&cipher[..16], &vector[..]);
    }

    #[test]
    fn random_material_lengths() {
        assert_eq!(create_salt().unwrap().len(), SALT_LENGTH);
        assert_eq!(create_nonce().unwrap().len(), NONCE_LENGTH);
        assert_eq!(create_shard().unwrap().len(), SHARD_LENGTH);
    }

    #[test]
    fn constant_time_compare() {
        assert!(tokens_equal(b"abc", b"abc"));
        assert!(!tokens_equal(b"abc", b"abd"));
        assert!(!tokens_equal(b"abc", b"abcd"));
    }
}
