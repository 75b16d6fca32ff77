/*
 * chunks.rs
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

//! Encrypted message chunks. Each chunk is independently signed and
//! encrypted: `type:u8 || size:u24 BE || tag(16) || ciphertext`, where
//! the plaintext frame is `signature(64) || data_len:u24 || flags:u8 ||
//! pad_len:u8 || data || pad`. The frame length past the signature block
//! must land on a 16 byte boundary, and small frames are padded up to
//! 256 bytes so chunk sizes leak less.

use aes::cipher::{KeyIvInit, StreamCipher};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use secp256k1::ecdh::SharedSecret;
use secp256k1::{PublicKey, SecretKey};
use sha2::{Digest, Sha512};

use crate::stacie::tokens_equal;

use super::{PrimeError, MAX_3_BYTE};

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;
type HmacSha512 = Hmac<Sha512>;

/// Fixed frame overhead: 64 signature + 3 length + 1 flags + 1 pad.
const FRAME_OVERHEAD: usize = 69;
const MIN_FRAME: usize = 256;
const TAG_LENGTH: usize = 16;

/// The largest data payload a single chunk can carry, leaving room for
/// the tag, the frame overhead, and the 3 byte chunk size.
pub const MAX_CHUNK_DATA: usize = MAX_3_BYTE - 100;

/// Chunk type identifiers within an encrypted message stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChunkType {
    Envelope = 1,
    Ephemeral = 2,
    Origin = 3,
    Destination = 4,
    Metadata = 32,
    Common = 33,
    Headers = 34,
    Body = 48,
    Signatures = 224,
    SignatureTree = 225,
    SignatureAuthor = 226,
    SignatureOrigin = 227,
    SignatureDestination = 228,
}

impl ChunkType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(ChunkType::Envelope),
            2 => Some(ChunkType::Ephemeral),
            3 => Some(ChunkType::Origin),
            4 => Some(ChunkType::Destination),
            32 => Some(ChunkType::Metadata),
            33 => Some(ChunkType::Common),
            34 => Some(ChunkType::Headers),
            48 => Some(ChunkType::Body),
            224 => Some(ChunkType::Signatures),
            225 => Some(ChunkType::SignatureTree),
            226 => Some(ChunkType::SignatureAuthor),
            227 => Some(ChunkType::SignatureOrigin),
            228 => Some(ChunkType::SignatureDestination),
            _ => None,
        }
    }
}

fn be24(len: usize) -> [u8; 3] {
    let be = (len as u32).to_be_bytes();
    [be[1], be[2], be[3]]
}

/// Read a chunk header: type byte plus 3 byte big endian payload size.
pub fn chunk_header_read(data: &[u8]) -> Result<(ChunkType, usize), PrimeError> {
    if data.len() < 4 {
        return Err(PrimeError::new("chunk shorter than its header"));
    }
    let chunk_type = ChunkType::from_u8(data[0])
        .ok_or_else(|| PrimeError::new(format!("unrecognized chunk type {}", data[0])))?;
    let size = ((data[1] as usize) << 16) | ((data[2] as usize) << 8) | data[3] as usize;
    Ok((chunk_type, size))
}

/// One sealed chunk plus the key material needed to open it. The key is
/// wrapped per recipient through [`slot_wrap`] before transmission.
pub struct EncryptedChunk {
    pub chunk_type: ChunkType,
    pub encoded: Vec<u8>,
    pub chunk_key: [u8; 32],
}

impl EncryptedChunk {
    /// Frame, sign, pad, and encrypt a payload into a chunk.
    pub fn seal(
        chunk_type: ChunkType,
        data: &[u8],
        signing: &SigningKey,
    ) -> Result<Self, PrimeError> {
        if data.is_empty() || data.len() > MAX_CHUNK_DATA {
            return Err(PrimeError::new(format!(
                "chunk data must be 1 to {} bytes, got {}",
                MAX_CHUNK_DATA,
                data.len()
            )));
        }

        // Pad to a 16 byte boundary past the signature block, then up to
        // the 256 byte floor.
        let mut pad = (16 - ((data.len() + FRAME_OVERHEAD) % 16)) % 16;
        if data.len() + pad + FRAME_OVERHEAD < MIN_FRAME {
            pad += MIN_FRAME - (data.len() + pad + FRAME_OVERHEAD);
        }

        let frame_len = FRAME_OVERHEAD + data.len() + pad;
        let mut frame = vec![0u8; frame_len];
        frame[64..67].copy_from_slice(&be24(data.len()));
        frame[67] = 0; // flags
        frame[68] = pad as u8;
        frame[FRAME_OVERHEAD..FRAME_OVERHEAD + data.len()].copy_from_slice(data);
        for byte in &mut frame[FRAME_OVERHEAD + data.len()..] {
            *byte = pad as u8;
        }

        let signature = signing.sign(&frame[64..]);
        frame[..64].copy_from_slice(&signature.to_bytes());

        let mut chunk_key = [0u8; 32];
        getrandom::getrandom(&mut chunk_key)
            .map_err(|e| PrimeError::new(format!("chunk key generation failed: {}", e)))?;
        let stretched = Sha512::digest(chunk_key);

        let mut cipher = Aes256Ctr::new_from_slices(&stretched[..32], &stretched[32..48])
            .map_err(|_| PrimeError::new("chunk cipher initialization failed"))?;
        cipher.apply_keystream(&mut frame);

        let mut mac = HmacSha512::new_from_slice(&stretched[48..64])
            .map_err(|_| PrimeError::new("chunk tag initialization failed"))?;
        mac.update(&frame);
        let tag = mac.finalize().into_bytes();

        let mut encoded = Vec::with_capacity(4 + TAG_LENGTH + frame.len());
        encoded.push(chunk_type as u8);
        encoded.extend_from_slice(&be24(TAG_LENGTH + frame.len()));
        encoded.extend_from_slice(&tag[..TAG_LENGTH]);
        encoded.extend_from_slice(&frame);

        Ok(Self { chunk_type, encoded, chunk_key })
    }

    /// Authenticate, decrypt, and verify a chunk, returning the payload.
    /// Any mismatch (tag, framing, padding, signature) refuses the chunk
    /// whole.
    pub fn open(
        encoded: &[u8],
        chunk_key: &[u8; 32],
        signing: &VerifyingKey,
    ) -> Result<Vec<u8>, PrimeError> {
        let (_, size) = chunk_header_read(encoded)?;
        let blob = &encoded[4..];
        if blob.len() != size {
            return Err(PrimeError::new("chunk header size does not match the payload"));
        }
        if blob.len() < TAG_LENGTH + FRAME_OVERHEAD {
            return Err(PrimeError::new("chunk payload too short to hold a frame"));
        }

        let stretched = Sha512::digest(chunk_key);
        let (tag, ciphertext) = blob.split_at(TAG_LENGTH);

        let mut mac = HmacSha512::new_from_slice(&stretched[48..64])
            .map_err(|_| PrimeError::new("chunk tag initialization failed"))?;
        mac.update(ciphertext);
        let expected = mac.finalize().into_bytes();
        if !tokens_equal(tag, &expected[..TAG_LENGTH]) {
            return Err(PrimeError::new("chunk authentication tag mismatch"));
        }

        let mut frame = ciphertext.to_vec();
        let mut cipher = Aes256Ctr::new_from_slices(&stretched[..32], &stretched[32..48])
            .map_err(|_| PrimeError::new("chunk cipher initialization failed"))?;
        cipher.apply_keystream(&mut frame);

        let data_len =
            ((frame[64] as usize) << 16) | ((frame[65] as usize) << 8) | frame[66] as usize;
        let pad = frame[68] as usize;
        if FRAME_OVERHEAD + data_len + pad != frame.len() {
            return Err(PrimeError::new("chunk frame lengths are inconsistent"));
        }
        if (data_len + pad + FRAME_OVERHEAD) % 16 != 0 {
            return Err(PrimeError::new("chunk frame is not block aligned"));
        }
        if frame.len() < MIN_FRAME {
            return Err(PrimeError::new("chunk frame below the minimum padded size"));
        }
        if frame[FRAME_OVERHEAD + data_len..].iter().any(|&b| b as usize != pad) {
            return Err(PrimeError::new("chunk padding bytes are malformed"));
        }

        let signature_bytes: [u8; 64] = frame[..64]
            .try_into()
            .map_err(|_| PrimeError::new("chunk signature block truncated"))?;
        let signature = Signature::from_bytes(&signature_bytes);
        signing
            .verify(&frame[64..], &signature)
            .map_err(|_| PrimeError::new("chunk signature is invalid"))?;

        Ok(frame[FRAME_OVERHEAD..FRAME_OVERHEAD + data_len].to_vec())
    }
}

/// Wrap a chunk key for one actor: XOR against the stretched ECDH shared
/// secret between our private key and their public key.
pub fn slot_wrap(chunk_key: &[u8; 32], our: &SecretKey, their: &PublicKey) -> [u8; 32] {
    let shared = SharedSecret::new(their, our);
    let stretched = Sha512::digest(shared.secret_bytes());
    let mut slot = [0u8; 32];
    for (i, byte) in slot.iter_mut().enumerate() {
        *byte = chunk_key[i] ^ stretched[i];
    }
    slot
}

/// Recover a chunk key from a slot. XOR is its own inverse, so this is
/// `slot_wrap` from the other side of the exchange.
pub fn slot_unwrap(slot: &[u8; 32], our: &SecretKey, their: &PublicKey) -> [u8; 32] {
    slot_wrap(slot, our, their)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prime::keys::{OrgKey, UserKey};

    fn signer() -> SigningKey {
        SigningKey::from_bytes(&[42u8; 32])
    }

    #[test]
    fn seal_open_round_trip() {
        let signing = signer();
        let data = b"From: alice@example.com\r\nTo: bob@example.com\r\n";
        let chunk = EncryptedChunk::seal(ChunkType::Headers, data, &signing).unwrap();
        let opened =
            EncryptedChunk::open(&chunk.encoded, &chunk.chunk_key, &signing.verifying_key())
                .unwrap();
        assert_eq!(opened, data);
    }

    #[test]
    fn frames_are_block_aligned_and_padded() {
        let signing = signer();
        let chunk = EncryptedChunk::seal(ChunkType::Body, b"x", &signing).unwrap();
        let (_, size) = chunk_header_read(&chunk.encoded).unwrap();
        // Tag plus a frame padded up to the 256 byte floor.
        assert_eq!(size, TAG_LENGTH + MIN_FRAME);

        let big = vec![7u8; 1000];
        let chunk = EncryptedChunk::seal(ChunkType::Body, &big, &signing).unwrap();
        let (_, size) = chunk_header_read(&chunk.encoded).unwrap();
        assert_eq!((size - TAG_LENGTH) % 16, 0);
    }

    #[test]
    fn wrong_key_rejected_by_tag() {
        let signing = signer();
        let chunk = EncryptedChunk::seal(ChunkType::Body, b"secret", &signing).unwrap();
        let mut wrong = chunk.chunk_key;
        wrong[0] ^= 1;
        let err = EncryptedChunk::open(&chunk.encoded, &wrong, &signing.verifying_key());
        assert!(err.is_err());
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let signing = signer();
        let chunk = EncryptedChunk::seal(ChunkType::Body, b"secret", &signing).unwrap();
        let mut encoded = chunk.encoded.clone();
        let last = encoded.len() - 1;
        encoded[last] ^= 0x80;
        assert!(
            EncryptedChunk::open(&encoded, &chunk.chunk_key, &signing.verifying_key()).is_err()
        );
    }

    #[test]
    fn signature_from_other_key_rejected() {
        let signing = signer();
        let other = SigningKey::from_bytes(&[9u8; 32]);
        let chunk = EncryptedChunk::seal(ChunkType::Body, b"secret", &signing).unwrap();
        assert!(
            EncryptedChunk::open(&chunk.encoded, &chunk.chunk_key, &other.verifying_key()).is_err()
        );
    }

    #[test]
    fn empty_payload_rejected() {
        let signing = signer();
        assert!(EncryptedChunk::seal(ChunkType::Body, b"", &signing).is_err());
    }

    #[test]
    fn key_slots_round_trip() {
        let author = UserKey::generate().unwrap();
        let org = OrgKey::generate().unwrap();
        let chunk_key = [13u8; 32];

        let slot = slot_wrap(&chunk_key, &author.encryption, &org.encryption_public());
        let recovered = slot_unwrap(&slot, &org.encryption, &author.encryption_public());
        assert_eq!(recovered, chunk_key);
        assert_ne!(slot, chunk_key);
    }
}
