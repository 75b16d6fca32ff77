/*
 * mod.rs
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

//! PRIME object format: tagged binary encoding for keys, signets, and
//! encrypted message chunks. Objects are a 5 byte header (6 bytes for
//! messages) followed by id-tagged fields; chunks carry their own 4 byte
//! header and an AEAD-framed payload.

mod chunks;
mod fields;
mod keys;
mod object;
mod reader;
mod signets;

pub use chunks::{chunk_header_read, slot_unwrap, slot_wrap, ChunkType, EncryptedChunk};
pub use fields::{field_size_length, field_size_max, FieldLength};
pub use keys::{OrgKey, UserKey};
pub use object::{Field, PrimeObject};
pub use reader::Reader;
pub use signets::{OrgSignet, UserSignet, UserSigningRequest};

/// Fixed payload size of signature fields (no length prefix on the wire).
pub const FIXED_SIZE: usize = 64;

pub const MAX_1_BYTE: usize = 255;
pub const MAX_2_BYTE: usize = 65_535;
pub const MAX_3_BYTE: usize = 16_777_215;
pub const MAX_4_BYTE: usize = 4_294_967_295;

/// PRIME object types. The values come from the DIME specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ObjectType {
    OrgSignet = 1776,
    OrgKey = 1952,
    OrgKeyEncrypted = 1947,
    UserSigningRequest = 1215,
    UserSignet = 1789,
    UserKey = 2013,
    UserKeyEncrypted = 1976,
    MessageEncrypted = 1847,
}

impl ObjectType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1776 => Some(ObjectType::OrgSignet),
            1952 => Some(ObjectType::OrgKey),
            1947 => Some(ObjectType::OrgKeyEncrypted),
            1215 => Some(ObjectType::UserSigningRequest),
            1789 => Some(ObjectType::UserSignet),
            2013 => Some(ObjectType::UserKey),
            1976 => Some(ObjectType::UserKeyEncrypted),
            1847 => Some(ObjectType::MessageEncrypted),
            _ => None,
        }
    }

    /// Encrypted object types carry opaque payloads rather than fields.
    pub fn is_encrypted(self) -> bool {
        matches!(
            self,
            ObjectType::OrgKeyEncrypted | ObjectType::UserKeyEncrypted | ObjectType::MessageEncrypted
        )
    }

    /// Message objects use a 4 byte size in the header; everything else
    /// uses 3 bytes.
    pub fn header_length(self) -> usize {
        match self {
            ObjectType::MessageEncrypted => 6,
            _ => 5,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ObjectType::OrgSignet => "ORGANIZATIONAL SIGNET",
            ObjectType::OrgKey => "ORGANIZATIONAL KEY",
            ObjectType::OrgKeyEncrypted => "ENCRYPTED ORGANIZATIONAL KEY",
            ObjectType::UserSigningRequest => "USER SIGNING REQUEST",
            ObjectType::UserSignet => "USER SIGNET",
            ObjectType::UserKey => "USER KEY",
            ObjectType::UserKeyEncrypted => "ENCRYPTED USER KEY",
            ObjectType::MessageEncrypted => "ENCRYPTED MESSAGE",
        }
    }
}

/// PRIME encode/decode error. Decode failures are permanent: the object
/// is refused whole and no fields are applied.
#[derive(Debug)]
pub struct PrimeError {
    pub message: String,
}

impl PrimeError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { message: msg.into() }
    }
}

impl std::fmt::Display for PrimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for PrimeError {}
