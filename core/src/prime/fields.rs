/*
 * fields.rs
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

//! Field encoding rules. A field is `id || length || payload` where the
//! width of the length prefix depends on the field id (and, for the
//! signature range, on the object type). Field 251 is the undefined
//! extension form: `id || name_len:u8 || name || payload_len:u16 ||
//! payload`.

use bytes::{BufMut, BytesMut};

use super::{ObjectType, PrimeError, FIXED_SIZE, MAX_1_BYTE, MAX_2_BYTE, MAX_3_BYTE};

/// Wire form of a field's length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLength {
    /// Signature field: no length prefix, payload is always 64 bytes.
    Fixed,
    Bytes1,
    Bytes2,
    Bytes3,
    /// Field 251: named extension with its own layout.
    Undefined,
}

impl FieldLength {
    pub fn prefix_bytes(self) -> usize {
        match self {
            FieldLength::Fixed => 0,
            FieldLength::Bytes1 => 1,
            FieldLength::Bytes2 => 2,
            FieldLength::Bytes3 => 3,
            FieldLength::Undefined => 0,
        }
    }
}

/// Length-prefix form for a field id within an object type. Field 0 and
/// the reserved signature range are illegal; which part of [5..15] is a
/// signature depends on the object type.
pub fn field_size_length(object: ObjectType, field: u8) -> Result<FieldLength, PrimeError> {
    if field == 0 {
        return Err(PrimeError::new("field id 0 is illegal"));
    }
    let signature_range: std::ops::RangeInclusive<u8> = match object {
        ObjectType::OrgSignet | ObjectType::OrgKey => 4..=4,
        ObjectType::UserSigningRequest | ObjectType::UserSignet | ObjectType::UserKey => 4..=6,
        _ => {
            return Err(PrimeError::new(format!(
                "{} objects do not carry fields",
                object.label()
            )))
        }
    };
    let reserved: std::ops::RangeInclusive<u8> = match object {
        ObjectType::OrgSignet | ObjectType::OrgKey => 5..=15,
        _ => 7..=15,
    };

    if signature_range.contains(&field) || field == 253 || field == 255 {
        Ok(FieldLength::Fixed)
    } else if reserved.contains(&field) {
        Err(PrimeError::new(format!("field id {} is reserved", field)))
    } else if (1..=3).contains(&field) || (16..=159).contains(&field) || field == 254 {
        Ok(FieldLength::Bytes1)
    } else if (160..=250).contains(&field) {
        Ok(FieldLength::Bytes2)
    } else if field == 251 {
        Ok(FieldLength::Undefined)
    } else if field == 252 {
        Ok(FieldLength::Bytes3)
    } else {
        Err(PrimeError::new(format!("field id {} is unassigned", field)))
    }
}

/// Maximum payload size for a field id within an object type.
pub fn field_size_max(object: ObjectType, field: u8) -> Result<usize, PrimeError> {
    Ok(match field_size_length(object, field)? {
        FieldLength::Fixed => FIXED_SIZE,
        FieldLength::Bytes1 => MAX_1_BYTE,
        FieldLength::Bytes2 => MAX_2_BYTE,
        FieldLength::Bytes3 => MAX_3_BYTE,
        FieldLength::Undefined => MAX_2_BYTE,
    })
}

/// Encode one field into the output buffer.
pub fn field_write(
    object: ObjectType,
    field: u8,
    payload: &[u8],
    out: &mut BytesMut,
) -> Result<(), PrimeError> {
    let form = field_size_length(object, field)?;
    if form == FieldLength::Undefined {
        return Err(PrimeError::new("undefined fields require a name, use field_write_undefined"));
    }
    if form == FieldLength::Fixed && payload.len() != FIXED_SIZE {
        return Err(PrimeError::new(format!(
            "fixed length field {} requires a {} byte payload, got {}",
            field,
            FIXED_SIZE,
            payload.len()
        )));
    }
    let max = field_size_max(object, field)?;
    if payload.len() > max {
        return Err(PrimeError::new(format!(
            "field {} payload of {} bytes exceeds the {} byte maximum",
            field,
            payload.len(),
            max
        )));
    }

    out.put_u8(field);
    match form {
        FieldLength::Fixed => {}
        FieldLength::Bytes1 => out.put_u8(payload.len() as u8),
        FieldLength::Bytes2 => out.put_u16(payload.len() as u16),
        FieldLength::Bytes3 => {
            let be = (payload.len() as u32).to_be_bytes();
            out.put_slice(&be[1..]);
        }
        FieldLength::Undefined => unreachable!(),
    }
    out.put_slice(payload);
    Ok(())
}

/// Encode a field 251 undefined extension.
pub fn field_write_undefined(name: &[u8], payload: &[u8], out: &mut BytesMut) -> Result<(), PrimeError> {
    if name.is_empty() || name.len() > MAX_1_BYTE {
        return Err(PrimeError::new("undefined field name must be 1 to 255 bytes"));
    }
    if payload.len() > MAX_2_BYTE {
        return Err(PrimeError::new("undefined field payload exceeds the 2 byte length maximum"));
    }
    out.put_u8(251);
    out.put_u8(name.len() as u8);
    out.put_slice(name);
    out.put_u16(payload.len() as u16);
    out.put_slice(payload);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_length_table() {
        assert_eq!(
            field_size_length(ObjectType::OrgSignet, 4).unwrap(),
            FieldLength::Fixed
        );
        // Field 5 is a signature for user types and reserved for orgs.
        assert_eq!(
            field_size_length(ObjectType::UserSignet, 5).unwrap(),
            FieldLength::Fixed
        );
        assert!(field_size_length(ObjectType::OrgSignet, 5).is_err());
        assert_eq!(
            field_size_length(ObjectType::OrgSignet, 1).unwrap(),
            FieldLength::Bytes1
        );
        assert_eq!(
            field_size_length(ObjectType::OrgSignet, 160).unwrap(),
            FieldLength::Bytes2
        );
        assert_eq!(
            field_size_length(ObjectType::OrgSignet, 252).unwrap(),
            FieldLength::Bytes3
        );
        assert_eq!(
            field_size_length(ObjectType::OrgSignet, 251).unwrap(),
            FieldLength::Undefined
        );
        assert!(field_size_length(ObjectType::OrgSignet, 0).is_err());
    }

    #[test]
    fn fixed_fields_require_64_bytes() {
        let mut out = BytesMut::new();
        assert!(field_write(ObjectType::OrgSignet, 4, &[0u8; 63], &mut out).is_err());
        assert!(field_write(ObjectType::OrgSignet, 4, &[0u8; 64], &mut out).is_ok());
        // No length prefix on the wire.
        assert_eq!(out.len(), 65);
        assert_eq!(out[0], 4);
    }

    #[test]
    fn one_byte_length_encoding() {
        let mut out = BytesMut::new();
        field_write(ObjectType::OrgSignet, 1, &[0xAA; 32], &mut out).unwrap();
        assert_eq!(&out[..2], &[1, 32]);
        assert_eq!(out.len(), 34);
    }

    #[test]
    fn three_byte_length_encoding() {
        let mut out = BytesMut::new();
        field_write(ObjectType::OrgSignet, 252, &[0u8; 300], &mut out).unwrap();
        assert_eq!(&out[..4], &[252, 0, 1, 44]);
    }

    #[test]
    fn undefined_field_layout() {
        let mut out = BytesMut::new();
        field_write_undefined(b"x-test", b"payload", &mut out).unwrap();
        assert_eq!(out[0], 251);
        assert_eq!(out[1], 6);
        assert_eq!(&out[2..8], b"x-test");
        assert_eq!(&out[8..10], &[0, 7]);
        assert_eq!(&out[10..], b"payload");
    }
}
