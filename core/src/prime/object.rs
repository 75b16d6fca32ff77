/*
 * object.rs
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

//! Whole-object pack and unpack. An object is a header (`type:u16 BE ||
//! size:u24 BE`, or `u32` for messages) followed by its fields. Parsing
//! is all-or-nothing: a malformed object is refused without applying any
//! field.

use bytes::{BufMut, BytesMut};

use super::fields::{field_size_length, field_write, field_write_undefined, FieldLength};
use super::reader::Reader;
use super::{ObjectType, PrimeError, FIXED_SIZE};

/// One parsed field. Undefined (251) fields keep their name so they can
/// be re-encoded verbatim when the object is forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub id: u8,
    pub name: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

impl Field {
    pub fn new(id: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self { id, name: None, payload: payload.into() }
    }

    pub fn undefined(name: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) -> Self {
        Self { id: 251, name: Some(name.into()), payload: payload.into() }
    }
}

/// A parsed (or assembled) PRIME object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimeObject {
    pub object_type: ObjectType,
    pub fields: Vec<Field>,
}

impl PrimeObject {
    pub fn new(object_type: ObjectType) -> Self {
        Self { object_type, fields: Vec::new() }
    }

    /// First field with the given id.
    pub fn field(&self, id: u8) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Serialize the fields without the object header.
    pub fn pack_fields(&self) -> Result<BytesMut, PrimeError> {
        let mut out = BytesMut::new();
        for field in &self.fields {
            if field.id == 251 {
                let name = field
                    .name
                    .as_deref()
                    .ok_or_else(|| PrimeError::new("undefined field is missing its name"))?;
                field_write_undefined(name, &field.payload, &mut out)?;
            } else {
                field_write(self.object_type, field.id, &field.payload, &mut out)?;
            }
        }
        Ok(out)
    }

    /// Serialize the whole object, header included.
    pub fn pack(&self) -> Result<Vec<u8>, PrimeError> {
        let body = self.pack_fields()?;
        let mut out = BytesMut::with_capacity(self.object_type.header_length() + body.len());
        out.put_u16(self.object_type as u16);
        match self.object_type {
            ObjectType::MessageEncrypted => out.put_u32(body.len() as u32),
            _ => {
                if body.len() > super::MAX_3_BYTE {
                    return Err(PrimeError::new("object body exceeds the 3 byte header size"));
                }
                let be = (body.len() as u32).to_be_bytes();
                out.put_slice(&be[1..]);
            }
        }
        out.put_slice(&body);
        Ok(out.to_vec())
    }

    /// Parse an object. Enforces: a known type, a header size matching
    /// the body, non-decreasing field ids, and per-id uniqueness (251
    /// may repeat). Encrypted object types are refused here; their
    /// payloads are chunk streams, not fields.
    pub fn unpack(data: &[u8]) -> Result<PrimeObject, PrimeError> {
        if data.len() < 5 {
            return Err(PrimeError::new("object shorter than its header"));
        }
        let raw_type = u16::from_be_bytes([data[0], data[1]]);
        let object_type = ObjectType::from_u16(raw_type)
            .ok_or_else(|| PrimeError::new(format!("unrecognized object type {}", raw_type)))?;
        if object_type.is_encrypted() && object_type != ObjectType::MessageEncrypted {
            return Err(PrimeError::new(format!(
                "{} objects are opaque and cannot be unpacked into fields",
                object_type.label()
            )));
        }
        if object_type == ObjectType::MessageEncrypted {
            return Err(PrimeError::new("encrypted messages are parsed as chunk streams"));
        }

        let size = ((data[2] as usize) << 16) | ((data[3] as usize) << 8) | data[4] as usize;
        let body = &data[5..];
        if body.len() != size {
            return Err(PrimeError::new(format!(
                "header declares {} body bytes but {} are present",
                size,
                body.len()
            )));
        }

        let mut reader = Reader::new(body);
        let mut fields = Vec::new();
        let mut previous: Option<u8> = None;
        while let Some(id) = reader.read_type() {
            if let Some(prev) = previous {
                if id < prev {
                    return Err(PrimeError::new(format!(
                        "field {} appears after field {}, ids must not decrease",
                        id, prev
                    )));
                }
                if id == prev && id != 251 {
                    return Err(PrimeError::new(format!("field {} appears more than once", id)));
                }
            }
            previous = Some(id);

            if id == 251 {
                let name_len = reader.read_size(1)?;
                let name = reader.read_payload(name_len)?.to_vec();
                let payload_len = reader.read_size(2)?;
                let payload = reader.read_payload(payload_len)?.to_vec();
                fields.push(Field { id, name: Some(name), payload });
                continue;
            }

            let form = field_size_length(object_type, id)?;
            let len = match form {
                FieldLength::Fixed => FIXED_SIZE,
                FieldLength::Bytes1 => reader.read_size(1)?,
                FieldLength::Bytes2 => reader.read_size(2)?,
                FieldLength::Bytes3 => reader.read_size(3)?,
                FieldLength::Undefined => unreachable!(),
            };
            let payload = reader.read_payload(len)?.to_vec();
            fields.push(Field { id, name: None, payload });
        }

        Ok(PrimeObject { object_type, fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PrimeObject {
        let mut object = PrimeObject::new(ObjectType::OrgSignet);
        object.fields.push(Field::new(1, vec![0x11; 32]));
        object.fields.push(Field::new(3, vec![0x22; 33]));
        object.fields.push(Field::new(4, vec![0x33; 64]));
        object.fields.push(Field::undefined(b"x-ext".to_vec(), b"opaque".to_vec()));
        object
    }

    #[test]
    fn round_trip() {
        let object = sample();
        let packed = object.pack().unwrap();
        let unpacked = PrimeObject::unpack(&packed).unwrap();
        assert_eq!(unpacked, object);
    }

    #[test]
    fn undefined_fields_survive_round_trip() {
        let object = sample();
        let packed = object.pack().unwrap();
        let unpacked = PrimeObject::unpack(&packed).unwrap();
        let ext = unpacked.field(251).unwrap();
        assert_eq!(ext.name.as_deref(), Some(&b"x-ext"[..]));
        assert_eq!(ext.payload, b"opaque");
        // Re-encoding reproduces the original bytes.
        assert_eq!(unpacked.pack().unwrap(), packed);
    }

    #[test]
    fn header_size_mismatch_rejected() {
        let mut packed = sample().pack().unwrap();
        packed.push(0xFF);
        assert!(PrimeObject::unpack(&packed).is_err());
    }

    #[test]
    fn decreasing_field_order_rejected() {
        let mut object = PrimeObject::new(ObjectType::OrgSignet);
        object.fields.push(Field::new(3, vec![0x22; 33]));
        object.fields.push(Field::new(1, vec![0x11; 32]));
        let packed = object.pack().unwrap();
        let err = PrimeObject::unpack(&packed).unwrap_err();
        assert!(err.message.contains("must not decrease"));
    }

    #[test]
    fn duplicate_field_rejected() {
        let mut object = PrimeObject::new(ObjectType::OrgSignet);
        object.fields.push(Field::new(1, vec![0x11; 32]));
        object.fields.push(Field::new(1, vec![0x22; 32]));
        let packed = object.pack().unwrap();
        assert!(PrimeObject::unpack(&packed).is_err());
    }

    #[test]
    fn unknown_type_rejected() {
        let data = [0x00, 0x01, 0, 0, 0];
        assert!(PrimeObject::unpack(&data).is_err());
    }
}
