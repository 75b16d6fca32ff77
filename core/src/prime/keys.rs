/*
 * keys.rs
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

//! Private key bundles: an ed25519 signing scalar paired with a
//! secp256k1 encryption scalar, for organizations and users. On the
//! wire a key object carries field 1 (signing) and field 2 (encryption),
//! each 32 bytes.

use ed25519_dalek::SigningKey;
use secp256k1::{PublicKey, SecretKey, SECP256K1};

use super::object::{Field, PrimeObject};
use super::{ObjectType, PrimeError};

const FIELD_SIGNING: u8 = 1;
const FIELD_ENCRYPTION: u8 = 2;

fn random_signing_key() -> Result<SigningKey, PrimeError> {
    let mut seed = [0u8; 32];
    getrandom::getrandom(&mut seed)
        .map_err(|e| PrimeError::new(format!("signing key generation failed: {}", e)))?;
    Ok(SigningKey::from_bytes(&seed))
}

fn random_encryption_key() -> Result<SecretKey, PrimeError> {
    // from_slice rejects zero and the curve order; retry on the
    // astronomically unlikely bad draw.
    loop {
        let mut seed = [0u8; 32];
        getrandom::getrandom(&mut seed)
            .map_err(|e| PrimeError::new(format!("encryption key generation failed: {}", e)))?;
        if let Ok(key) = SecretKey::from_slice(&seed) {
            return Ok(key);
        }
    }
}

fn unpack_pair(data: &[u8], expected: ObjectType) -> Result<(SigningKey, SecretKey), PrimeError> {
    let object = PrimeObject::unpack(data)?;
    if object.object_type != expected {
        return Err(PrimeError::new(format!(
            "expected a {}, found a {}",
            expected.label(),
            object.object_type.label()
        )));
    }
    let signing = object
        .field(FIELD_SIGNING)
        .ok_or_else(|| PrimeError::new("key object is missing its signing field"))?;
    let encryption = object
        .field(FIELD_ENCRYPTION)
        .ok_or_else(|| PrimeError::new("key object is missing its encryption field"))?;
    let signing_bytes: [u8; 32] = signing
        .payload
        .as_slice()
        .try_into()
        .map_err(|_| PrimeError::new("signing key must be 32 bytes"))?;
    let encryption_key = SecretKey::from_slice(&encryption.payload)
        .map_err(|_| PrimeError::new("encryption key is not a valid secp256k1 scalar"))?;
    Ok((SigningKey::from_bytes(&signing_bytes), encryption_key))
}

fn pack_pair(
    object_type: ObjectType,
    signing: &SigningKey,
    encryption: &SecretKey,
) -> Result<Vec<u8>, PrimeError> {
    let mut object = PrimeObject::new(object_type);
    object.fields.push(Field::new(FIELD_SIGNING, signing.to_bytes().to_vec()));
    object
        .fields
        .push(Field::new(FIELD_ENCRYPTION, encryption.secret_bytes().to_vec()));
    object.pack()
}

/// Organizational private key bundle.
#[derive(Debug)]
pub struct OrgKey {
    pub signing: SigningKey,
    pub encryption: SecretKey,
}

impl OrgKey {
    pub fn generate() -> Result<Self, PrimeError> {
        Ok(Self { signing: random_signing_key()?, encryption: random_encryption_key()? })
    }

    pub fn encryption_public(&self) -> PublicKey {
        PublicKey::from_secret_key(SECP256K1, &self.encryption)
    }

    pub fn pack(&self) -> Result<Vec<u8>, PrimeError> {
        pack_pair(ObjectType::OrgKey, &self.signing, &self.encryption)
    }

    pub fn unpack(data: &[u8]) -> Result<Self, PrimeError> {
        let (signing, encryption) = unpack_pair(data, ObjectType::OrgKey)?;
        Ok(Self { signing, encryption })
    }
}

/// User private key bundle.
pub struct UserKey {
    pub signing: SigningKey,
    pub encryption: SecretKey,
}

impl UserKey {
    pub fn generate() -> Result<Self, PrimeError> {
        Ok(Self { signing: random_signing_key()?, encryption: random_encryption_key()? })
    }

    pub fn encryption_public(&self) -> PublicKey {
        PublicKey::from_secret_key(SECP256K1, &self.encryption)
    }

    pub fn pack(&self) -> Result<Vec<u8>, PrimeError> {
        pack_pair(ObjectType::UserKey, &self.signing, &self.encryption)
    }

    pub fn unpack(data: &[u8]) -> Result<Self, PrimeError> {
        let (signing, encryption) = unpack_pair(data, ObjectType::UserKey)?;
        Ok(Self { signing, encryption })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn org_key_round_trip() {
        let key = OrgKey::generate().unwrap();
        let packed = key.pack().unwrap();
        let restored = OrgKey::unpack(&packed).unwrap();
        assert_eq!(restored.signing.to_bytes(), key.signing.to_bytes());
        assert_eq!(restored.encryption.secret_bytes(), key.encryption.secret_bytes());
    }

    #[test]
    fn packed_key_length() {
        let key = UserKey::generate().unwrap();
        // 5 byte header plus two fields of id + length + 32 byte scalar.
        assert_eq!(key.pack().unwrap().len(), 5 + 2 * 34);
    }

    #[test]
    fn wrong_object_type_rejected() {
        let key = OrgKey::generate().unwrap();
        let packed = key.pack().unwrap();
        assert!(UserKey::unpack(&packed).is_err());
    }
}
