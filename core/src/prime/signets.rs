/*
 * signets.rs
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

//! Signets: self-signed public key bundles. The cryptographic prefix is
//! the serialized public signing field (id 1) followed by the public
//! encryption field (id 3); the self-signature (id 4) covers exactly
//! those bytes. A user signet additionally carries the organizational
//! endorsement in field 5, computed over the prefix plus the
//! self-signature.

use bytes::BytesMut;
use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};
use secp256k1::PublicKey;

use super::fields::field_write;
use super::keys::{OrgKey, UserKey};
use super::object::{Field, PrimeObject};
use super::{ObjectType, PrimeError};

const FIELD_SIGNING: u8 = 1;
const FIELD_ENCRYPTION: u8 = 3;
const FIELD_SELF_SIGNATURE: u8 = 4;
const FIELD_ORG_SIGNATURE: u8 = 5;

/// Serialize the cryptographic prefix fields (1 and 3) for signing.
fn cryptographic_prefix(
    object_type: ObjectType,
    signing: &VerifyingKey,
    encryption: &PublicKey,
) -> Result<BytesMut, PrimeError> {
    let mut prefix = BytesMut::new();
    field_write(object_type, FIELD_SIGNING, signing.as_bytes(), &mut prefix)?;
    field_write(object_type, FIELD_ENCRYPTION, &encryption.serialize(), &mut prefix)?;
    Ok(prefix)
}

fn extract_public_pair(
    object: &PrimeObject,
) -> Result<(VerifyingKey, PublicKey), PrimeError> {
    let signing_field = object
        .field(FIELD_SIGNING)
        .ok_or_else(|| PrimeError::new("signet is missing its signing field"))?;
    let encryption_field = object
        .field(FIELD_ENCRYPTION)
        .ok_or_else(|| PrimeError::new("signet is missing its encryption field"))?;
    let signing_bytes: [u8; 32] = signing_field
        .payload
        .as_slice()
        .try_into()
        .map_err(|_| PrimeError::new("signet signing key must be 32 bytes"))?;
    let signing = VerifyingKey::from_bytes(&signing_bytes)
        .map_err(|_| PrimeError::new("signet signing key is not a valid ed25519 point"))?;
    let encryption = PublicKey::from_slice(&encryption_field.payload)
        .map_err(|_| PrimeError::new("signet encryption key is not a valid secp256k1 point"))?;
    Ok((signing, encryption))
}

fn extract_signature(object: &PrimeObject, id: u8) -> Result<Signature, PrimeError> {
    let field = object
        .field(id)
        .ok_or_else(|| PrimeError::new(format!("signet is missing signature field {}", id)))?;
    let bytes: [u8; 64] = field
        .payload
        .as_slice()
        .try_into()
        .map_err(|_| PrimeError::new("signature fields must be 64 bytes"))?;
    Ok(Signature::from_bytes(&bytes))
}

/// Organizational signet: self-signed public key bundle.
#[derive(Debug)]
pub struct OrgSignet {
    pub signing: VerifyingKey,
    pub encryption: PublicKey,
    pub signature: Signature,
}

impl OrgSignet {
    /// Derive a signet from the organizational private keys.
    pub fn generate(key: &OrgKey) -> Result<Self, PrimeError> {
        let signing = key.signing.verifying_key();
        let encryption = key.encryption_public();
        let prefix = cryptographic_prefix(ObjectType::OrgSignet, &signing, &encryption)?;
        let signature = key.signing.sign(&prefix);
        Ok(Self { signing, encryption, signature })
    }

    /// Check the self-signature over the cryptographic prefix.
    pub fn verify(&self) -> Result<(), PrimeError> {
        let prefix = cryptographic_prefix(ObjectType::OrgSignet, &self.signing, &self.encryption)?;
        self.signing
            .verify(&prefix, &self.signature)
            .map_err(|_| PrimeError::new("organizational signet self-signature is invalid"))
    }

    pub fn pack(&self) -> Result<Vec<u8>, PrimeError> {
        let mut object = PrimeObject::new(ObjectType::OrgSignet);
        object.fields.push(Field::new(FIELD_SIGNING, self.signing.as_bytes().to_vec()));
        object
            .fields
            .push(Field::new(FIELD_ENCRYPTION, self.encryption.serialize().to_vec()));
        object
            .fields
            .push(Field::new(FIELD_SELF_SIGNATURE, self.signature.to_bytes().to_vec()));
        object.pack()
    }

    /// Parse and verify. Field order violations and bad signatures both
    /// reject the signet without partial effects.
    pub fn unpack(data: &[u8]) -> Result<Self, PrimeError> {
        let object = PrimeObject::unpack(data)?;
        if object.object_type != ObjectType::OrgSignet {
            return Err(PrimeError::new(format!(
                "expected an organizational signet, found a {}",
                object.object_type.label()
            )));
        }
        let (signing, encryption) = extract_public_pair(&object)?;
        let signature = extract_signature(&object, FIELD_SELF_SIGNATURE)?;
        let signet = Self { signing, encryption, signature };
        signet.verify()?;
        Ok(signet)
    }
}

/// User signing request: the user's public pair plus a self-signature,
/// awaiting organizational endorsement.
pub struct UserSigningRequest {
    pub signing: VerifyingKey,
    pub encryption: PublicKey,
    pub self_signature: Signature,
}

impl UserSigningRequest {
    pub fn generate(key: &UserKey) -> Result<Self, PrimeError> {
        let signing = key.signing.verifying_key();
        let encryption = key.encryption_public();
        let prefix = cryptographic_prefix(ObjectType::UserSigningRequest, &signing, &encryption)?;
        let self_signature = key.signing.sign(&prefix);
        Ok(Self { signing, encryption, self_signature })
    }

    pub fn verify(&self) -> Result<(), PrimeError> {
        let prefix =
            cryptographic_prefix(ObjectType::UserSigningRequest, &self.signing, &self.encryption)?;
        self.signing
            .verify(&prefix, &self.self_signature)
            .map_err(|_| PrimeError::new("signing request self-signature is invalid"))
    }

    pub fn pack(&self) -> Result<Vec<u8>, PrimeError> {
        let mut object = PrimeObject::new(ObjectType::UserSigningRequest);
        object.fields.push(Field::new(FIELD_SIGNING, self.signing.as_bytes().to_vec()));
        object
            .fields
            .push(Field::new(FIELD_ENCRYPTION, self.encryption.serialize().to_vec()));
        object
            .fields
            .push(Field::new(FIELD_SELF_SIGNATURE, self.self_signature.to_bytes().to_vec()));
        object.pack()
    }

    pub fn unpack(data: &[u8]) -> Result<Self, PrimeError> {
        let object = PrimeObject::unpack(data)?;
        if object.object_type != ObjectType::UserSigningRequest {
            return Err(PrimeError::new(format!(
                "expected a user signing request, found a {}",
                object.object_type.label()
            )));
        }
        let (signing, encryption) = extract_public_pair(&object)?;
        let self_signature = extract_signature(&object, FIELD_SELF_SIGNATURE)?;
        let request = Self { signing, encryption, self_signature };
        request.verify()?;
        Ok(request)
    }

    /// Endorse the request with the organizational signing key,
    /// producing a user signet.
    pub fn endorse(&self, org: &OrgKey) -> Result<UserSignet, PrimeError> {
        self.verify()?;
        let mut signed = cryptographic_prefix(ObjectType::UserSignet, &self.signing, &self.encryption)?;
        field_write(
            ObjectType::UserSignet,
            FIELD_SELF_SIGNATURE,
            &self.self_signature.to_bytes(),
            &mut signed,
        )?;
        let org_signature = org.signing.sign(&signed);
        Ok(UserSignet {
            signing: self.signing,
            encryption: self.encryption,
            self_signature: self.self_signature,
            org_signature,
        })
    }
}

/// User signet: the endorsed form of a signing request.
pub struct UserSignet {
    pub signing: VerifyingKey,
    pub encryption: PublicKey,
    pub self_signature: Signature,
    pub org_signature: Signature,
}

impl UserSignet {
    /// Check the self-signature and the organizational endorsement.
    pub fn verify(&self, org: &OrgSignet) -> Result<(), PrimeError> {
        let prefix = cryptographic_prefix(ObjectType::UserSignet, &self.signing, &self.encryption)?;
        self.signing
            .verify(&prefix, &self.self_signature)
            .map_err(|_| PrimeError::new("user signet self-signature is invalid"))?;
        let mut signed = prefix;
        field_write(
            ObjectType::UserSignet,
            FIELD_SELF_SIGNATURE,
            &self.self_signature.to_bytes(),
            &mut signed,
        )?;
        org.signing
            .verify(&signed, &self.org_signature)
            .map_err(|_| PrimeError::new("user signet organizational signature is invalid"))
    }

    pub fn pack(&self) -> Result<Vec<u8>, PrimeError> {
        let mut object = PrimeObject::new(ObjectType::UserSignet);
        object.fields.push(Field::new(FIELD_SIGNING, self.signing.as_bytes().to_vec()));
        object
            .fields
            .push(Field::new(FIELD_ENCRYPTION, self.encryption.serialize().to_vec()));
        object
            .fields
            .push(Field::new(FIELD_SELF_SIGNATURE, self.self_signature.to_bytes().to_vec()));
        object
            .fields
            .push(Field::new(FIELD_ORG_SIGNATURE, self.org_signature.to_bytes().to_vec()));
        object.pack()
    }

    pub fn unpack(data: &[u8]) -> Result<Self, PrimeError> {
        let object = PrimeObject::unpack(data)?;
        if object.object_type != ObjectType::UserSignet {
            return Err(PrimeError::new(format!(
                "expected a user signet, found a {}",
                object.object_type.label()
            )));
        }
        let (signing, encryption) = extract_public_pair(&object)?;
        let self_signature = extract_signature(&object, FIELD_SELF_SIGNATURE)?;
        let org_signature = extract_signature(&object, FIELD_ORG_SIGNATURE)?;
        Ok(Self { signing, encryption, self_signature, org_signature })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn org_signet_round_trip_and_verify() {
        let key = OrgKey::generate().unwrap();
        let signet = OrgSignet::generate(&key).unwrap();
        signet.verify().unwrap();
        let packed = signet.pack().unwrap();
        let restored = OrgSignet::unpack(&packed).unwrap();
        assert_eq!(restored.signing.as_bytes(), signet.signing.as_bytes());
    }

    #[test]
    fn signet_with_swapped_field_order_rejected() {
        let key = OrgKey::generate().unwrap();
        let signet = OrgSignet::generate(&key).unwrap();
        // Hand-assemble the signet with the encryption field before the
        // signing field.
        let mut object = PrimeObject::new(ObjectType::OrgSignet);
        object
            .fields
            .push(Field::new(3, signet.encryption.serialize().to_vec()));
        object
            .fields
            .push(Field::new(1, signet.signing.as_bytes().to_vec()));
        object
            .fields
            .push(Field::new(4, signet.signature.to_bytes().to_vec()));
        let packed = object.pack().unwrap();
        let err = OrgSignet::unpack(&packed).unwrap_err();
        assert!(err.message.contains("must not decrease"));
    }

    #[test]
    fn tampered_signet_rejected() {
        let key = OrgKey::generate().unwrap();
        let signet = OrgSignet::generate(&key).unwrap();
        let mut packed = signet.pack().unwrap();
        // Flip a bit inside the signing key payload.
        packed[8] ^= 0x01;
        assert!(OrgSignet::unpack(&packed).is_err());
    }

    #[test]
    fn user_request_endorsement_flow() {
        let org = OrgKey::generate().unwrap();
        let org_signet = OrgSignet::generate(&org).unwrap();
        let user = UserKey::generate().unwrap();

        let request = UserSigningRequest::generate(&user).unwrap();
        let packed = request.pack().unwrap();
        let restored = UserSigningRequest::unpack(&packed).unwrap();

        let signet = restored.endorse(&org).unwrap();
        signet.verify(&org_signet).unwrap();

        let round = UserSignet::unpack(&signet.pack().unwrap()).unwrap();
        round.verify(&org_signet).unwrap();
    }

    #[test]
    fn endorsement_by_wrong_org_fails_verification() {
        let org_a = OrgKey::generate().unwrap();
        let org_b = OrgKey::generate().unwrap();
        let signet_b = OrgSignet::generate(&org_b).unwrap();
        let user = UserKey::generate().unwrap();
        let request = UserSigningRequest::generate(&user).unwrap();
        let signet = request.endorse(&org_a).unwrap();
        assert!(signet.verify(&signet_b).is_err());
    }
}
