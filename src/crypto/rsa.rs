// dkim-engine – standalone DKIM signing and verification engine
// Copyright © 2022–2023 David Bürgin <dbuergin@gluet.ch>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.

use crate::crypto::{HashAlgorithm, SigningError, VerificationError};
use rsa::{
    pkcs1::DecodeRsaPublicKey, pkcs8::DecodePublicKey, traits::PublicKeyParts, Pkcs1v15Sign,
    RsaPrivateKey, RsaPublicKey,
};
use sha2::Sha256;

/// The smallest RSA key size in bits accepted for verification (RFC 8301).
pub const MIN_RSA_KEY_BITS: usize = 1024;

pub fn get_public_key_size(k: &RsaPublicKey) -> usize {
    k.size() * 8
}

pub fn signature_length(k: &RsaPrivateKey) -> usize {
    k.size()
}

pub fn read_rsa_public_key(key_data: &[u8]) -> Result<RsaPublicKey, VerificationError> {
    // SubjectPublicKeyInfo first (de facto), then RSAPublicKey (de iure)
    let public_key = RsaPublicKey::from_public_key_der(key_data)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(key_data))
        .map_err(|_| VerificationError::InvalidKey)?;

    if get_public_key_size(&public_key) < MIN_RSA_KEY_BITS {
        return Err(VerificationError::InsufficientKeySize);
    }

    Ok(public_key)
}

pub fn verify_rsa(
    hash_alg: HashAlgorithm,
    public_key: &RsaPublicKey,
    msg: &[u8],
    signature_data: &[u8],
) -> Result<(), VerificationError> {
    let scheme = match hash_alg {
        HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
    };

    public_key
        .verify(scheme, msg, signature_data)
        .map_err(|_| VerificationError::VerificationFailure)
}

pub fn sign_rsa(
    hash_alg: HashAlgorithm,
    private_key: &RsaPrivateKey,
    msg: &[u8],
) -> Result<Vec<u8>, SigningError> {
    let scheme = match hash_alg {
        HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
    };

    private_key.sign(scheme, msg).map_err(|_| SigningError)
}
