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

use crate::{
    crypto::{self, HashAlgorithm, SigningKey},
    header::{FieldName, HeaderFields},
    message_hash::{self, BodyHashError, BodyHashResults},
    signer::{
        format::{self, UnsignedDkimSignature},
        BodyLength, OutputFormat, SignRequest, SignerError, SigningResult, Timestamp,
    },
};
use tracing::trace;

pub fn perform_signing<T>(
    request: SignRequest<T>,
    signed_headers: Vec<FieldName>,
    headers: &HeaderFields,
    hasher_results: &BodyHashResults,
    now: u64,
) -> Result<SigningResult, SignerError>
where
    T: AsRef<SigningKey>,
{
    let algorithm = request.algorithm;
    let canonicalization = request.canonicalization;

    // look up body hash

    let body_length = request.body_length.to_limit()?;
    let hash_alg = algorithm.hash_algorithm();
    let key = (body_length, hash_alg, canonicalization.body);

    let hasher_result = hasher_results.get(&key).ok_or(SignerError::Internal)?;

    let (body_hash, final_len) = match hasher_result {
        Ok((h, final_len)) => (h.clone(), *final_len),
        Err(BodyHashError::InsufficientInput) => {
            return Err(SignerError::InsufficientBodyLength);
        }
        Err(BodyHashError::InputTruncated | BodyHashError::Finalized) => {
            return Err(SignerError::Internal);
        }
    };

    let body_length = match request.body_length {
        BodyLength::All => None,
        BodyLength::MessageContent | BodyLength::Exact(_) => {
            Some(final_len.try_into().map_err(|_| SignerError::Overflow)?)
        }
    };

    // calculate timestamp and expiration

    let timestamp = request.timestamp.map(|timestamp| match timestamp {
        Timestamp::Now => now,
        Timestamp::Exact(t) => t,
    });

    let expiration = request.valid_duration.map(|duration| {
        timestamp.unwrap_or(now)
            .saturating_add(duration.as_secs())
    });

    // prepare complete formatted signature header with body hash except with contents of b= tag

    let sig = UnsignedDkimSignature {
        algorithm,
        body_hash,
        canonicalization,
        domain: request.domain,
        signed_headers: signed_headers.into(),
        identity: request.identity,
        body_length,
        selector: request.selector,
        timestamp,
        expiration,
    };

    let result = produce_signature(sig, request.signing_key.as_ref(), &request.format, headers)?;

    // name + ':' + value + terminator
    let output_len = result.header_name.len() + result.header_value.len() + 2;
    if output_len > request.output_buffer_size {
        trace!(output_len, "formatted signature exceeds output buffer");
        return Err(SignerError::OutputTooLarge);
    }

    Ok(result)
}

fn produce_signature(
    sig: UnsignedDkimSignature,
    signing_key: &SigningKey,
    format: &OutputFormat,
    headers: &HeaderFields,
) -> Result<SigningResult, SignerError> {
    let b_len = estimate_b_tag_length(signing_key);

    let (mut formatted_header_value, insertion_index) = sig.format_without_signature(format, b_len);

    let header_name = &format.header_name;

    let algorithm = sig.algorithm;
    let hash_alg = algorithm.hash_algorithm();

    let data_hash = message_hash::compute_data_hash(
        hash_alg,
        sig.canonicalization.header,
        headers,
        &sig.signed_headers,
        header_name,
        &formatted_header_value,
    );

    if signing_key.key_type() != algorithm.key_type() {
        return Err(SignerError::KeyTypeMismatch);
    }

    let signature_data = sign_hash(signing_key, hash_alg, &data_hash)?.into_boxed_slice();

    let sig = sig.into_signature(signature_data);

    // insert signature into formatted dkim-sig header

    format::insert_signature_data(
        &mut formatted_header_value,
        insertion_index,
        header_name,
        &sig.signature_data[..],
        format.line_width,
        &format.indentation,
    );

    Ok(SigningResult {
        header_name: header_name.into(),
        header_value: formatted_header_value,
        signature: sig,
    })
}

fn estimate_b_tag_length(signing_key: &SigningKey) -> usize {
    let n = signing_key.signature_length();
    // n is the signature length in bytes, now compute the length of the
    // base64-encoded value:
    (n + 2) / 3 * 4
}

fn sign_hash(
    signing_key: &SigningKey,
    hash_alg: HashAlgorithm,
    data_hash: &[u8],
) -> Result<Vec<u8>, SignerError> {
    match signing_key {
        SigningKey::Rsa(k) => match crypto::sign_rsa(hash_alg, k, data_hash) {
            Ok(s) => {
                trace!("RSA signing successful");
                Ok(s)
            }
            Err(e) => {
                trace!("RSA signing failed: {e}");
                Err(SignerError::SignatureGenerationFailed)
            }
        },
        SigningKey::Ed25519(k) => match crypto::sign_ed25519(k, data_hash) {
            Ok(s) => {
                trace!("Ed25519 signing successful");
                Ok(s)
            }
            Err(e) => {
                trace!("Ed25519 signing failed: {e}");
                Err(SignerError::SignatureGenerationFailed)
            }
        },
    }
}
