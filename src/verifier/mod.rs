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

//! Verifier and supporting types.

mod header;
mod lookup;
mod query;
mod verify;

pub use lookup::{read_public_key, KeyLookupError, KeyResolver, LookupTxt, TxtKeyResolver};

use crate::{
    crypto::VerificationError,
    engine::EngineConfig,
    header::HeaderFields,
    message_hash::{
        body_hasher_key, BodyHashError, BodyHashResults, BodyHasher, BodyHasherBuilder,
        BodyHasherStance,
    },
    signature::{DkimSignature, DkimSignatureError},
    status::Status,
    util,
    verifier::{
        header::{VerifyStatus, VerifyTask},
        query::Queries,
    },
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    time::Duration,
};
use tracing::{debug, trace};

/// A configurable policy reason for rejecting a signature.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PolicyError {
    RequiredHeadersNotSigned,
    SignatureExpired,
    TimestampInFuture,
    KeyTooSmall,
}

impl Display for PolicyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequiredHeadersNotSigned => write!(f, "headers required to be signed were not signed"),
            Self::SignatureExpired => write!(f, "signature expired"),
            Self::TimestampInFuture => write!(f, "timestamp in future"),
            Self::KeyTooSmall => write!(f, "public key size too small"),
        }
    }
}

impl Error for PolicyError {}

/// The verification status of an evaluated DKIM signature, or of a message as
/// a whole.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum VerificationStatus {
    /// The signature verified.
    Valid,
    /// The signature or body hash did not verify, or the signature was rejected
    /// by policy.
    BadSignature,
    /// The message carries no *DKIM-Signature* header.
    NoSignature,
    /// No key record exists for the signature’s domain and selector.
    KeyNotFound,
    /// The key has been revoked.
    KeyRevoked,
    /// The key could not be used to verify the signature.
    CantVerify,
    /// The *DKIM-Signature* header is malformed.
    SyntaxError,
    /// Verification could not complete for a reason that may go away on retry.
    TemporaryFailure,
    /// An internal invariant was violated.
    InternalError,
}

impl VerificationStatus {
    /// Converts this verification status to a status code.
    pub fn to_status(self) -> Status {
        match self {
            Self::Valid => Status::Ok,
            Self::BadSignature => Status::BadSignature,
            Self::NoSignature => Status::NoSignature,
            Self::KeyNotFound => Status::KeyNotFound,
            Self::KeyRevoked => Status::KeyRevoked,
            Self::CantVerify => Status::CantVerify,
            Self::SyntaxError => Status::SyntaxError,
            Self::TemporaryFailure => Status::TemporaryFailure,
            Self::InternalError => Status::InternalError,
        }
    }
}

impl From<VerificationStatus> for Status {
    fn from(status: VerificationStatus) -> Self {
        status.to_status()
    }
}

impl Display for VerificationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.to_status().fmt(f)
    }
}

/// An error that occurs when verifying a single signature.
#[derive(Clone, Debug, PartialEq)]
pub enum VerifierError {
    DkimSignatureFormat(DkimSignatureError),
    KeyLookup(KeyLookupError),
    KeyLookupTimeout,
    WrongKeyType,
    VerificationFailure(VerificationError),
    BodyHashMismatch,
    InsufficientBodyLength,
    Policy(PolicyError),
    Internal,
}

impl VerifierError {
    /// Returns the verification status this error results in.
    pub fn status(&self) -> VerificationStatus {
        use VerificationStatus::*;

        match self {
            Self::DkimSignatureFormat(_) => SyntaxError,
            Self::KeyLookup(e) => match e {
                KeyLookupError::NotFound => KeyNotFound,
                KeyLookupError::Revoked => KeyRevoked,
                KeyLookupError::TemporaryFailure => TemporaryFailure,
                KeyLookupError::MultipleReplies | KeyLookupError::InvalidRecord => CantVerify,
            },
            Self::KeyLookupTimeout => TemporaryFailure,
            Self::WrongKeyType | Self::Policy(PolicyError::KeyTooSmall) => CantVerify,
            Self::VerificationFailure(e) => match e {
                VerificationError::InvalidKey | VerificationError::InsufficientKeySize => CantVerify,
                VerificationError::InvalidSignature | VerificationError::VerificationFailure => {
                    BadSignature
                }
            },
            Self::BodyHashMismatch | Self::InsufficientBodyLength | Self::Policy(_) => BadSignature,
            Self::Internal => InternalError,
        }
    }
}

impl Display for VerifierError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::DkimSignatureFormat(error) => error.fmt(f),
            Self::KeyLookup(error) => error.fmt(f),
            Self::KeyLookupTimeout => write!(f, "key lookup timed out"),
            Self::WrongKeyType => write!(f, "wrong key type"),
            Self::VerificationFailure(error) => error.fmt(f),
            Self::BodyHashMismatch => write!(f, "body hash mismatch"),
            Self::InsufficientBodyLength => write!(f, "truncated body"),
            Self::Policy(error) => error.fmt(f),
            Self::Internal => write!(f, "internal error"),
        }
    }
}

impl Error for VerifierError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::DkimSignatureFormat(e) => Some(e),
            Self::KeyLookup(e) => Some(e),
            Self::VerificationFailure(e) => Some(e),
            Self::Policy(e) => Some(e),
            _ => None,
        }
    }
}

/// A verification result arrived at for some *DKIM-Signature* header.
#[derive(Clone, Debug, PartialEq)]
pub struct VerificationResult {
    /// The verification status.
    pub status: VerificationStatus,
    /// The cause of failure, absent for a valid signature.
    pub error: Option<VerifierError>,
    /// The index of the evaluated *DKIM-Signature* header in the original
    /// `HeaderFields` input.
    pub index: usize,
    /// The parsed DKIM signature data, if available.
    pub signature: Option<DkimSignature>,
}

/// The results of verifying all signatures of a message.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VerificationReport {
    results: Vec<VerificationResult>,
}

impl VerificationReport {
    /// Returns the overall status of the message.
    ///
    /// A message without signatures is `NoSignature`; a message with at least
    /// one valid signature is `Valid`; otherwise the status of the first
    /// evaluated signature is reported.
    pub fn status(&self) -> VerificationStatus {
        if self.results.is_empty() {
            VerificationStatus::NoSignature
        } else if self.results.iter().any(|r| r.status == VerificationStatus::Valid) {
            VerificationStatus::Valid
        } else {
            self.results[0].status
        }
    }

    /// Returns true if the overall status is a temporary failure, and
    /// verification may succeed when retried.
    pub fn is_temporary(&self) -> bool {
        self.status() == VerificationStatus::TemporaryFailure
    }

    pub fn results(&self) -> &[VerificationResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<VerificationResult> {
        self.results
    }
}

/// A verifier of DKIM signatures in an email message.
///
/// `Verifier` implements a three-phase, staged design that allows processing
/// the message in chunks.
///
/// 1. [`verify_header`][Verifier::verify_header]: first, find and parse the
///    signatures in the message header and register the body hashes needed
/// 2. [`process_body_chunk`][Verifier::process_body_chunk]: then, any number of
///    chunks of the message body are fed to the verification process
/// 3. **[`finish`][Verifier::finish]** (async): finally, the public keys are
///    resolved, the signatures and body hashes are checked, and the
///    verification report is returned
///
/// Compare this with the similar but distinct procedure of
/// [`Signer`][crate::signer::Signer].
pub struct Verifier {
    tasks: Vec<VerifyTask>,
    headers: HeaderFields,
    body_hasher: BodyHasher,
    lookup_timeout: Duration,
    min_key_bits: usize,
}

impl Verifier {
    /// Initiates a message verification process by examining the header of a
    /// message.
    pub fn verify_header(headers: HeaderFields, config: &EngineConfig) -> Self {
        let tasks = header::find_signatures(&headers, config);

        let mut body_hasher = BodyHasherBuilder::new(false);

        for task in &tasks {
            if let (VerifyStatus::InProgress, Some(sig)) = (&task.status, &task.signature) {
                let (body_len, hash_alg, canon_alg) = body_hasher_key(sig);
                body_hasher.register_canonicalization(body_len, hash_alg, canon_alg);
            }
        }

        debug!(signatures = tasks.len(), "examined message header");

        Self {
            tasks,
            headers,
            body_hasher: body_hasher.build(),
            lookup_timeout: config.lookup_timeout,
            min_key_bits: config.min_key_bits,
        }
    }

    /// Returns the number of *DKIM-Signature* headers under evaluation.
    pub fn signature_count(&self) -> usize {
        self.tasks.len()
    }

    /// Processes a chunk of the message body.
    ///
    /// The returned [`BodyHasherStance`] instructs the client how to proceed if
    /// more chunks are outstanding. Note that the given body chunk is
    /// canonicalized and hashed, but not otherwise retained in memory.
    pub fn process_body_chunk(&mut self, chunk: &[u8]) -> Result<BodyHasherStance, BodyHashError> {
        self.body_hasher.hash_chunk(chunk)
    }

    /// Finishes the verification process and returns the report.
    ///
    /// Each distinct domain and selector pair is resolved once, each lookup
    /// bounded by the configured lookup timeout.
    pub async fn finish<T>(mut self, resolver: &T) -> VerificationReport
    where
        T: KeyResolver + ?Sized,
    {
        let hasher_results = match self.body_hasher.finish() {
            Ok(r) => Some(r),
            Err(e) => {
                trace!("could not finish body hashes: {e}");
                None
            }
        };

        let queries = Queries::resolve_all(&self.tasks, resolver, self.lookup_timeout).await;

        let mut results = vec![];

        for task in self.tasks {
            let error = match &task.status {
                VerifyStatus::Failed(e) => Some(e.clone()),
                VerifyStatus::InProgress => verify_task(
                    &task,
                    &self.headers,
                    &queries,
                    hasher_results.as_ref(),
                    self.min_key_bits,
                )
                .err(),
            };

            let status = match &error {
                None => VerificationStatus::Valid,
                Some(e) => e.status(),
            };

            trace!(index = task.index, %status, "signature evaluated");

            results.push(VerificationResult {
                status,
                error,
                index: task.index,
                signature: task.signature,
            });
        }

        let report = VerificationReport { results };

        debug!(status = %report.status(), "verification finished");

        report
    }
}

fn verify_task(
    task: &VerifyTask,
    headers: &HeaderFields,
    queries: &Queries,
    hasher_results: Option<&BodyHashResults>,
    min_key_bits: usize,
) -> Result<(), VerifierError> {
    let (Some(sig), Some(name), Some(value)) = (&task.signature, &task.name, &task.value) else {
        return Err(VerifierError::Internal);
    };

    trace!(domain = %sig.domain, selector = %sig.selector, "verifying DKIM-Signature");

    let public_key = match queries.get(&sig.domain, &sig.selector) {
        Some(Ok(key)) => key,
        Some(Err(e)) => return Err(e.clone()),
        None => return Err(VerifierError::Internal),
    };

    if let Some(e) = task.policy {
        return Err(VerifierError::Policy(e));
    }

    if public_key.key_type() != sig.algorithm.key_type() {
        trace!("wrong public key type");
        return Err(VerifierError::WrongKeyType);
    }

    if let Some(size) = public_key.key_size() {
        if size < min_key_bits {
            trace!(size, "public key too small");
            return Err(VerifierError::Policy(PolicyError::KeyTooSmall));
        }
    }

    verify::perform_verification(headers, public_key, sig, name, value)
        .map_err(VerifierError::VerificationFailure)?;

    let hasher_results = hasher_results.ok_or(VerifierError::Internal)?;

    verify_body_hash(sig, hasher_results)
}

fn verify_body_hash(sig: &DkimSignature, hasher_results: &BodyHashResults) -> Result<(), VerifierError> {
    trace!("now checking body hash for signature");

    let key = body_hasher_key(sig);

    match hasher_results.get(&key) {
        Some(Ok((h, _))) => {
            if h != &sig.body_hash {
                trace!("body hash mismatch: {}", util::encode_base64(h));
                Err(VerifierError::BodyHashMismatch)
            } else {
                trace!("body hash matched");
                Ok(())
            }
        }
        Some(Err(BodyHashError::InsufficientInput)) => Err(VerifierError::InsufficientBodyLength),
        Some(Err(_)) | None => Err(VerifierError::Internal),
    }
}
