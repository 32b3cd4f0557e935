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

//! Computation of the message hashes.

use crate::{
    canonicalize::{self, BodyCanonicalizer},
    crypto::{self, CountingHasher, HashAlgorithm, HashStatus, InsufficientInput},
    header::{FieldName, HeaderFields},
    signature::{CanonicalizationAlgorithm, DkimSignature, DKIM_SIGNATURE_NAME},
};
use std::{
    collections::{HashMap, HashSet},
    error::Error,
    fmt::{self, Display, Formatter},
    mem,
};

/// Computes the *data hash*: the hash of the selected header fields followed
/// by the DKIM-Signature header field with empty *b=* tag, all canonicalized.
pub fn compute_data_hash(
    hash_alg: HashAlgorithm,
    canon_alg: CanonicalizationAlgorithm,
    headers: &HeaderFields,
    selected_headers: &[FieldName],
    dkim_sig_header_name: &str,
    formatted_dkim_sig_header_value: &str,
) -> Box<[u8]> {
    debug_assert!(dkim_sig_header_name.eq_ignore_ascii_case(DKIM_SIGNATURE_NAME));

    let mut cheaders = canonicalize::canonicalize_headers(canon_alg, headers, selected_headers);

    // the DKIM-Signature header itself goes last, without trailing CRLF
    canonicalize::canonicalize_header(
        &mut cheaders,
        canon_alg,
        dkim_sig_header_name,
        formatted_dkim_sig_header_value,
    );

    crypto::digest(hash_alg, &cheaders)
}

/// The stance of a body hasher regarding additional body content.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[must_use]
pub enum BodyHasherStance {
    /// More body content may be fed to the body hasher.
    Interested,
    /// All body hash requests can be answered, further body content is not
    /// needed and may be skipped.
    Done,
}

/// Identifies one body hash request: body length limit, hash algorithm and
/// body canonicalization.
pub type BodyHasherKey = (Option<usize>, HashAlgorithm, CanonicalizationAlgorithm);

pub fn body_hasher_key(sig: &DkimSignature) -> BodyHasherKey {
    // a limit beyond the address space cannot be reached anyway
    let body_len = sig
        .body_length
        .map(|len| usize::try_from(len).unwrap_or(usize::MAX));
    let hash_alg = sig.algorithm.hash_algorithm();
    let canon_kind = sig.canonicalization.body;
    (body_len, hash_alg, canon_kind)
}

#[derive(Clone, Debug)]
pub struct BodyHasherBuilder {
    fail_on_truncate: bool,  // truncated inputs must yield InputTruncated
    registrations: HashSet<BodyHasherKey>,
}

impl BodyHasherBuilder {
    pub fn new(fail_on_partially_hashed_input: bool) -> Self {
        Self {
            fail_on_truncate: fail_on_partially_hashed_input,
            registrations: HashSet::new(),
        }
    }

    pub fn register_canonicalization(
        &mut self,
        len: Option<usize>,
        alg: HashAlgorithm,
        canon: CanonicalizationAlgorithm,
    ) {
        self.registrations.insert((len, alg, canon));
    }

    pub fn build(self) -> BodyHasher {
        let hashers = self
            .registrations
            .into_iter()
            .map(|key @ (len, alg, _)| (key, (CountingHasher::new(alg, len), false)))
            .collect();

        BodyHasher {
            fail_on_truncate: self.fail_on_truncate,
            hashers,
            canonicalizer_simple: BodyCanonicalizer::simple(),
            canonicalizer_relaxed: BodyCanonicalizer::relaxed(),
            finished: false,
        }
    }
}

/// A producer of *body hash* results.
///
/// The body hasher canonicalises and hashes chunks of the message body, until
/// all body hash requests can be answered. Canonicalizers are shared among
/// all requests using the same canonicalization algorithm.
pub struct BodyHasher {
    fail_on_truncate: bool,
    // for each key, a hasher and a flag recording whether input was truncated
    hashers: HashMap<BodyHasherKey, (CountingHasher, bool)>,
    canonicalizer_simple: BodyCanonicalizer,
    canonicalizer_relaxed: BodyCanonicalizer,
    finished: bool,
}

impl BodyHasher {
    /// Canonicalizes and hashes a chunk of the message body.
    pub fn hash_chunk(&mut self, chunk: &[u8]) -> Result<BodyHasherStance, BodyHashError> {
        if self.finished {
            return Err(BodyHashError::Finalized);
        }

        let fail_on_truncate = self.fail_on_truncate;

        let mut canonicalized_chunk_simple = None;
        let mut canonicalized_chunk_relaxed = None;

        let mut all_done = true;

        let active_hashers = self
            .hashers
            .iter_mut()
            .filter(|(_, (hasher, truncated))| needs_input(hasher, *truncated, fail_on_truncate));

        for ((_, _, canon), (hasher, truncated)) in active_hashers {
            let canonicalized_chunk = match canon {
                CanonicalizationAlgorithm::Simple => canonicalized_chunk_simple
                    .get_or_insert_with(|| self.canonicalizer_simple.canonicalize_chunk(chunk)),
                CanonicalizationAlgorithm::Relaxed => canonicalized_chunk_relaxed
                    .get_or_insert_with(|| self.canonicalizer_relaxed.canonicalize_chunk(chunk)),
            };

            match hasher.update(canonicalized_chunk) {
                HashStatus::AllConsumed => {
                    if fail_on_truncate || !hasher.is_done() {
                        all_done = false;
                    }
                }
                HashStatus::Truncated => {
                    *truncated = true;
                }
            }
        }

        Ok(if all_done {
            BodyHasherStance::Done
        } else {
            BodyHasherStance::Interested
        })
    }

    /// Finishes canonicalization and hashing and returns the results for all
    /// registered requests. The body hasher cannot be used afterwards.
    pub fn finish(&mut self) -> Result<BodyHashResults, BodyHashError> {
        if self.finished {
            return Err(BodyHashError::Finalized);
        }
        self.finished = true;

        let fail_on_truncate = self.fail_on_truncate;
        let hashers = mem::take(&mut self.hashers);

        let mut final_chunk_simple = None;
        let mut final_chunk_relaxed = None;

        let mut results = HashMap::with_capacity(hashers.len());

        for (key @ (_, _, canon), (mut hasher, mut truncated)) in hashers {
            if needs_input(&hasher, truncated, fail_on_truncate) {
                let final_chunk = match canon {
                    CanonicalizationAlgorithm::Simple => final_chunk_simple.get_or_insert_with(|| {
                        mem::replace(&mut self.canonicalizer_simple, BodyCanonicalizer::simple())
                            .finish()
                    }),
                    CanonicalizationAlgorithm::Relaxed => final_chunk_relaxed.get_or_insert_with(|| {
                        mem::replace(&mut self.canonicalizer_relaxed, BodyCanonicalizer::relaxed())
                            .finish()
                    }),
                };

                if let HashStatus::Truncated = hasher.update(final_chunk) {
                    truncated = true;
                }
            }

            let res = if fail_on_truncate && truncated {
                Err(BodyHashError::InputTruncated)
            } else {
                hasher.finish().map_err(|InsufficientInput| BodyHashError::InsufficientInput)
            };

            results.insert(key, res);
        }

        Ok(BodyHashResults { results })
    }
}

fn needs_input(hasher: &CountingHasher, truncated: bool, fail_on_truncate: bool) -> bool {
    !hasher.is_done() || (fail_on_truncate && !truncated)
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BodyHashError {
    InsufficientInput,
    InputTruncated,
    Finalized,
}

impl Display for BodyHashError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientInput => write!(f, "insufficient input data"),
            Self::InputTruncated => write!(f, "input not digested entirely"),
            Self::Finalized => write!(f, "body hasher already finalized"),
        }
    }
}

impl Error for BodyHashError {}

/// A body hash result: the digest and the number of bytes digested.
pub type BodyHashResult = Result<(Box<[u8]>, usize), BodyHashError>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BodyHashResults {
    results: HashMap<BodyHasherKey, BodyHashResult>,
}

impl BodyHashResults {
    pub fn get(&self, key: &BodyHasherKey) -> Option<&BodyHashResult> {
        self.results.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util;

    fn key_simple() -> BodyHasherKey {
        (None, HashAlgorithm::Sha256, CanonicalizationAlgorithm::Simple)
    }

    fn limited_key_simple(n: usize) -> BodyHasherKey {
        (Some(n), HashAlgorithm::Sha256, CanonicalizationAlgorithm::Simple)
    }

    fn key_relaxed() -> BodyHasherKey {
        (None, HashAlgorithm::Sha256, CanonicalizationAlgorithm::Relaxed)
    }

    fn limited_key_relaxed(n: usize) -> BodyHasherKey {
        (Some(n), HashAlgorithm::Sha256, CanonicalizationAlgorithm::Relaxed)
    }

    fn build_hasher(fail_on_truncate: bool, keys: &[BodyHasherKey]) -> BodyHasher {
        let mut hasher = BodyHasherBuilder::new(fail_on_truncate);
        for &(len, hash_alg, canon_alg) in keys {
            hasher.register_canonicalization(len, hash_alg, canon_alg);
        }
        hasher.build()
    }

    #[test]
    fn body_hasher_simple() {
        let key1 = key_simple();
        let key2 = key_relaxed();

        let mut hasher = build_hasher(false, &[key1, key2]);

        assert_eq!(hasher.hash_chunk(b"abc \r\n"), Ok(BodyHasherStance::Interested));

        let results = hasher.finish().unwrap();

        let res1 = results.get(&key1).unwrap();
        assert_eq!(res1.as_ref().unwrap().1, 6);
        let res2 = results.get(&key2).unwrap();
        assert_eq!(res2.as_ref().unwrap().1, 5);
    }

    #[test]
    fn body_hasher_fail_on_partial() {
        let key1 = limited_key_relaxed(4);

        let mut hasher = build_hasher(true, &[key1]);

        assert_eq!(hasher.hash_chunk(b"ab"), Ok(BodyHasherStance::Interested));
        assert_eq!(hasher.hash_chunk(b"c"), Ok(BodyHasherStance::Interested));

        // now canonicalization adds a final CRLF, exceeding the limit 4
        let results = hasher.finish().unwrap();

        let res1 = results.get(&key1).unwrap();
        assert_eq!(res1, &Err(BodyHashError::InputTruncated));
    }

    #[test]
    fn body_hasher_insufficient_input() {
        let key1 = limited_key_simple(100);

        let mut hasher = build_hasher(false, &[key1]);

        assert_eq!(hasher.hash_chunk(b"short\r\n"), Ok(BodyHasherStance::Interested));

        let results = hasher.finish().unwrap();

        assert_eq!(results.get(&key1).unwrap(), &Err(BodyHashError::InsufficientInput));
    }

    #[test]
    fn body_hasher_hash_with_length() {
        let key1 = limited_key_simple(27);

        let mut hasher = build_hasher(false, &[key1]);

        assert_eq!(hasher.hash_chunk(b"well  hello \r\n"), Ok(BodyHasherStance::Interested));
        assert_eq!(hasher.hash_chunk(b"\r\n what agi \r"), Ok(BodyHasherStance::Interested));
        assert_eq!(hasher.hash_chunk(b"\n\r\n"), Ok(BodyHasherStance::Done));

        let results = hasher.finish().unwrap();

        let res1 = results.get(&key1).unwrap();
        assert_eq!(
            res1.as_ref().unwrap().0,
            sha256_digest(b"well  hello \r\n\r\n what agi \r")
        );
    }

    #[test]
    fn body_hasher_known_hash_sample() {
        let key1 = key_relaxed();

        let mut hasher = build_hasher(false, &[key1]);

        let body = b"\
Hello Proff,\r\n\
\r\n\
Let\xe2\x80\x99s try this again, with line\r\n\
breaks and empty lines even.\r\n\
\r\n\
Ciao, und bis bald\r\n\
\r\n\
\r\n\
-- \r\n\
David\r\n\
";

        assert_eq!(hasher.hash_chunk(body), Ok(BodyHasherStance::Interested));

        let results = hasher.finish().unwrap();

        let res1 = results.get(&key1).unwrap();
        assert_eq!(
            util::encode_base64(&res1.as_ref().unwrap().0),
            "RMSbeRTj/zCxWeWQXpEIbiqxH0Jqg5eYs4ORzOt3MT0="
        );
    }

    #[test]
    fn body_hasher_rfc_empty_bodies() {
        let key1 = key_simple();
        let key2 = key_relaxed();

        let mut hasher = build_hasher(false, &[key1, key2]);

        let results = hasher.finish().unwrap();

        // RFC 6376, section 3.4.3 and 3.4.4
        let (h1, _) = results.get(&key1).unwrap().as_ref().unwrap();
        assert_eq!(util::encode_base64(h1), "frcCV1k9oG9oKj3dpUqdJg1PxRT2RSN/XKdLCPjaYaY=");
        let (h2, _) = results.get(&key2).unwrap().as_ref().unwrap();
        assert_eq!(util::encode_base64(h2), "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=");
    }

    #[test]
    fn body_hasher_finalized() {
        let mut hasher = build_hasher(false, &[key_relaxed()]);

        assert_eq!(hasher.hash_chunk(b"abc\r\n"), Ok(BodyHasherStance::Interested));
        assert!(hasher.finish().is_ok());

        assert_eq!(hasher.hash_chunk(b"more"), Err(BodyHashError::Finalized));
        assert_eq!(hasher.finish(), Err(BodyHashError::Finalized));
    }

    #[test]
    fn body_hasher_chunking_independent() {
        let body = b"Hi  there, \r\n\tsecond\t line \n\r\n \r\nlast line  \r\n\r\n\n";
        let keys = [key_simple(), key_relaxed()];

        let mut hasher = build_hasher(false, &keys);
        let _ = hasher.hash_chunk(body).unwrap();
        let expected = hasher.finish().unwrap();

        for i in 0..=body.len() {
            for j in i..=body.len() {
                let mut hasher = build_hasher(false, &keys);
                let _ = hasher.hash_chunk(&body[..i]).unwrap();
                let _ = hasher.hash_chunk(&body[i..j]).unwrap();
                let _ = hasher.hash_chunk(&body[j..]).unwrap();

                assert_eq!(hasher.finish().unwrap(), expected, "split at {i} and {j}");
            }
        }
    }

    #[test]
    fn compute_data_hash_ok() {
        let headers = "From: me@example.com\nTo: you@example.com\nSubject: hi"
            .parse::<HeaderFields>()
            .unwrap();
        let selected = [FieldName::new("From").unwrap(), FieldName::new("Subject").unwrap()];

        let sig_value = " v=1; a=rsa-sha256; d=example.com; s=sel; h=From:Subject; bh=abc; b=";

        let hash = compute_data_hash(
            HashAlgorithm::Sha256,
            CanonicalizationAlgorithm::Relaxed,
            &headers,
            &selected,
            "DKIM-Signature",
            sig_value,
        );

        let expected = sha256_digest(
            b"from:me@example.com\r\n\
subject:hi\r\n\
dkim-signature:v=1; a=rsa-sha256; d=example.com; s=sel; h=From:Subject; bh=abc; b=",
        );

        assert_eq!(hash, expected);
    }

    fn sha256_digest(msg: &[u8]) -> Box<[u8]> {
        crypto::digest(HashAlgorithm::Sha256, msg)
    }
}
