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
    crypto::{HashAlgorithm, VerifyingKey},
    record::{DkimKeyRecord, DkimKeyRecordParseError},
    signature::{DomainName, Selector},
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    future::Future,
    io::{self, ErrorKind},
    pin::Pin,
    str::FromStr,
};
use tracing::trace;

/// An error that occurs when resolving a public key.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KeyLookupError {
    /// No key record exists for the domain and selector.
    NotFound,
    /// The key record exists, but the key has been revoked (empty *p=* tag).
    Revoked,
    /// The lookup failed for a reason that may go away on retry.
    TemporaryFailure,
    /// More than one key record was found.
    MultipleReplies,
    /// The key record could not be understood or its key could not be used.
    InvalidRecord,
}

impl Display for KeyLookupError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "no key record found"),
            Self::Revoked => write!(f, "key revoked"),
            Self::TemporaryFailure => write!(f, "temporary key lookup failure"),
            Self::MultipleReplies => write!(f, "multiple key records"),
            Self::InvalidRecord => write!(f, "invalid key record"),
        }
    }
}

impl Error for KeyLookupError {}

/// A source of DKIM public keys.
///
/// This is the seam where verification meets the outside world. Verification
/// awaits the returned future under the configured lookup timeout.
pub trait KeyResolver: Send + Sync {
    /// The future resolving to the public key.
    type Query<'a>: Future<Output = Result<VerifyingKey, KeyLookupError>> + Send + 'a
    where
        Self: 'a;

    /// Resolves the public key published for the signing domain and selector.
    fn resolve_public_key<'a>(
        &'a self,
        domain: &'a DomainName,
        selector: &'a Selector,
    ) -> Self::Query<'a>;
}

/// A trait for entities that perform DNS resolution of TXT records.
pub trait LookupTxt: Send + Sync {
    /// The answer consisting of TXT records found.
    type Answer: IntoIterator<Item = io::Result<Vec<u8>>>;
    /// The future resolving to the query’s answer.
    type Query<'a>: Future<Output = io::Result<Self::Answer>> + Send + 'a
    where
        Self: 'a;

    /// Looks up the domain’s TXT records in DNS.
    ///
    /// The domain will be passed to this trait as a string in A-label (ASCII)
    /// format with a trailing dot (eg `selector._domainkey.example.com.`).
    /// Each item of the answer is one TXT record, its character strings
    /// concatenated.
    ///
    /// A non-existent domain is to be reported as an error of kind
    /// [`ErrorKind::NotFound`].
    fn lookup_txt(&self, domain: &str) -> Self::Query<'_>;
}

/// A [`KeyResolver`] that looks up DKIM key records in DNS.
#[derive(Clone, Debug, Default)]
pub struct TxtKeyResolver<T> {
    lookup: T,
}

impl<T> TxtKeyResolver<T> {
    pub fn new(lookup: T) -> Self {
        Self { lookup }
    }

    pub fn into_inner(self) -> T {
        self.lookup
    }
}

impl<T: LookupTxt> KeyResolver for TxtKeyResolver<T> {
    type Query<'a> = Pin<Box<dyn Future<Output = Result<VerifyingKey, KeyLookupError>> + Send + 'a>>
    where
        Self: 'a;

    fn resolve_public_key<'a>(
        &'a self,
        domain: &'a DomainName,
        selector: &'a Selector,
    ) -> Self::Query<'a> {
        Box::pin(async move {
            let (domain, selector) = match (domain.to_ascii(), selector.to_ascii()) {
                (Ok(d), Ok(s)) => (d, s),
                _ => {
                    trace!("invalid key record domain name");
                    return Err(KeyLookupError::NotFound);
                }
            };

            // Note the trailing dot: only absolute queries.
            let dname = format!("{selector}._domainkey.{domain}.");

            trace!(%dname, "looking up key record");

            let txts = match self.lookup.lookup_txt(&dname).await {
                Ok(txts) => txts,
                Err(e) => return Err(map_io_error(e)),
            };

            let mut txts = txts.into_iter();

            let Some(txt) = txts.next() else {
                trace!("no key record");
                return Err(KeyLookupError::NotFound);
            };

            if txts.next().is_some() {
                trace!("multiple key records");
                return Err(KeyLookupError::MultipleReplies);
            }

            let txt = txt.map_err(map_io_error)?;

            read_public_key(&txt)
        })
    }
}

fn map_io_error(e: io::Error) -> KeyLookupError {
    match e.kind() {
        ErrorKind::NotFound => {
            trace!("no key record");
            KeyLookupError::NotFound
        }
        _ => {
            trace!("could not look up key record: {e}");
            KeyLookupError::TemporaryFailure
        }
    }
}

/// Reads the public key from the text of a DKIM key record.
pub fn read_public_key(txt: &[u8]) -> Result<VerifyingKey, KeyLookupError> {
    let s = std::str::from_utf8(txt).map_err(|_| KeyLookupError::InvalidRecord)?;

    let record = match DkimKeyRecord::from_str(s) {
        Ok(r) => r,
        Err(DkimKeyRecordParseError::RevokedKey) => {
            trace!("key in key record revoked");
            return Err(KeyLookupError::Revoked);
        }
        Err(e) => {
            trace!("invalid key record: {e}");
            return Err(KeyLookupError::InvalidRecord);
        }
    };

    if !record.is_email_service() || !record.hash_algorithms.contains(&HashAlgorithm::Sha256) {
        trace!("key record not usable for email signatures");
        return Err(KeyLookupError::InvalidRecord);
    }

    VerifyingKey::from_key_data(record.key_type, &record.key_data).map_err(|e| {
        trace!("unusable public key: {e}");
        KeyLookupError::InvalidRecord
    })
}
