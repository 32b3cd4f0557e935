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

//! The DKIM signature type and its parts.

mod names;

pub use names::{DomainName, Identity, ParseDomainError, Selector};

use crate::{
    crypto::{HashAlgorithm, KeyType},
    header::FieldName,
    tag_list::{parse_base64_tag_value, parse_colon_separated_tag_value, TagList, TagSpec},
    util::{self, CanonicalStr},
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

/// The name of the DKIM-Signature header field.
pub const DKIM_SIGNATURE_NAME: &str = "DKIM-Signature";

/// A signature algorithm.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignatureAlgorithm {
    /// The *rsa-sha256* signature algorithm.
    RsaSha256,
    /// The *ed25519-sha256* signature algorithm.
    Ed25519Sha256,
}

impl SignatureAlgorithm {
    /// Returns this signature algorithm’s key type.
    pub fn key_type(self) -> KeyType {
        match self {
            Self::RsaSha256 => KeyType::Rsa,
            Self::Ed25519Sha256 => KeyType::Ed25519,
        }
    }

    /// Returns this signature algorithm’s hash algorithm.
    pub fn hash_algorithm(self) -> HashAlgorithm {
        match self {
            Self::RsaSha256 | Self::Ed25519Sha256 => HashAlgorithm::Sha256,
        }
    }
}

impl From<(KeyType, HashAlgorithm)> for SignatureAlgorithm {
    fn from(input: (KeyType, HashAlgorithm)) -> Self {
        match input {
            (KeyType::Rsa, HashAlgorithm::Sha256) => Self::RsaSha256,
            (KeyType::Ed25519, HashAlgorithm::Sha256) => Self::Ed25519Sha256,
        }
    }
}

impl CanonicalStr for SignatureAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::RsaSha256 => "rsa-sha256",
            Self::Ed25519Sha256 => "ed25519-sha256",
        }
    }
}

impl Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("rsa-sha256") {
            Ok(Self::RsaSha256)
        } else if s.eq_ignore_ascii_case("ed25519-sha256") {
            Ok(Self::Ed25519Sha256)
        } else {
            Err("unknown signature algorithm")
        }
    }
}

/// A canonicalization algorithm.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum CanonicalizationAlgorithm {
    /// The *simple* canonicalization algorithm.
    #[default]
    Simple,
    /// The *relaxed* canonicalization algorithm.
    Relaxed,
}

impl CanonicalStr for CanonicalizationAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Relaxed => "relaxed",
        }
    }
}

impl Display for CanonicalizationAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl FromStr for CanonicalizationAlgorithm {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("simple") {
            Ok(Self::Simple)
        } else if s.eq_ignore_ascii_case("relaxed") {
            Ok(Self::Relaxed)
        } else {
            Err("unknown canonicalization algorithm")
        }
    }
}

/// A pair of header/body canonicalization algorithms.
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
pub struct Canonicalization {
    /// The header canonicalization.
    pub header: CanonicalizationAlgorithm,
    /// The body canonicalization.
    pub body: CanonicalizationAlgorithm,
}

impl CanonicalStr for Canonicalization {
    fn canonical_str(&self) -> &'static str {
        use CanonicalizationAlgorithm::*;

        match (self.header, self.body) {
            (Simple, Simple) => "simple/simple",
            (Simple, Relaxed) => "simple/relaxed",
            (Relaxed, Simple) => "relaxed/simple",
            (Relaxed, Relaxed) => "relaxed/relaxed",
        }
    }
}

impl Display for Canonicalization {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl fmt::Debug for Canonicalization {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", &self.header, &self.body)
    }
}

impl From<(CanonicalizationAlgorithm, CanonicalizationAlgorithm)> for Canonicalization {
    fn from((header, body): (CanonicalizationAlgorithm, CanonicalizationAlgorithm)) -> Self {
        Self { header, body }
    }
}

impl FromStr for Canonicalization {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // a missing body algorithm defaults to simple
        Ok(if let Some((header, body)) = s.split_once('/') {
            Self {
                header: header.parse()?,
                body: body.parse()?,
            }
        } else {
            Self {
                header: s.parse()?,
                body: Default::default(),
            }
        })
    }
}

/// An error that occurs when parsing a DKIM-Signature header field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DkimSignatureError {
    /// The signing domain, if it could be found.
    pub domain: Option<DomainName>,
    /// The selector, if it could be found.
    pub selector: Option<Selector>,
    /// The kind of error.
    pub kind: DkimSignatureErrorKind,
}

impl Display for DkimSignatureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(domain) = &self.domain {
            write!(f, " (d={domain})")?;
        }
        Ok(())
    }
}

impl Error for DkimSignatureError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DkimSignatureErrorKind {
    MissingVersionTag,
    UnsupportedVersion,
    HistoricAlgorithm,
    UnsupportedAlgorithm,
    MissingAlgorithmTag,
    MissingSignatureTag,
    MissingBodyHashTag,
    UnsupportedCanonicalization,
    InvalidDomain,
    MissingDomainTag,
    SignedHeadersEmpty,
    FromHeaderNotSigned,
    MissingSignedHeadersTag,
    InvalidBodyLength,
    QueryMethodsNotSupported,
    InvalidSelector,
    MissingSelectorTag,
    InvalidTimestamp,
    InvalidExpiration,
    ValueSyntax,
    DomainMismatch,
    InvalidIdentity,
    ExpirationNotAfterTimestamp,
    InvalidTagList,
}

impl Display for DkimSignatureErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingVersionTag => write!(f, "v= tag missing"),
            Self::UnsupportedVersion => write!(f, "unsupported version"),
            Self::HistoricAlgorithm => write!(f, "historic signature algorithm"),
            Self::UnsupportedAlgorithm => write!(f, "unsupported algorithm"),
            Self::MissingAlgorithmTag => write!(f, "a= tag missing"),
            Self::MissingSignatureTag => write!(f, "b= tag missing"),
            Self::MissingBodyHashTag => write!(f, "bh= tag missing"),
            Self::UnsupportedCanonicalization => write!(f, "unsupported canonicalization"),
            Self::InvalidDomain => write!(f, "invalid domain"),
            Self::MissingDomainTag => write!(f, "d= tag missing"),
            Self::SignedHeadersEmpty => write!(f, "no signed headers"),
            Self::FromHeaderNotSigned => write!(f, "From header not signed"),
            Self::MissingSignedHeadersTag => write!(f, "h= tag missing"),
            Self::InvalidBodyLength => write!(f, "invalid body length"),
            Self::QueryMethodsNotSupported => write!(f, "query method not supported"),
            Self::InvalidSelector => write!(f, "invalid selector"),
            Self::MissingSelectorTag => write!(f, "s= tag missing"),
            Self::InvalidTimestamp => write!(f, "invalid timestamp"),
            Self::InvalidExpiration => write!(f, "invalid expiration"),
            Self::ValueSyntax => write!(f, "syntax error"),
            Self::DomainMismatch => write!(f, "domain mismatch"),
            Self::InvalidIdentity => write!(f, "invalid identity"),
            Self::ExpirationNotAfterTimestamp => write!(f, "expiration not after timestamp"),
            Self::InvalidTagList => write!(f, "invalid tag-list"),
        }
    }
}

/// A DKIM signature as encoded in a `DKIM-Signature` header field.
#[derive(Clone, Eq, PartialEq)]
pub struct DkimSignature {
    pub algorithm: SignatureAlgorithm,
    pub signature_data: Box<[u8]>,
    pub body_hash: Box<[u8]>,
    pub canonicalization: Canonicalization,
    pub domain: DomainName,
    pub signed_headers: Box<[FieldName]>,  // not empty, includes From
    pub identity: Option<Identity>,
    pub body_length: Option<u64>,
    pub selector: Selector,
    pub timestamp: Option<u64>,
    pub expiration: Option<u64>,
}

impl DkimSignature {
    fn from_tag_list(tag_list: &TagList<'_>) -> Result<Self, DkimSignatureErrorKind> {
        let mut version_seen = false;
        let mut algorithm = None;
        let mut signature_data = None;
        let mut body_hash = None;
        let mut canonicalization = None;
        let mut domain = None;
        let mut signed_headers = None;
        let mut identity = None;
        let mut body_length = None;
        let mut selector = None;
        let mut timestamp = None;
        let mut expiration = None;

        for &TagSpec { name, value } in tag_list.as_ref() {
            match name {
                "v" => {
                    if value != "1" {
                        return Err(DkimSignatureErrorKind::UnsupportedVersion);
                    }
                    version_seen = true;
                }
                "a" => {
                    let value = value.parse().map_err(|_| {
                        // rsa-sha1 is recognised but no longer supported (RFC 8301)
                        if value.eq_ignore_ascii_case("rsa-sha1") {
                            DkimSignatureErrorKind::HistoricAlgorithm
                        } else {
                            DkimSignatureErrorKind::UnsupportedAlgorithm
                        }
                    })?;
                    algorithm = Some(value);
                }
                "b" => {
                    let value = parse_base64_tag_value(value)
                        .map_err(|_| DkimSignatureErrorKind::ValueSyntax)?;
                    signature_data = Some(value.into());
                }
                "bh" => {
                    let value = parse_base64_tag_value(value)
                        .map_err(|_| DkimSignatureErrorKind::ValueSyntax)?;
                    body_hash = Some(value.into());
                }
                "c" => {
                    let value = value
                        .parse()
                        .map_err(|_| DkimSignatureErrorKind::UnsupportedCanonicalization)?;
                    canonicalization = Some(value);
                }
                "d" => {
                    let value = DomainName::new(value)
                        .map_err(|_| DkimSignatureErrorKind::InvalidDomain)?;
                    domain = Some(value);
                }
                "h" => {
                    let mut sh = vec![];
                    for v in parse_colon_separated_tag_value(value) {
                        let name = FieldName::new(v).map_err(|_| DkimSignatureErrorKind::ValueSyntax)?;
                        sh.push(name);
                    }
                    if sh.is_empty() {
                        return Err(DkimSignatureErrorKind::SignedHeadersEmpty);
                    }
                    if !sh.iter().any(|h| *h == "From") {
                        return Err(DkimSignatureErrorKind::FromHeaderNotSigned);
                    }
                    signed_headers = Some(sh.into());
                }
                "i" => {
                    let value = Identity::new(value)
                        .map_err(|_| DkimSignatureErrorKind::InvalidIdentity)?;
                    identity = Some(value);
                }
                "l" => {
                    let value = value
                        .parse()
                        .map_err(|_| DkimSignatureErrorKind::InvalidBodyLength)?;
                    body_length = Some(value);
                }
                "q" => {
                    if !parse_colon_separated_tag_value(value)
                        .iter()
                        .any(|v| v.eq_ignore_ascii_case("dns/txt"))
                    {
                        return Err(DkimSignatureErrorKind::QueryMethodsNotSupported);
                    }
                }
                "s" => {
                    let value = Selector::new(value)
                        .map_err(|_| DkimSignatureErrorKind::InvalidSelector)?;
                    selector = Some(value);
                }
                "t" => {
                    let value = value
                        .parse()
                        .map_err(|_| DkimSignatureErrorKind::InvalidTimestamp)?;
                    timestamp = Some(value);
                }
                "x" => {
                    let value = value
                        .parse()
                        .map_err(|_| DkimSignatureErrorKind::InvalidExpiration)?;
                    expiration = Some(value);
                }
                // unknown tags must be ignored
                _ => {}
            }
        }

        if !version_seen {
            return Err(DkimSignatureErrorKind::MissingVersionTag);
        }

        let algorithm = algorithm.ok_or(DkimSignatureErrorKind::MissingAlgorithmTag)?;
        let signature_data = signature_data.ok_or(DkimSignatureErrorKind::MissingSignatureTag)?;
        let body_hash = body_hash.ok_or(DkimSignatureErrorKind::MissingBodyHashTag)?;
        let domain = domain.ok_or(DkimSignatureErrorKind::MissingDomainTag)?;
        let signed_headers = signed_headers.ok_or(DkimSignatureErrorKind::MissingSignedHeadersTag)?;
        let selector = selector.ok_or(DkimSignatureErrorKind::MissingSelectorTag)?;

        if let Some(i) = &identity {
            if !i.domain_part.eq_or_subdomain_of(&domain) {
                return Err(DkimSignatureErrorKind::DomainMismatch);
            }
        }

        if let (Some(timestamp), Some(expiration)) = (timestamp, expiration) {
            if expiration <= timestamp {
                return Err(DkimSignatureErrorKind::ExpirationNotAfterTimestamp);
            }
        }

        let canonicalization = canonicalization.unwrap_or_default();

        Ok(Self {
            algorithm,
            signature_data,
            body_hash,
            canonicalization,
            domain,
            signed_headers,
            identity,
            body_length,
            selector,
            timestamp,
            expiration,
        })
    }
}

impl FromStr for DkimSignature {
    type Err = DkimSignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag_list = TagList::from_str(s).map_err(|_| DkimSignatureError {
            domain: None,
            selector: None,
            kind: DkimSignatureErrorKind::InvalidTagList,
        })?;

        DkimSignature::from_tag_list(&tag_list).map_err(|kind| {
            // attempt to find _some_ info for diagnostics
            let domain = tag_list.get("d").and_then(|v| DomainName::new(v).ok());
            let selector = tag_list.get("s").and_then(|v| Selector::new(v).ok());
            DkimSignatureError { domain, selector, kind }
        })
    }
}

impl fmt::Debug for DkimSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DkimSignature")
            .field("algorithm", &self.algorithm)
            .field("signature_data", &util::encode_base64(&self.signature_data))
            .field("body_hash", &util::encode_base64(&self.body_hash))
            .field("canonicalization", &self.canonicalization)
            .field("domain", &self.domain)
            .field("signed_headers", &self.signed_headers)
            .field("identity", &self.identity)
            .field("body_length", &self.body_length)
            .field("selector", &self.selector)
            .field("timestamp", &self.timestamp)
            .field("expiration", &self.expiration)
            .finish()
    }
}
