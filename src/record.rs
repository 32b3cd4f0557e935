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

//! DKIM public key record.

use crate::{
    crypto::{HashAlgorithm, KeyType},
    tag_list::{parse_base64_tag_value, parse_colon_separated_tag_value, TagList, TagSpec},
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

#[derive(Debug, PartialEq, Eq)]
pub enum ServiceType {
    Any,
    Email,
    Other(Box<str>),
}

#[derive(Debug, PartialEq, Eq)]
pub enum Flags {
    Testing,
    NoSubdomains,
    Other(Box<str>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DkimKeyRecordParseError {
    RecordSyntax,  // fundamental syntax errors such as invalid UTF-8 data
    InvalidBase64,
    TagListSyntax,
    UnsupportedVersion,
    MisplacedVersionTag,
    UnsupportedKeyType,
    NoSupportedHashAlgorithms,
    RevokedKey,
    MissingKeyTag,
    ServiceTypesEmpty,
}

impl Display for DkimKeyRecordParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecordSyntax => write!(f, "ill-formed key record"),
            Self::InvalidBase64 => write!(f, "invalid Base64 string"),
            Self::TagListSyntax => write!(f, "invalid tag-list"),
            Self::UnsupportedVersion => write!(f, "unsupported version"),
            Self::MisplacedVersionTag => write!(f, "v= tag not initial"),
            Self::UnsupportedKeyType => write!(f, "unsupported key type"),
            Self::NoSupportedHashAlgorithms => write!(f, "no supported hash algorithms"),
            Self::RevokedKey => write!(f, "key revoked"),
            Self::MissingKeyTag => write!(f, "p= tag missing"),
            Self::ServiceTypesEmpty => write!(f, "service types empty"),
        }
    }
}

impl Error for DkimKeyRecordParseError {}

/// A DKIM public key record, as published in DNS.
#[derive(Debug, PartialEq, Eq)]
pub struct DkimKeyRecord {
    pub hash_algorithms: Box<[HashAlgorithm]>,  // non-empty
    pub key_type: KeyType,
    pub key_data: Box<[u8]>,
    pub service_types: Box<[ServiceType]>,  // non-empty
    pub flags: Box<[Flags]>,
}

impl DkimKeyRecord {
    fn from_tag_list(tag_list: &TagList<'_>) -> Result<Self, DkimKeyRecordParseError> {
        let mut hash_algorithms = HashAlgorithm::all();
        let mut key_type = KeyType::Rsa;
        let mut key_data = None;
        let mut service_types = vec![ServiceType::Any];
        let mut flags = vec![];

        for (i, &TagSpec { name, value }) in tag_list.as_ref().iter().enumerate() {
            match name {
                "v" => {
                    if i != 0 {
                        return Err(DkimKeyRecordParseError::MisplacedVersionTag);
                    }
                    if value != "DKIM1" {
                        return Err(DkimKeyRecordParseError::UnsupportedVersion);
                    }
                }
                "h" => {
                    hash_algorithms = parse_colon_separated_tag_value(value)
                        .into_iter()
                        .filter(|s| s.eq_ignore_ascii_case("sha256"))
                        .map(|_| HashAlgorithm::Sha256)
                        .collect();

                    if hash_algorithms.is_empty() {
                        return Err(DkimKeyRecordParseError::NoSupportedHashAlgorithms);
                    }
                }
                "k" => {
                    if value.eq_ignore_ascii_case("ed25519") {
                        key_type = KeyType::Ed25519;
                    } else if !value.eq_ignore_ascii_case("rsa") {
                        return Err(DkimKeyRecordParseError::UnsupportedKeyType);
                    }
                }
                "p" => {
                    // an empty p= tag marks the key as revoked
                    if value.is_empty() {
                        return Err(DkimKeyRecordParseError::RevokedKey);
                    }

                    let s = parse_base64_tag_value(value)
                        .map_err(|_| DkimKeyRecordParseError::InvalidBase64)?;

                    key_data = Some(s.into());
                }
                "s" => {
                    let mut st = vec![];

                    for s in parse_colon_separated_tag_value(value) {
                        if s == "*" {
                            st.push(ServiceType::Any);
                        } else if s.eq_ignore_ascii_case("email") {
                            st.push(ServiceType::Email);
                        } else if !s.is_empty() {
                            st.push(ServiceType::Other(s.into()));
                        }
                    }

                    if st.is_empty() {
                        return Err(DkimKeyRecordParseError::ServiceTypesEmpty);
                    }

                    service_types = st;
                }
                "t" => {
                    let mut fs = vec![];

                    for s in parse_colon_separated_tag_value(value) {
                        if s.eq_ignore_ascii_case("y") {
                            fs.push(Flags::Testing);
                        } else if s.eq_ignore_ascii_case("s") {
                            fs.push(Flags::NoSubdomains);
                        } else if !s.is_empty() {
                            fs.push(Flags::Other(s.into()));
                        }
                    }

                    flags = fs;
                }
                // other tags, including n=, are ignored
                _ => {}
            }
        }

        let key_data = key_data.ok_or(DkimKeyRecordParseError::MissingKeyTag)?;

        Ok(Self {
            hash_algorithms: hash_algorithms.into(),
            key_type,
            key_data,
            service_types: service_types.into(),
            flags: flags.into(),
        })
    }

    /// Returns true if the record may be used for email signatures.
    pub fn is_email_service(&self) -> bool {
        self.service_types
            .iter()
            .any(|t| matches!(t, ServiceType::Any | ServiceType::Email))
    }
}

impl FromStr for DkimKeyRecord {
    type Err = DkimKeyRecordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag_list = TagList::from_str(s).map_err(|_| DkimKeyRecordParseError::TagListSyntax)?;

        Self::from_tag_list(&tag_list)
    }
}
