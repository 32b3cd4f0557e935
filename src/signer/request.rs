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
    crypto::SigningKey,
    header::{FieldName, HeaderFields},
    signature::{
        Canonicalization, DomainName, Identity, Selector, SignatureAlgorithm,
        DKIM_SIGNATURE_NAME,
    },
    signer::SignerError,
    tag_list,
};
use std::{collections::HashSet, time::Duration};

/// The maximum size of rendered signature output: 4096 bytes plus terminator.
pub const MAX_SIGNATURE_OUTPUT_SIZE: usize = 4097;

/// The default line width of the formatted signature header.
pub const LINE_WIDTH: usize = 78;

/// A generator for the body length limit tag.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum BodyLength {
    /// Do not limit the body length: no *l=* tag.
    #[default]
    All,
    /// Sign the body as presented and record its length in the *l=* tag.
    MessageContent,
    /// Sign exactly the specified number of bytes of canonicalized body
    /// content: set *l=* to the given value.
    Exact(u64),
}

impl BodyLength {
    /// Returns the length limit to apply while hashing.
    pub fn to_limit(self) -> Result<Option<usize>, SignerError> {
        match self {
            Self::All | Self::MessageContent => Ok(None),
            Self::Exact(n) => n.try_into().map(Some).map_err(|_| SignerError::Overflow),
        }
    }
}

/// A generator for the timestamp tag.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Timestamp {
    /// Use the current system time.
    #[default]
    Now,
    /// Use the given time in seconds since the Unix epoch.
    Exact(u64),
}

/// Selection of headers to include in the h= tag.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum HeaderSelection {
    /// Select those present headers that are in the default set.
    #[default]
    Auto,
    /// Use exactly the headers given here as contents of the h= tag, in order.
    Manual(Vec<FieldName>),
}

/// Selects all headers matching the predicate, in reverse (evaluation order).
pub fn select_headers<'a, 'b: 'a>(
    headers: &'a HeaderFields,
    mut pred: impl FnMut(&FieldName) -> bool + 'b,
) -> impl DoubleEndedIterator<Item = &'a FieldName> + 'a {
    headers
        .as_ref()
        .iter()
        .rev()
        .filter_map(move |(name, _)| if pred(name) { Some(name) } else { None })
}

/// Returns a collection of headers that should be signed.
///
/// RFC 6376 does not actually recommend a specific set of headers to be signed.
/// Instead, the collection returned here contains the so-called ‘examples’ from
/// section 5.4.1.
pub fn default_signed_headers() -> Vec<FieldName> {
    let names = [
        "From",
        "Reply-To",
        "Subject",
        "Date",
        "To",
        "Cc",
        "Resent-Date",
        "Resent-From",
        "Resent-To",
        "Resent-Cc",
        "In-Reply-To",
        "References",
        "List-Id",
        "List-Help",
        "List-Unsubscribe",
        "List-Subscribe",
        "List-Post",
        "List-Owner",
        "List-Archive",
    ];

    names
        .into_iter()
        .filter_map(|n| FieldName::new(n).ok())
        .collect()
}

/// Formatting options.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputFormat {
    /// The header name, must be equal to `DKIM-Signature` ignoring case.
    pub header_name: String,
    /// The maximum line width in characters to use when breaking lines. The
    /// default is 78.
    pub line_width: usize,
    /// The indentation whitespace to use for continuation lines. Must be a
    /// non-empty sequence of space and tab characters. The default is `"\t"`.
    pub indentation: String,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            header_name: DKIM_SIGNATURE_NAME.into(),
            line_width: LINE_WIDTH,
            indentation: "\t".into(),
        }
    }
}

/// A request for creation of a DKIM signature.
pub struct SignRequest<T> {
    /// The key to use for producing the cryptographic signature.
    pub signing_key: T,

    /// The signature algorithm to use in the *a=* tag. Must be compatible with
    /// the signing key.
    pub algorithm: SignatureAlgorithm,
    /// The canonicalization to use in the *c=* tag.
    pub canonicalization: Canonicalization,
    /// The selection of headers to include in the *h=* tag.
    pub header_selection: HeaderSelection,
    /// The signing domain to use in the *d=* tag.
    pub domain: DomainName,
    /// The agent or user identifier to use in the *i=* tag.
    pub identity: Option<Identity>,
    /// The selector to use in the *s=* tag.
    pub selector: Selector,
    /// The strategy to use for generating the *l=* tag.
    pub body_length: BodyLength,
    /// The timestamp value to record in the *t=* tag.
    pub timestamp: Option<Timestamp>,
    /// The duration for which the signature will remain valid (*x=* tag).
    pub valid_duration: Option<Duration>,
    /// Whether headers named in a manual selection may be absent from the
    /// message. Absent headers are still listed in *h=* and then protect
    /// against later addition of such a header.
    pub allow_missing_headers: bool,
    /// The size of the caller’s output buffer for the rendered
    /// `DKIM-Signature: …` header including terminator. Must not exceed
    /// [`MAX_SIGNATURE_OUTPUT_SIZE`].
    pub output_buffer_size: usize,

    /// The formatting options to use for producing the formatted
    /// *DKIM-Signature* header.
    pub format: OutputFormat,
}

impl<T> SignRequest<T> {
    pub fn new(
        domain: DomainName,
        selector: Selector,
        algorithm: SignatureAlgorithm,
        signing_key: T,
    ) -> Self {
        Self {
            signing_key,

            algorithm,
            canonicalization: Default::default(),
            header_selection: HeaderSelection::Auto,
            domain,
            identity: None,
            selector,
            body_length: BodyLength::All,
            timestamp: Some(Timestamp::Now),
            valid_duration: None,
            allow_missing_headers: false,
            output_buffer_size: MAX_SIGNATURE_OUTPUT_SIZE,

            format: Default::default(),
        }
    }
}

impl SignRequest<SigningKey> {
    /// Creates a request from plain string inputs: signing domain, selector,
    /// the names of the headers to sign, and a PEM-encoded private key.
    ///
    /// The signature algorithm is derived from the key type.
    pub fn from_parts(
        domain: &str,
        selector: &str,
        signed_headers: &[&str],
        key_pem: &str,
    ) -> Result<Self, SignerError> {
        if domain.is_empty() {
            return Err(SignerError::InvalidDomain);
        }
        let domain = DomainName::new(domain).map_err(|_| SignerError::InvalidDomain)?;

        if selector.is_empty() {
            return Err(SignerError::InvalidSelector);
        }
        let selector = Selector::new(selector).map_err(|_| SignerError::InvalidSelector)?;

        if signed_headers.is_empty() {
            return Err(SignerError::NoSignedHeaders);
        }
        let signed_headers = signed_headers
            .iter()
            .map(|&name| FieldName::new(name).map_err(|_| SignerError::InvalidSignedFieldName))
            .collect::<Result<Vec<_>, _>>()?;

        if key_pem.trim().is_empty() {
            return Err(SignerError::EmptyKey);
        }
        let signing_key = SigningKey::from_pem(key_pem).map_err(SignerError::KeyFailure)?;

        let algorithm = SignatureAlgorithm::from((signing_key.key_type(), Default::default()));

        let mut request = Self::new(domain, selector, algorithm, signing_key);
        request.header_selection = HeaderSelection::Manual(signed_headers);

        Ok(request)
    }
}

/// Validates a request against the message headers and returns the header
/// names to sign.
///
/// All checks happen before any hashing is done.
pub fn validate_request<T: AsRef<SigningKey>>(
    request: &SignRequest<T>,
    headers: &HeaderFields,
) -> Result<Vec<FieldName>, SignerError> {
    if request.signing_key.as_ref().key_type() != request.algorithm.key_type() {
        return Err(SignerError::KeyTypeMismatch);
    }

    if request.output_buffer_size > MAX_SIGNATURE_OUTPUT_SIZE {
        return Err(SignerError::OutputBufferTooLarge);
    }

    let format = &request.format;
    if !format.header_name.eq_ignore_ascii_case(DKIM_SIGNATURE_NAME)
        || format.line_width == 0
        || format.indentation.is_empty()
        || !format.indentation.chars().all(|c| matches!(c, ' ' | '\t'))
    {
        return Err(SignerError::InvalidOutputFormat);
    }

    if let Some(duration) = request.valid_duration {
        if duration.as_secs() == 0 {
            return Err(SignerError::ZeroExpirationDuration);
        }
    }

    if let Some(identity) = &request.identity {
        if !identity.domain_part.eq_or_subdomain_of(&request.domain) {
            return Err(SignerError::DomainMismatch);
        }
        // the local part goes into the tag value unencoded
        if let Some(local_part) = &identity.local_part {
            if !local_part.chars().all(tag_list::is_tval_char) {
                return Err(SignerError::InvalidIdentity);
            }
        }
    }

    request.body_length.to_limit()?;

    if !headers.contains("From") {
        return Err(SignerError::MissingFromHeader);
    }

    let signed_headers = match &request.header_selection {
        HeaderSelection::Auto => {
            let def: HashSet<_> = default_signed_headers().into_iter().collect();
            select_headers(headers, move |name| def.contains(name))
                .cloned()
                .collect()
        }
        HeaderSelection::Manual(names) => {
            if names.is_empty() {
                return Err(SignerError::NoSignedHeaders);
            }
            if !names.iter().any(|name| *name == "From") {
                return Err(SignerError::FromHeaderNotSigned);
            }
            if !request.allow_missing_headers {
                if let Some(name) = names.iter().find(|name| !headers.contains(name.as_ref())) {
                    return Err(SignerError::MissingSignedHeader(name.clone()));
                }
            }
            names.clone()
        }
    };

    Ok(signed_headers)
}
