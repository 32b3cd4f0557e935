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

//! Representation of email header data.

use crate::parse::{self, normalize_line_endings};
use bstr::ByteSlice;
use std::{
    error::Error,
    fmt::{self, Debug, Display, Formatter},
    hash::{Hash, Hasher},
    str::{self, FromStr},
};

/// A header field, consisting of field name and field body.
pub type HeaderField = (FieldName, FieldBody);

/// An error that occurs when a header field or header block is ill-formed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HeaderFieldError {
    /// A header field name is empty or contains characters other than
    /// printable ASCII except colon.
    InvalidName,
    /// A header field body is not properly folded or contains stray line
    /// breaks.
    InvalidBody,
    /// A header line has no colon separating name and body.
    MissingColon,
    /// A header block contains no header fields.
    Empty,
}

impl Display for HeaderFieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName => write!(f, "invalid header field name"),
            Self::InvalidBody => write!(f, "invalid header field body"),
            Self::MissingColon => write!(f, "header line without colon"),
            Self::Empty => write!(f, "no header fields"),
        }
    }
}

impl Error for HeaderFieldError {}

/// A collection of header fields that can be used for DKIM processing.
///
/// The collection is never empty.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HeaderFields(Box<[HeaderField]>);

impl HeaderFields {
    /// Creates a new non-empty collection of header fields.
    pub fn new(value: impl Into<Box<[HeaderField]>>) -> Result<Self, HeaderFieldError> {
        let value = value.into();
        if value.is_empty() {
            return Err(HeaderFieldError::Empty);
        }
        Ok(Self(value))
    }

    /// Creates header fields from name/value pairs, validating each.
    pub fn from_vec(value: Vec<(String, Vec<u8>)>) -> Result<Self, HeaderFieldError> {
        let value: Vec<_> = value
            .into_iter()
            .map(|(name, value)| {
                let name = FieldName::new(name)?;
                let body = FieldBody::new(value)?;
                Ok((name, body))
            })
            .collect::<Result<_, _>>()?;
        Self::new(value)
    }

    /// Parses a raw header block, one header field per line with continuation
    /// lines folded in. Both CRLF and bare LF line endings are accepted.
    pub fn from_bytes(input: &[u8]) -> Result<Self, HeaderFieldError> {
        let fields: Vec<_> = parse::split_header_fields(input)
            .into_iter()
            .map(parse_header_field)
            .collect::<Result<_, _>>()?;
        Self::new(fields)
    }

    /// Returns the number of header fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always returns false, a `HeaderFields` collection is never empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns an iterator over the bodies of all fields with the given name,
    /// in order of appearance.
    pub fn get<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a FieldBody> + 'a {
        self.0
            .iter()
            .filter(move |(n, _)| *n == name)
            .map(|(_, body)| body)
    }

    /// Returns true if a field with the given name is present.
    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(n, _)| *n == name)
    }
}

impl AsRef<[HeaderField]> for HeaderFields {
    fn as_ref(&self) -> &[HeaderField] {
        &self.0
    }
}

impl From<HeaderFields> for Vec<HeaderField> {
    fn from(header_fields: HeaderFields) -> Self {
        header_fields.0.into()
    }
}

impl FromStr for HeaderFields {
    type Err = HeaderFieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(s.as_bytes())
    }
}

/// Parses a single raw header line of the form `Name: value`.
///
/// The line may be folded and may carry a terminating line break; bare LF line
/// endings are converted to CRLF.
pub fn parse_header_field(line: &[u8]) -> Result<HeaderField, HeaderFieldError> {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);

    let (name, value) = line.split_once_str(":").ok_or(HeaderFieldError::MissingColon)?;

    let name = str::from_utf8(name).map_err(|_| HeaderFieldError::InvalidName)?;
    let name = FieldName::new(name)?;

    let value = normalize_line_endings(value);
    let body = FieldBody::new(value.into_owned())?;

    Ok((name, body))
}

/// A header field name.
///
/// Comparison and hashing are case-insensitive.
#[derive(Clone, Eq)]
pub struct FieldName(Box<str>);

impl FieldName {
    /// Creates a new field name, which must be non-empty printable ASCII
    /// without a colon.
    pub fn new(value: impl Into<Box<str>>) -> Result<Self, HeaderFieldError> {
        let value = value.into();
        if value.is_empty() {
            return Err(HeaderFieldError::InvalidName);
        }
        if !value.chars().all(|c| c.is_ascii_graphic() && c != ':') {
            return Err(HeaderFieldError::InvalidName);
        }
        Ok(Self(value))
    }
}

impl AsRef<str> for FieldName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for FieldName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for FieldName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl PartialEq for FieldName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl PartialEq<str> for FieldName {
    fn eq(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl PartialEq<&str> for FieldName {
    fn eq(&self, other: &&str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl Hash for FieldName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

/// A header field body.
///
/// The body is the raw content following the colon, including leading
/// whitespace and any folding. Line breaks are always CRLF.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct FieldBody(Box<[u8]>);

impl FieldBody {
    /// Creates a new field body, which must only contain folded continuation
    /// lines and no stray CR or LF.
    pub fn new(value: impl Into<Box<[u8]>>) -> Result<Self, HeaderFieldError> {
        let value = value.into();

        // only folded continuation lines:
        if !value
            .split_str("\r\n")
            .skip(1)
            .all(|line| line.starts_with(b" ") || line.starts_with(b"\t"))
        {
            return Err(HeaderFieldError::InvalidBody);
        }
        // no blank continuation lines, no trailing CRLF:
        if !value
            .split_str("\r\n")
            .skip(1)
            .all(|line| !line.trim_with(|c| matches!(c, ' ' | '\t')).is_empty())
        {
            return Err(HeaderFieldError::InvalidBody);
        }
        // no stray CR and LF:
        if !value
            .split_str("\r\n")
            .all(|line| !line.contains(&b'\r') && !line.contains(&b'\n'))
        {
            return Err(HeaderFieldError::InvalidBody);
        }

        // All other bytes are allowed, UTF-8 is not required.
        Ok(Self(value))
    }
}

impl AsRef<[u8]> for FieldBody {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for FieldBody {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FieldBody").field(&self.0.as_bstr()).finish()
    }
}
