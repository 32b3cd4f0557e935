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

//! Miscellaneous utilities.

use base64ct::{Base64, Encoding};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

/// A trait for entities that have a canonical string representation in the
/// DKIM protocol.
pub trait CanonicalStr {
    /// Returns the canonical string representation of this entity.
    fn canonical_str(&self) -> &'static str;
}

/// An error that occurs when decoding Base64 data.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Base64Error;

impl Display for Base64Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "invalid Base64 data")
    }
}

impl Error for Base64Error {}

/// Encodes binary data as a Base64 string.
pub fn encode_base64(input: impl AsRef<[u8]>) -> String {
    Base64::encode_string(input.as_ref())
}

/// Decodes a Base64 string into binary data.
///
/// The input must not contain whitespace.
pub fn decode_base64(input: &str) -> Result<Vec<u8>, Base64Error> {
    Base64::decode_vec(input).map_err(|_| Base64Error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_ok() {
        assert_eq!(encode_base64(b"abc"), "YWJj");
        assert_eq!(decode_base64("YWJj"), Ok(b"abc".to_vec()));

        assert_eq!(decode_base64("YW Jj"), Err(Base64Error));
    }
}
