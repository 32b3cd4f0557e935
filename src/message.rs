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

//! Whole messages: separation of header and body, signature insertion.

use crate::{
    header::{self, HeaderField, HeaderFieldError, HeaderFields},
    parse::{self, normalize_line_endings},
};
use bstr::ByteSlice;

/// An email message, consisting of header fields and body.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Message {
    headers: Vec<HeaderField>,
    body: Vec<u8>,
}

impl Message {
    pub fn new(headers: Vec<HeaderField>, body: Vec<u8>) -> Self {
        Self { headers, body }
    }

    /// Parses a raw message.
    ///
    /// The header is separated from the body at the first empty line. Bare LF
    /// line endings are converted to CRLF. A message without an empty line
    /// consists of header only.
    pub fn parse(input: &[u8]) -> Result<Self, HeaderFieldError> {
        let input = normalize_line_endings(input);

        let (header, body) = if let Some(body) = input.strip_prefix(b"\r\n") {
            (&[][..], body)
        } else {
            match input.find(b"\r\n\r\n") {
                Some(i) => (&input[..(i + 2)], &input[(i + 4)..]),
                None => (&input[..], &[][..]),
            }
        };

        let headers = parse::split_header_fields(header)
            .into_iter()
            .map(header::parse_header_field)
            .collect::<Result<_, _>>()?;

        Ok(Self {
            headers,
            body: body.into(),
        })
    }

    pub fn headers(&self) -> &[HeaderField] {
        &self.headers
    }

    /// Returns the header fields as a non-empty collection.
    pub fn header_fields(&self) -> Result<HeaderFields, HeaderFieldError> {
        HeaderFields::new(self.headers.clone())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Inserts a header field at the top of the header, where a new
    /// *DKIM-Signature* header goes.
    pub fn prepend_header(&mut self, field: HeaderField) {
        self.headers.insert(0, field);
    }

    /// Serializes the message, with CRLF line endings.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut result = vec![];

        for (name, value) in &self.headers {
            result.extend(name.as_ref().bytes());
            result.push(b':');
            result.extend(value.as_ref());
            result.extend(b"\r\n");
        }

        result.extend(b"\r\n");
        result.extend(&self.body);

        result
    }
}
