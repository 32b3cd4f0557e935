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

//! Canonicalization of header and body data.
//!
//! Body canonicalization is streaming: the body may be fed in chunks of any
//! size, and the output is the same regardless of where the chunk boundaries
//! fall. CRLF is the line terminator; a bare LF is treated as if it were
//! preceded by CR, a stray CR is treated like any other byte.

use crate::{
    header::{FieldName, HeaderFields},
    signature::CanonicalizationAlgorithm,
};
use bstr::ByteSlice;
use std::collections::HashSet;

const SP: u8 = b' ';
const CR: u8 = b'\r';
const LF: u8 = b'\n';
const CRLF: [u8; 2] = [CR, LF];

fn is_wsp(b: u8) -> bool {
    matches!(b, b'\t' | b' ')
}

// what did we see last?
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum CanonState {
    Init,
    CrLf,
    Cr,
    Wsp,
    WspCr,
    Byte,
}

/// A streaming canonicalizer for the message body.
#[derive(Clone, Debug)]
pub struct BodyCanonicalizer {
    kind: CanonicalizationAlgorithm,
    state: CanonState,
    blank_line: bool,    // currently on an empty or blank line
    empty_lines: usize,  // empty lines withheld so far
    content_seen: bool,  // any non-empty line started
}

impl BodyCanonicalizer {
    /// Creates a body canonicalizer for the given algorithm.
    pub fn new(kind: CanonicalizationAlgorithm) -> Self {
        Self {
            kind,
            state: CanonState::Init,
            blank_line: true,
            empty_lines: 0,
            content_seen: false,
        }
    }

    pub fn simple() -> Self {
        Self::new(CanonicalizationAlgorithm::Simple)
    }

    pub fn relaxed() -> Self {
        Self::new(CanonicalizationAlgorithm::Relaxed)
    }

    /// Canonicalizes a chunk of body content and returns the output that can
    /// already be committed. Trailing empty lines are withheld until it is
    /// known whether more content follows.
    pub fn canonicalize_chunk(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut result = Vec::with_capacity(bytes.len());

        for &b in bytes {
            if b == LF && !matches!(self.state, CanonState::Cr | CanonState::WspCr) {
                self.step(&mut result, CR);
            }
            self.step(&mut result, b);
        }

        result
    }

    fn step(&mut self, result: &mut Vec<u8>, b: u8) {
        match self.kind {
            CanonicalizationAlgorithm::Simple => self.step_simple(result, b),
            CanonicalizationAlgorithm::Relaxed => self.step_relaxed(result, b),
        }
    }

    fn step_simple(&mut self, result: &mut Vec<u8>, b: u8) {
        match self.state {
            CanonState::Init | CanonState::CrLf => {
                if b == CR {
                    self.state = CanonState::Cr;
                } else {
                    self.flush_empty_lines(result);
                    result.push(b);
                    self.state = CanonState::Byte;
                }
            }
            CanonState::Cr => {
                if b == LF {
                    self.end_line(result);
                    return;
                }

                self.flush_empty_lines(result);
                result.push(CR);

                if b != CR {
                    result.push(b);
                    self.state = CanonState::Byte;
                }
            }
            CanonState::Byte => {
                if b == CR {
                    self.state = CanonState::Cr;
                } else {
                    result.push(b);
                }
            }
            CanonState::Wsp | CanonState::WspCr => {
                debug_assert!(false, "whitespace state in simple canonicalization");
            }
        }
    }

    fn step_relaxed(&mut self, result: &mut Vec<u8>, b: u8) {
        match self.state {
            CanonState::Init | CanonState::CrLf => {
                if is_wsp(b) {
                    self.state = CanonState::Wsp;
                } else if b == CR {
                    self.state = CanonState::Cr;
                } else {
                    self.flush_empty_lines(result);
                    result.push(b);
                    self.state = CanonState::Byte;
                }
            }
            CanonState::Wsp => {
                if b == CR {
                    self.state = CanonState::WspCr;
                } else if !is_wsp(b) {
                    self.flush_empty_lines(result);
                    result.push(SP);
                    result.push(b);
                    self.state = CanonState::Byte;
                }
            }
            CanonState::Cr => {
                if b == LF {
                    self.end_line(result);
                    return;
                }

                self.flush_empty_lines(result);
                result.push(CR);

                if is_wsp(b) {
                    self.state = CanonState::Wsp;
                } else if b != CR {
                    result.push(b);
                    self.state = CanonState::Byte;
                }
            }
            CanonState::WspCr => {
                if b == LF {
                    self.end_line(result);
                    return;
                }

                self.flush_empty_lines(result);
                result.push(SP);
                result.push(CR);

                if b == CR {
                    self.state = CanonState::Cr;
                } else if is_wsp(b) {
                    self.state = CanonState::Wsp;
                } else {
                    result.push(b);
                    self.state = CanonState::Byte;
                }
            }
            CanonState::Byte => {
                if is_wsp(b) {
                    self.state = CanonState::Wsp;
                } else if b == CR {
                    self.state = CanonState::Cr;
                } else {
                    result.push(b);
                }
            }
        }
    }

    fn end_line(&mut self, result: &mut Vec<u8>) {
        if self.blank_line {
            self.empty_lines += 1;
        } else {
            result.extend(CRLF);
            self.blank_line = true;
        }
        self.state = CanonState::CrLf;
    }

    /// Finishes canonicalization and returns the final piece of output.
    pub fn finish(mut self) -> Vec<u8> {
        let mut result = vec![];

        match self.kind {
            CanonicalizationAlgorithm::Simple => match self.state {
                // empty body is CRLF
                CanonState::Init => result.extend(CRLF),
                CanonState::CrLf => {
                    if !self.content_seen {
                        result.extend(CRLF);
                    }
                }
                CanonState::Cr => {
                    self.flush_empty_lines(&mut result);
                    result.push(CR);
                    result.extend(CRLF);
                }
                CanonState::Byte => result.extend(CRLF),
                CanonState::Wsp | CanonState::WspCr => {
                    debug_assert!(false, "whitespace state in simple canonicalization");
                }
            },
            CanonicalizationAlgorithm::Relaxed => match self.state {
                CanonState::Init | CanonState::CrLf => {}
                CanonState::Cr => {
                    self.flush_empty_lines(&mut result);
                    result.push(CR);
                    result.extend(CRLF);
                }
                // trailing whitespace on the last line is dropped
                CanonState::Wsp => {
                    if !self.blank_line {
                        result.extend(CRLF);
                    }
                }
                CanonState::WspCr => {
                    self.flush_empty_lines(&mut result);
                    result.push(SP);
                    result.push(CR);
                    result.extend(CRLF);
                }
                CanonState::Byte => result.extend(CRLF),
            },
        }

        result
    }

    // write out withheld empty lines once content follows them
    fn flush_empty_lines(&mut self, result: &mut Vec<u8>) {
        for _ in 0..self.empty_lines {
            result.extend(CRLF);
        }
        self.empty_lines = 0;
        self.blank_line = false;
        self.content_seen = true;
    }
}

/// Canonicalizes a complete message body in one go.
pub fn canonicalize_body(algorithm: CanonicalizationAlgorithm, body: &[u8]) -> Vec<u8> {
    let mut canonicalizer = BodyCanonicalizer::new(algorithm);
    let mut result = canonicalizer.canonicalize_chunk(body);
    result.extend(canonicalizer.finish());
    result
}

/// Produces the header canonicalization result for the selected header fields.
///
/// Selected names are processed in order. Each occurrence of a name picks the
/// bottom-most instance of that field not yet used; a name with no instance
/// left contributes nothing.
pub fn canonicalize_headers(
    algorithm: CanonicalizationAlgorithm,
    headers: &HeaderFields,
    selected_headers: &[FieldName],
) -> Vec<u8> {
    let mut result = vec![];
    let mut used = HashSet::with_capacity(selected_headers.len());

    for selected in selected_headers {
        let next = headers
            .as_ref()
            .iter()
            .enumerate()
            .rev()
            .find(|(i, (name, _))| name == selected && !used.contains(i));

        if let Some((i, (name, value))) = next {
            canonicalize_header(&mut result, algorithm, name, value);
            result.extend(CRLF);
            used.insert(i);
        }
    }

    result
}

/// Canonicalizes a header field into the result vector, without a final CRLF.
pub fn canonicalize_header(
    result: &mut Vec<u8>,
    algorithm: CanonicalizationAlgorithm,
    name: impl AsRef<str>,
    value: impl AsRef<[u8]>,
) {
    let name = name.as_ref();
    let value = value.as_ref();

    match algorithm {
        CanonicalizationAlgorithm::Simple => {
            result.extend(name.bytes());
            result.push(b':');
            result.extend(value);
        }
        CanonicalizationAlgorithm::Relaxed => {
            result.extend(name.to_ascii_lowercase().bytes());
            result.push(b':');
            canonicalize_header_value_relaxed(result, value);
        }
    }
}

fn canonicalize_header_value_relaxed(result: &mut Vec<u8>, value: &[u8]) {
    fn is_space(c: char) -> bool {
        matches!(c, ' ' | '\t' | '\r' | '\n')
    }

    let value = value.trim_with(is_space);

    let mut compressing = false;
    for &b in value {
        if is_space(b.into()) {
            if !compressing {
                result.push(SP);
                compressing = true;
            }
        } else {
            result.push(b);
            compressing = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bstr::BStr;

    #[test]
    fn canonicalize_headers_relaxed_ok() {
        let headers = HeaderFields::from_vec(vec![
            ("from".to_owned(), b" Good \t ".to_vec()),
            ("to".to_owned(), b" see   me".to_vec()),
            ("Date".to_owned(), b" Fri 24\r\n\tfoo".to_vec()),
            ("To".to_owned(), b" another one".to_vec()),
        ])
        .unwrap();

        let selected_headers = [
            FieldName::new("to").unwrap(),
            FieldName::new("from").unwrap(),
            FieldName::new("to").unwrap(),
            FieldName::new("to").unwrap(),
            FieldName::new("date").unwrap(),
        ];

        assert_eq!(
            BStr::new(&canonicalize_headers(
                CanonicalizationAlgorithm::Relaxed,
                &headers,
                &selected_headers,
            )),
            BStr::new(&b"to:another one\r\nfrom:Good\r\nto:see me\r\ndate:Fri 24 foo\r\n"[..]),
        );
    }

    #[test]
    fn canonicalize_headers_simple_ok() {
        let headers = HeaderFields::from_vec(vec![
            ("From".to_owned(), b" Good \t ".to_vec()),
            ("Subject".to_owned(), b" a\r\n\tb".to_vec()),
        ])
        .unwrap();

        let selected_headers = [FieldName::new("subject").unwrap(), FieldName::new("from").unwrap()];

        assert_eq!(
            BStr::new(&canonicalize_headers(
                CanonicalizationAlgorithm::Simple,
                &headers,
                &selected_headers,
            )),
            BStr::new(&b"Subject: a\r\n\tb\r\nFrom: Good \t \r\n"[..]),
        );
    }

    #[test]
    fn body_canon_simple_ok() {
        let body = canonicalize_chunks(
            BodyCanonicalizer::simple(),
            &[b"well  hello \r\n", b"\r\n what agi \r\n\r\n", b"\r\n"],
        );

        assert_eq!(BStr::new(&body), BStr::new(b"well  hello \r\n\r\n what agi \r\n"));
    }

    #[test]
    fn body_canon_simple_empty() {
        assert_eq!(canonicalize_body(CanonicalizationAlgorithm::Simple, b""), b"\r\n");
        assert_eq!(canonicalize_body(CanonicalizationAlgorithm::Simple, b"\r\n\r\n"), b"\r\n");
        assert_eq!(canonicalize_body(CanonicalizationAlgorithm::Relaxed, b""), b"");
        assert_eq!(canonicalize_body(CanonicalizationAlgorithm::Relaxed, b"\r\n \r\n"), b"");
    }

    #[test]
    fn body_canon_relaxed_basic() {
        let body = canonicalize_chunks(
            BodyCanonicalizer::relaxed(),
            &[b"well  hello \r\n", b"\r\n what agi \r\n\r\n", b"\r\n"],
        );

        assert_eq!(BStr::new(&body), BStr::new(b"well hello\r\n\r\n what agi\r\n"));
    }

    #[test]
    fn body_canon_relaxed_small_chunks() {
        let body = canonicalize_chunks(
            BodyCanonicalizer::relaxed(),
            &[b"well ", b" hello ", b"\r", b"\n\r", b"\n what agi \r\n\r\n", b"\r\n"],
        );

        assert_eq!(BStr::new(&body), BStr::new(b"well hello\r\n\r\n what agi\r\n"));
    }

    #[test]
    fn body_canon_relaxed_initial_empty_lines() {
        let body = canonicalize_chunks(
            BodyCanonicalizer::relaxed(),
            &[b"\r\n\r\n", b"\ra \r", b"\nb  ", b"c"],
        );

        assert_eq!(BStr::new(&body), BStr::new(b"\r\n\r\n\ra\r\nb c\r\n"));
    }

    #[test]
    fn body_canon_bare_lf() {
        assert_eq!(
            canonicalize_body(CanonicalizationAlgorithm::Simple, b"a\nb\r\n\n\n"),
            b"a\r\nb\r\n"
        );
        assert_eq!(
            canonicalize_body(CanonicalizationAlgorithm::Relaxed, b"a \t\nb  \n"),
            b"a\r\nb\r\n"
        );

        // bare LF split from its line across a chunk boundary
        let body = canonicalize_chunks(BodyCanonicalizer::relaxed(), &[b"x \r", b"\n", b"\ny"]);
        assert_eq!(BStr::new(&body), BStr::new(b"x\r\n\r\ny\r\n"));
    }

    #[test]
    fn body_canon_relaxed_idempotent() {
        let bodies: [&[u8]; 5] = [
            b"",
            b"  \t \r\n",
            b"Hello  \t world \r\n\r\n\tindented\tline\t\r\n\r\n\r\n",
            b"no final newline   ",
            b"stray\rcr \r\n \r\nx",
        ];

        for body in bodies {
            let once = canonicalize_body(CanonicalizationAlgorithm::Relaxed, body);
            let twice = canonicalize_body(CanonicalizationAlgorithm::Relaxed, &once);
            assert_eq!(BStr::new(&once), BStr::new(&twice));
        }
    }

    #[test]
    fn body_canon_chunking_independent() {
        let body = b"a  b\t \r\n\r\n  \r\nc \r d\n\ne\r\n\r\n \r\n";

        for algorithm in [CanonicalizationAlgorithm::Simple, CanonicalizationAlgorithm::Relaxed] {
            let whole = canonicalize_body(algorithm, body);

            for i in 0..=body.len() {
                for j in i..=body.len() {
                    let (first, rest) = body.split_at(i);
                    let (second, third) = rest.split_at(j - i);
                    let chunked = canonicalize_chunks(
                        BodyCanonicalizer::new(algorithm),
                        &[first, second, third],
                    );
                    assert_eq!(BStr::new(&chunked), BStr::new(&whole), "split at {i}, {j}");
                }
            }
        }
    }

    fn canonicalize_chunks(mut bc: BodyCanonicalizer, chunks: &[&[u8]]) -> Vec<u8> {
        let mut result = vec![];
        for c in chunks {
            result.extend(bc.canonicalize_chunk(c));
        }
        result.extend(bc.finish());
        result
    }
}
