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
    header::FieldName,
    signature::{Canonicalization, DkimSignature, DomainName, Identity, Selector, SignatureAlgorithm},
    signer::OutputFormat,
    util::{self, CanonicalStr},
};
use std::iter;

// Note: Careful with offsets: formatting works with *characters*, not bytes!

/// DKIM signature data that does not yet have a cryptographic signature.
pub struct UnsignedDkimSignature {
    pub algorithm: SignatureAlgorithm,
    pub body_hash: Box<[u8]>,
    pub canonicalization: Canonicalization,
    pub domain: DomainName,
    pub signed_headers: Box<[FieldName]>,
    pub identity: Option<Identity>,
    pub body_length: Option<u64>,
    pub selector: Selector,
    pub timestamp: Option<u64>,
    pub expiration: Option<u64>,
}

impl UnsignedDkimSignature {
    /// Returns the formatted signature without the *b=* tag value, and the
    /// index where the *b=* tag value is to be inserted.
    pub fn format_without_signature(
        &self,
        format: &OutputFormat,
        b_tag_len: usize,
    ) -> (String, usize) {
        format_without_signature(self, format, b_tag_len)
    }

    pub fn into_signature(self, signature_data: Box<[u8]>) -> DkimSignature {
        DkimSignature {
            algorithm: self.algorithm,
            signature_data,
            body_hash: self.body_hash,
            canonicalization: self.canonicalization,
            domain: self.domain,
            signed_headers: self.signed_headers,
            identity: self.identity,
            body_length: self.body_length,
            selector: self.selector,
            timestamp: self.timestamp,
            expiration: self.expiration,
        }
    }
}

// Ephemeral context holding current formatting options.
#[derive(Clone, Copy)]
struct Fmt<'a> {
    width: usize,
    indent: &'a str,
    last: bool,
}

// Tags are always emitted in the order v, a, d, s, c, h, [i], [l], [t], [x],
// bh, b. The c= tag is written out even for simple/simple.
fn format_without_signature(
    sig: &UnsignedDkimSignature,
    format: &OutputFormat,
    b_tag_len: usize,
) -> (String, usize) {
    let fmt = Fmt {
        width: format.line_width,
        indent: &format.indentation,
        last: false,
    };

    // The starting point of cursor `i` is just past header name + ':'.
    let mut output = String::new();
    let mut i = format.header_name.len() + 1;

    let out = &mut output;
    let i = &mut i;

    format_tag(out, i, fmt, "v", "1");
    format_tag(out, i, fmt, "a", sig.algorithm.canonical_str());
    format_tag(out, i, fmt, "d", sig.domain.as_ref());
    format_tag(out, i, fmt, "s", sig.selector.as_ref());
    format_tag(out, i, fmt, "c", sig.canonicalization.canonical_str());
    format_tag_h(out, i, fmt, &sig.signed_headers);

    if let Some(identity) = &sig.identity {
        format_tag_i(out, i, fmt, identity);
    }
    if let Some(body_length) = sig.body_length {
        format_tag(out, i, fmt, "l", &body_length.to_string());
    }
    if let Some(timestamp) = sig.timestamp {
        format_tag(out, i, fmt, "t", &timestamp.to_string());
    }
    if let Some(expiration) = sig.expiration {
        format_tag(out, i, fmt, "x", &expiration.to_string());
    }

    format_tag_bh(out, i, fmt, &sig.body_hash);

    let insertion_i = format_tag_name_b(out, i, Fmt { last: true, ..fmt }, b_tag_len);

    (output, insertion_i)
}

// Note: Throughout, `out` is the final formatted output. `i` is the ‘cursor’ in
// the current line, based on *characters*, not bytes!

fn format_tag_i(out: &mut String, i: &mut usize, fmt: Fmt<'_>, identity: &Identity) {
    let Identity { local_part, domain_part } = identity;

    let identity = match local_part {
        Some(l) => format!("{l}@{domain_part}"),
        None => format!("@{domain_part}"),
    };

    format_tag(out, i, fmt, "i", &identity);
}

fn format_tag(out: &mut String, i: &mut usize, fmt: Fmt<'_>, name: &str, value: &str) {
    debug_assert!(name.is_ascii());

    let Fmt { last, .. } = fmt;

    // name + '=' + val [+ ';']
    let taglen = name.len() + value.chars().count() + if last { 1 } else { 2 };

    advance_i_initial(out, i, taglen, fmt);
    out.push_str(name);
    out.push('=');
    out.push_str(value);

    if !last {
        out.push(';');
    }
}

fn format_tag_h(out: &mut String, i: &mut usize, fmt: Fmt<'_>, value: &[FieldName]) {
    let Fmt { last, .. } = fmt;

    let mut names = value.iter().map(|f| f.as_ref()).peekable();

    let Some(first_name) = names.next() else {
        debug_assert!(false, "empty h= tag");
        return;
    };

    // "h=" + name [+ ';'/':']
    let taglen = first_name.chars().count() + if names.peek().is_none() && last { 2 } else { 3 };

    advance_i_initial(out, i, taglen, fmt);
    out.push_str("h=");
    out.push_str(first_name);
    // the trailing ;/: matching the cursor is written right away below

    while let Some(name) = names.next() {
        out.push(':');

        // name [+ ';'/':']
        let len = name.chars().count() + if names.peek().is_none() && last { 0 } else { 1 };

        advance_i(out, i, len, fmt);
        out.push_str(name);
    }

    if !last {
        out.push(';');
    }
}

fn format_tag_bh(out: &mut String, i: &mut usize, fmt: Fmt<'_>, value: &[u8]) {
    let Fmt { last, .. } = fmt;

    let value = util::encode_base64(value);

    // "bh=" + 1 char (we prefer at least one additional char behind =)
    let taglen = 4;

    advance_i_initial(out, i, taglen, fmt);
    *i -= 1;  // backwards again before the ghost character
    out.push_str("bh=");

    format_chunks_into_string(out, i, fmt, &value);

    // if final chunk makes line *width* chars long, the final ; will be
    // appended nevertheless (giving a width of *width + 1*; this is fine)
    if !last {
        out.push(';');
        *i += 1;
    }
}

/// Formats the *b=* tag name and returns the index where the tag value is to
/// be inserted.
fn format_tag_name_b(out: &mut String, i: &mut usize, fmt: Fmt<'_>, b_tag_len: usize) -> usize {
    let Fmt { width, indent, last } = fmt;

    // "b=" + 1 char
    let taglen = 3;
    advance_i_initial(out, i, taglen, fmt);
    *i -= 1;
    out.push_str("b=");

    let insertion_i = out.len();

    // Where in the line are we now given the estimated b= tag value length?
    let chunk_len = width.saturating_sub(indent.len()).max(1);
    let remaining_len = width.saturating_sub(*i);
    if b_tag_len <= remaining_len {
        *i += b_tag_len;
    } else {
        let mut final_chunk_len = (b_tag_len - remaining_len) % chunk_len;
        if final_chunk_len == 0 {
            final_chunk_len = chunk_len;
        }
        *i = final_chunk_len + indent.len();
    }

    if !last {
        out.push(';');
        *i += 1;
    }

    insertion_i
}

fn break_line(out: &mut String, indent: &str) {
    out.push_str("\r\n");
    out.push_str(indent);
}

/// Advances the cursor `i`, making space for an item of length `len`, inserting
/// line break and indentation if necessary.
fn advance_i(out: &mut String, i: &mut usize, len: usize, fmt: Fmt<'_>) {
    let Fmt { width, indent, .. } = fmt;

    if *i + len <= width {
        *i += len;
    } else {
        break_line(out, indent);
        *i = indent.len() + len;
    }
}

fn advance_i_initial(out: &mut String, i: &mut usize, len: usize, fmt: Fmt<'_>) {
    let Fmt { width, indent, .. } = fmt;

    // + 1 for initial SP
    if *i + len + 1 <= width {
        out.push(' ');
        *i += len + 1;
    } else {
        break_line(out, indent);
        *i = indent.len() + len;
    }
}

fn format_chunks_into_string(out: &mut String, i: &mut usize, fmt: Fmt<'_>, mut s: &str) {
    let Fmt { width, indent, .. } = fmt;

    let first_chunk_len = width.saturating_sub(*i);
    let first_chunk_len = first_chunk_len.min(s.chars().count());

    if first_chunk_len > 0 {
        let c = match s.char_indices().nth(first_chunk_len) {
            Some((c, _)) => c,
            None => s.len(),
        };
        let first_chunk;
        (first_chunk, s) = s.split_at(c);
        out.push_str(first_chunk);
        *i += first_chunk.chars().count();
    }

    let chunk_width = width.saturating_sub(indent.len()).max(1);  // no empty chunks
    let chunks = iter::from_fn(|| {
        if s.is_empty() {
            None
        } else {
            let chunk;
            let c = match s.char_indices().nth(chunk_width) {
                Some((c, _)) => c,
                None => s.len(),
            };
            (chunk, s) = s.split_at(c);
            Some(chunk)
        }
    });

    for chunk in chunks {
        break_line(out, indent);
        out.push_str(chunk);
        *i = chunk.chars().count() + indent.len();
    }
}

/// Inserts the Base64-encoded signature data at the insertion index, breaking
/// it into lines as necessary.
pub fn insert_signature_data(
    formatted_header: &mut String,
    insertion_index: usize,
    header_name: &str,
    signature_data: &[u8],
    line_width: usize,
    indent: &str,
) {
    debug_assert!(insertion_index <= formatted_header.len());

    let fmt = Fmt { width: line_width, indent, last: true };

    let s = util::encode_base64(signature_data);

    let formatted_header_pre = &formatted_header[..insertion_index];

    let mut it = formatted_header_pre.rsplit("\r\n");
    let last_line = it.next().unwrap_or_default();
    let mut len = if it.next().is_some() {
        last_line.chars().count()
    } else {
        header_name.len() + last_line.chars().count() + 1
    };

    let mut result = String::with_capacity(s.len());
    format_chunks_into_string(&mut result, &mut len, fmt, &s);

    formatted_header.insert_str(insertion_index, &result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::CanonicalizationAlgorithm;

    #[test]
    fn format_tag_h_ok() {
        let mut out = String::new();
        let mut i = 0;
        let fmt = Fmt { width: 10, indent: "  ", last: false };
        let value = [FieldName::new("Ribbit").unwrap()];

        format_tag_h(&mut out, &mut i, fmt, &value);

        assert_eq!(out, " h=Ribbit;");
        assert_eq!(i, 10);
    }

    #[test]
    fn format_tag_h_wrapped() {
        let mut out = String::new();
        let mut i = 0;
        let fmt = Fmt { width: 12, indent: "\t", last: false };
        let value = [
            FieldName::new("From").unwrap(),
            FieldName::new("To").unwrap(),
            FieldName::new("Subject").unwrap(),
        ];

        format_tag_h(&mut out, &mut i, fmt, &value);

        assert_eq!(out, " h=From:To:\r\n\tSubject;");
        assert_eq!(i, 9);
    }

    #[test]
    fn format_without_signature_tag_order() {
        use CanonicalizationAlgorithm::*;

        let sig = UnsignedDkimSignature {
            algorithm: SignatureAlgorithm::RsaSha256,
            body_hash: Box::from(*b"\x01\x02\x03"),
            canonicalization: (Relaxed, Simple).into(),
            domain: DomainName::new("example.com").unwrap(),
            signed_headers: [FieldName::new("From").unwrap(), FieldName::new("To").unwrap()].into(),
            identity: Some(Identity::new("me@mail.example.com").unwrap()),
            body_length: Some(12),
            selector: Selector::new("sel1").unwrap(),
            timestamp: Some(100),
            expiration: Some(200),
        };

        let format = OutputFormat {
            line_width: 1000,
            ..Default::default()
        };

        let (header, insertion_i) = sig.format_without_signature(&format, 344);

        assert_eq!(
            header,
            " v=1; a=rsa-sha256; d=example.com; s=sel1; c=relaxed/simple; h=From:To; \
            i=me@mail.example.com; l=12; t=100; x=200; bh=AQID; b="
        );
        assert_eq!(insertion_i, header.len());
    }

    #[test]
    fn insert_signature_data_ok() {
        let mut header = String::from(" a=1; b=");

        insert_signature_data(&mut header, 8, "Hdr", &[0xff; 12], 20, "  ");

        // "Hdr:" plus " a=1; b=" leaves 8 characters on the first line
        assert_eq!(header, " a=1; b=////////\r\n  ////////");
    }
}
