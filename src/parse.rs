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

//! Common parsing utilities.

use std::borrow::Cow;

pub fn strip_suffix<'a>(s: &'a str, suffix: &str) -> &'a str {
    debug_assert!(s.ends_with(suffix));
    &s[..(s.len() - suffix.len())]
}

const CRLF: &str = "\r\n";

// FWS = ([*WSP CRLF] 1*WSP)

/// Strips one occurrence of folding whitespace.
pub fn strip_fws(input: &str) -> Option<&str> {
    // Implementation note: We had considered a more eager, ‘look-ahead’
    // approach that refuses to strip `"  \r\nabc..."`. However, this would be
    // inconsistent with the usual idiom, that strip_ simply eats as many valid
    // characters as possible, and if any are possible it is a success.
    if let Some(s) = strip_wsp(input) {
        s.strip_prefix(CRLF).and_then(strip_wsp).or(Some(s))
    } else {
        input.strip_prefix(CRLF).and_then(strip_wsp)
    }
}

// RFC 5234, appendix B.1

fn strip_wsp(input: &str) -> Option<&str> {
    input
        .strip_prefix(is_wsp)
        .map(|s| s.trim_start_matches(is_wsp))
}

pub fn is_wsp(c: char) -> bool {
    matches!(c, ' ' | '\t')
}

/// Converts bare LF line endings to CRLF. Existing CRLF and stray CR are left
/// alone.
pub fn normalize_line_endings(input: &[u8]) -> Cow<'_, [u8]> {
    let has_bare_lf = input
        .iter()
        .enumerate()
        .any(|(i, &b)| b == b'\n' && (i == 0 || input[i - 1] != b'\r'));

    if !has_bare_lf {
        return Cow::Borrowed(input);
    }

    let mut result = Vec::with_capacity(input.len() + 16);
    let mut prev = None;
    for &b in input {
        if b == b'\n' && prev != Some(b'\r') {
            result.push(b'\r');
        }
        result.push(b);
        prev = Some(b);
    }
    Cow::Owned(result)
}

/// Splits a header block into the raw lines of its header fields, joining
/// continuation lines to the field they belong to. The returned slices do not
/// include the terminating line break of each field.
pub fn split_header_fields(input: &[u8]) -> Vec<&[u8]> {
    let mut fields: Vec<&[u8]> = vec![];

    let mut field_start = None;
    let mut pos = 0;

    while pos < input.len() {
        let line_end = input[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(input.len(), |i| pos + i);
        let next = (line_end + 1).min(input.len());

        let is_continuation = matches!(input[pos], b' ' | b'\t');

        if !is_continuation {
            if let Some(start) = field_start.take() {
                fields.push(trim_line_break(&input[start..pos]));
            }
            field_start = Some(pos);
        } else if field_start.is_none() {
            // continuation without a preceding field: keep it as a field of its
            // own, it will be rejected later
            field_start = Some(pos);
        }

        pos = next;
    }

    if let Some(start) = field_start {
        fields.push(trim_line_break(&input[start..]));
    }

    fields
}

fn trim_line_break(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_fws_ok() {
        assert_eq!(strip_fws(""), None);
        assert_eq!(strip_fws("x"), None);
        assert_eq!(strip_fws(" x"), Some("x"));
        assert_eq!(strip_fws("\r\n"), None);
        assert_eq!(strip_fws(" \r\n"), Some("\r\n"));
        assert_eq!(strip_fws(" \r\nx"), Some("\r\nx"));
        assert_eq!(strip_fws(" \r\n "), Some(""));
        assert_eq!(strip_fws(" \r\n x"), Some("x"));
        assert_eq!(strip_fws("\r\nx"), None);
        assert_eq!(strip_fws("\r\n x"), Some("x"));
    }

    #[test]
    fn normalize_line_endings_ok() {
        assert_eq!(normalize_line_endings(b"a\r\nb"), &b"a\r\nb"[..]);
        assert_eq!(normalize_line_endings(b"a\nb\r\n\n"), &b"a\r\nb\r\n\r\n"[..]);
        assert_eq!(normalize_line_endings(b"\na\rb"), &b"\r\na\rb"[..]);
    }

    #[test]
    fn split_header_fields_ok() {
        let fields = split_header_fields(b"From: me\r\nTo: you,\n\tthem\nSubject: hi\r\n");
        assert_eq!(fields, [&b"From: me"[..], b"To: you,\n\tthem", b"Subject: hi"]);

        assert!(split_header_fields(b"").is_empty());
        assert_eq!(split_header_fields(b" stray\r\nA: b"), [&b" stray"[..], b"A: b"]);
    }
}
