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

//! Parsing of RFC 6376 tag=value lists.

use crate::parse::{strip_fws, strip_suffix};
use base64ct::{Base64, Encoding};
use std::{
    collections::HashSet,
    error::Error,
    fmt::{self, Display, Formatter},
};

/// Splits a colon-separated tag value such as the *h=* value into its
/// elements, with surrounding folding whitespace removed.
pub fn parse_colon_separated_tag_value(value: &str) -> Vec<&str> {
    // assume input is a valid tag-list value
    debug_assert!(is_tag_value(value));

    value
        .split(':')
        .map(|s| s.trim_matches(|c| matches!(c, ' ' | '\t' | '\r' | '\n')))
        .collect()
}

/// Decodes a Base64 tag value, which may contain folding whitespace.
pub fn parse_base64_tag_value(value: &str) -> Result<Vec<u8>, TagListParseError> {
    debug_assert!(is_tag_value(value));

    let value = strip_fws_from_tag_value(value);
    Base64::decode_vec(&value).map_err(|_| TagListParseError::Syntax)
}

fn is_tag_value(s: &str) -> bool {
    s.is_empty() || matches!(parse_tag_value(s), Some((rest, _)) if rest.is_empty())
}

/// Removes all folding whitespace from a tag value.
pub fn strip_fws_from_tag_value(value: &str) -> String {
    // assume only well-formed FWS
    value
        .chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '\r' | '\n'))
        .collect()
}

#[derive(Debug, PartialEq, Eq)]
pub struct TagSpec<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagListParseError {
    DuplicateTag,
    Syntax,
}

impl Display for TagListParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateTag => write!(f, "duplicate tag"),
            Self::Syntax => write!(f, "ill-formed tag-list"),
        }
    }
}

impl Error for TagListParseError {}

/// A list of tag specs, without duplicate tag names.
#[derive(Debug, PartialEq, Eq)]
pub struct TagList<'a>(Vec<TagSpec<'a>>);

impl<'a> AsRef<[TagSpec<'a>]> for TagList<'a> {
    fn as_ref(&self) -> &[TagSpec<'a>] {
        &self.0
    }
}

impl<'a> TagList<'a> {
    pub fn from_str(val: &'a str) -> Result<Self, TagListParseError> {
        match parse_tag_list_internal(val) {
            Some((rest, tag_list)) if rest.is_empty() => {
                let mut names_seen = HashSet::new();
                if tag_list.iter().any(|tag| !names_seen.insert(tag.name)) {
                    return Err(TagListParseError::DuplicateTag);
                }
                Ok(TagList(tag_list))
            }
            _ => Err(TagListParseError::Syntax),
        }
    }

    /// Returns the value of the tag with the given name.
    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.0.iter().find(|spec| spec.name == name).map(|spec| spec.value)
    }
}

fn parse_tag_list_internal(val: &str) -> Option<(&str, Vec<TagSpec<'_>>)> {
    let (mut s, t) = parse_tag_spec(val)?;

    let mut tags = vec![t];

    while let Some((snext, t)) = s.strip_prefix(';').and_then(parse_tag_spec) {
        s = snext;
        tags.push(t);
    }

    let s = s.strip_prefix(';').unwrap_or(s);

    // a trailing semicolon may be followed by whitespace
    let s = strip_fws(s).unwrap_or(s);

    Some((s, tags))
}

fn parse_tag_spec(val: &str) -> Option<(&str, TagSpec<'_>)> {
    let (s, name) = strip_tag_name_and_equals(val)?;

    let s = strip_fws(s).unwrap_or(s);

    let (s, value) = match parse_tag_value(s) {
        Some((s, value)) => {
            let s = strip_fws(s).unwrap_or(s);
            (s, value)
        }
        None => (s, Default::default()),
    };

    Some((s, TagSpec { name, value }))
}

/// Strips a tag name and the following equals sign, with folding whitespace
/// before the equals sign, and returns the remainder and the tag name.
///
/// Whitespace after the equals sign is left in the remainder, it belongs to
/// the tag value.
pub fn strip_tag_name_and_equals(val: &str) -> Option<(&str, &str)> {
    let s = strip_fws(val).unwrap_or(val);

    let (s, name) = parse_tag_name(s)?;

    let s = strip_fws(s).unwrap_or(s);

    let s = s.strip_prefix('=')?;

    Some((s, name))
}

fn parse_tag_name(value: &str) -> Option<(&str, &str)> {
    let s = value
        .strip_prefix(is_alpha)?
        .trim_start_matches(is_alphanum);
    Some((s, strip_suffix(value, s)))
}

// Note erratum 5070 in ABNF
fn parse_tag_value(value: &str) -> Option<(&str, &str)> {
    fn strip_tval(s: &str) -> Option<&str> {
        s.strip_prefix(is_tval_char)
            .map(|s| s.trim_start_matches(is_tval_char))
    }

    let mut s = strip_tval(value)?;

    while let Some(snext) = strip_fws(s).and_then(strip_tval) {
        s = snext;
    }

    Some((s, strip_suffix(value, s)))
}

fn is_alpha(c: char) -> bool {
    c.is_ascii_alphabetic()
}

fn is_alphanum(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub fn is_tval_char(c: char) -> bool {
    // printable ASCII w/o ; or non-ASCII UTF-8
    matches!(c, '!'..=':' | '<'..='~') || !c.is_ascii()
}
