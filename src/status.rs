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

//! Status codes.

use std::fmt::{self, Display, Formatter};

/// The outcome status of an engine operation.
///
/// The numeric codes are stable and match the status codes of the classic C
/// DKIM library API, so that they can be passed across a foreign interface.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Status {
    /// Success.
    Ok,
    /// The signature did not verify.
    BadSignature,
    /// No signature was present.
    NoSignature,
    /// The public key was not found.
    KeyNotFound,
    /// The signature could not be verified, for example due to an unusable key.
    CantVerify,
    /// Input could not be parsed.
    SyntaxError,
    /// A resource was not available.
    ResourceUnavailable,
    /// An internal error occurred, or operations were called out of order.
    InternalError,
    /// The public key has been revoked.
    KeyRevoked,
    /// An invalid parameter was passed.
    InvalidParameter,
    /// The requested feature is not implemented.
    NotImplemented,
    /// The key could not be retrieved or loaded.
    KeyRetrievalFailed,
    /// A temporary failure occurred, the operation may be retried later.
    TemporaryFailure,
    /// More than one key record was found.
    MultipleDnsReply,
    /// The signature could not be generated.
    SignatureGenerationFailed,
}

impl Status {
    /// Returns the numeric code of this status.
    pub fn code(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::BadSignature => 1,
            Self::NoSignature => 2,
            Self::KeyNotFound => 3,
            Self::CantVerify => 4,
            Self::SyntaxError => 5,
            Self::ResourceUnavailable => 6,
            Self::InternalError => 7,
            Self::KeyRevoked => 8,
            Self::InvalidParameter => 9,
            Self::NotImplemented => 10,
            Self::KeyRetrievalFailed => 11,
            Self::TemporaryFailure => 14,
            Self::MultipleDnsReply => 16,
            Self::SignatureGenerationFailed => 17,
        }
    }

    /// Returns the status for the given numeric code, if there is one.
    pub fn from_code(code: u32) -> Option<Self> {
        let status = match code {
            0 => Self::Ok,
            1 => Self::BadSignature,
            2 => Self::NoSignature,
            3 => Self::KeyNotFound,
            4 => Self::CantVerify,
            5 => Self::SyntaxError,
            6 => Self::ResourceUnavailable,
            7 => Self::InternalError,
            8 => Self::KeyRevoked,
            9 => Self::InvalidParameter,
            10 => Self::NotImplemented,
            11 => Self::KeyRetrievalFailed,
            14 => Self::TemporaryFailure,
            16 => Self::MultipleDnsReply,
            17 => Self::SignatureGenerationFailed,
            _ => return None,
        };
        Some(status)
    }

    /// Returns true if this is the success status.
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// Returns true if the failure is temporary and the caller may retry.
    pub fn is_temporary(self) -> bool {
        self == Self::TemporaryFailure
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::BadSignature => "bad signature",
            Self::NoSignature => "no signature",
            Self::KeyNotFound => "key not found",
            Self::CantVerify => "cannot verify",
            Self::SyntaxError => "syntax error",
            Self::ResourceUnavailable => "resource unavailable",
            Self::InternalError => "internal error",
            Self::KeyRevoked => "key revoked",
            Self::InvalidParameter => "invalid parameter",
            Self::NotImplemented => "not implemented",
            Self::KeyRetrievalFailed => "key retrieval failed",
            Self::TemporaryFailure => "temporary failure",
            Self::MultipleDnsReply => "multiple DNS replies",
            Self::SignatureGenerationFailed => "signature generation failed",
        };
        f.write_str(s)
    }
}
