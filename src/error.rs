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

//! Crate-level error type.

use crate::{
    engine::ConfigError,
    header::HeaderFieldError,
    message_hash::BodyHashError,
    session::{Operation, SessionState},
    signer::SignerError,
    status::Status,
};
use std::{
    error,
    fmt::{self, Display, Formatter},
};

/// An error that occurs when using the engine or a session.
///
/// Every error is terminal for the session in which it occurs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// Signing failed.
    Signer(SignerError),
    /// A header line could not be parsed.
    HeaderSyntax(HeaderFieldError),
    /// Body hashing failed.
    BodyHash(BodyHashError),
    /// An operation was called in a state that does not allow it.
    IllegalTransition {
        state: SessionState,
        operation: Operation,
    },
    /// The engine configuration is invalid.
    Config(ConfigError),
}

impl Error {
    /// Returns the status code of this error.
    pub fn status(&self) -> Status {
        match self {
            Self::Signer(e) => e.status(),
            Self::HeaderSyntax(_) => Status::SyntaxError,
            Self::BodyHash(_) | Self::IllegalTransition { .. } | Self::Config(_) => {
                Status::InternalError
            }
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signer(e) => e.fmt(f),
            Self::HeaderSyntax(e) => e.fmt(f),
            Self::BodyHash(e) => e.fmt(f),
            Self::IllegalTransition { state, operation } => {
                write!(f, "operation {operation:?} not allowed in session state {state:?}")
            }
            Self::Config(e) => e.fmt(f),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Signer(e) => Some(e),
            Self::HeaderSyntax(e) => Some(e),
            Self::BodyHash(e) => Some(e),
            Self::IllegalTransition { .. } => None,
            Self::Config(e) => Some(e),
        }
    }
}

impl From<SignerError> for Error {
    fn from(error: SignerError) -> Self {
        Self::Signer(error)
    }
}

impl From<HeaderFieldError> for Error {
    fn from(error: HeaderFieldError) -> Self {
        Self::HeaderSyntax(error)
    }
}

impl From<BodyHashError> for Error {
    fn from(error: BodyHashError) -> Self {
        Self::BodyHash(error)
    }
}

impl From<ConfigError> for Error {
    fn from(error: ConfigError) -> Self {
        Self::Config(error)
    }
}
