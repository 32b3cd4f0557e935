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

//! A standalone engine for *DomainKeys Identified Mail* (DKIM) signing and
//! verification as described in [RFC 6376].
//!
//! The engine processes one message per session. A session is obtained from
//! an [`Engine`], which holds the configuration shared by all sessions. The
//! message header is fed field by field, then the body in chunks of any size,
//! and finally the end of the message yields either a formatted
//! `DKIM-Signature` header field or a verification report.
//!
//! Every failure maps to a numeric [`Status`] code. The convenience methods
//! [`Engine::sign`] and [`Engine::verify`] run a complete session over a
//! [`Message`] held in memory.
//!
//! Public keys are obtained through the [`KeyResolver`] trait. The adapter
//! [`TxtKeyResolver`] turns any DNS TXT lookup implementation ([`LookupTxt`])
//! into a resolver.
//!
//! The lower-level building blocks for canonicalisation, hashing, cryptography
//! and record parsing are available in the various modules.
//!
//! Only the `rsa-sha256` and `ed25519-sha256` algorithms are supported, SHA-1
//! is rejected as required by [RFC 8301].
//!
//! [RFC 6376]: https://www.rfc-editor.org/rfc/rfc6376
//! [RFC 8301]: https://www.rfc-editor.org/rfc/rfc8301

pub mod canonicalize;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod header;
pub mod message;
pub mod message_hash;
mod parse;
pub mod record;
pub mod session;
pub mod signature;
pub mod signer;
pub mod status;
mod tag_list;
mod util;
pub mod verifier;

pub use crate::{
    crypto::SigningKey,
    engine::{Engine, EngineConfig},
    error::Error,
    header::{FieldBody, FieldName, HeaderField, HeaderFields},
    message::Message,
    session::{SessionState, SigningSession, VerifyingSession},
    signature::{DomainName, Selector, SignatureAlgorithm},
    signer::{SignRequest, Signer, SignerError, SigningResult},
    status::Status,
    util::{decode_base64, encode_base64, Base64Error, CanonicalStr},
    verifier::{
        KeyResolver, LookupTxt, TxtKeyResolver, VerificationReport, VerificationResult,
        VerificationStatus, Verifier, VerifierError,
    },
};
