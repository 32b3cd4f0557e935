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

//! Per-message sessions and their state machine.

use crate::{
    crypto::SigningKey,
    engine::EngineConfig,
    error::Error,
    header::{self, HeaderField, HeaderFields},
    message_hash::BodyHasherStance,
    signer::{SignRequest, Signer, SignerError, SigningResult},
    verifier::{KeyResolver, VerificationReport, Verifier},
};
use std::{mem, sync::Arc};
use tracing::debug;

/// The state of a session.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SessionState {
    /// No input yet.
    Created,
    /// The given number of header fields have been fed.
    HeadersFed(usize),
    /// The end of the header has been signalled.
    HeadersDone,
    /// Body content has been fed.
    BodyFed,
    /// The end of the message has been signalled and the result returned.
    Complete,
    /// An error occurred; the session cannot be used any further.
    Failed,
}

/// An operation on a session.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operation {
    FeedHeader,
    EndOfHeaders,
    FeedBody,
    EndOfMessage,
}

impl SessionState {
    /// Returns the state following this state after the given operation, or an
    /// error if the operation is not allowed in this state.
    pub fn transition(self, operation: Operation) -> Result<Self, Error> {
        use Operation::*;
        use SessionState::*;

        match (self, operation) {
            (Created, FeedHeader) => Ok(HeadersFed(1)),
            (HeadersFed(n), FeedHeader) => Ok(HeadersFed(n.saturating_add(1))),
            (Created | HeadersFed(_), EndOfHeaders) => Ok(HeadersDone),
            (HeadersDone | BodyFed, FeedBody) => Ok(BodyFed),
            (HeadersDone | BodyFed, EndOfMessage) => Ok(Complete),
            (state, operation) => Err(Error::IllegalTransition { state, operation }),
        }
    }
}

// Tracks the state; any error moves it to `Failed`.
#[derive(Debug)]
struct Lifecycle {
    state: SessionState,
}

impl Lifecycle {
    fn new() -> Self {
        Self { state: SessionState::Created }
    }

    fn begin(&mut self, operation: Operation) -> Result<SessionState, Error> {
        self.state.transition(operation).map_err(|e| {
            self.fail();
            e
        })
    }

    fn complete<R>(&mut self, next: SessionState, result: Result<R, Error>) -> Result<R, Error> {
        match result {
            Ok(r) => {
                if !matches!(next, SessionState::HeadersFed(_) | SessionState::BodyFed) {
                    debug!(from = ?self.state, to = ?next, "session transition");
                }
                self.state = next;
                Ok(r)
            }
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    fn fail(&mut self) {
        debug!(state = ?self.state, "session failed");
        self.state = SessionState::Failed;
    }
}

/// A session for signing one message.
///
/// Header fields are fed first, then the end of the header is signalled, then
/// the body is fed, and finally the end of the message produces the signature.
pub struct SigningSession<T> {
    lifecycle: Lifecycle,
    config: Arc<EngineConfig>,
    request: Option<SignRequest<T>>,
    headers: Vec<HeaderField>,
    signer: Option<Signer<T>>,
}

impl<T> SigningSession<T>
where
    T: AsRef<SigningKey>,
{
    pub(crate) fn new(config: Arc<EngineConfig>, request: SignRequest<T>) -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            config,
            request: Some(request),
            headers: vec![],
            signer: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state
    }

    /// Feeds a raw header line of the form `Name: value`, which may be folded
    /// and may carry a terminating line break.
    pub fn feed_header(&mut self, line: &[u8]) -> Result<(), Error> {
        let next = self.lifecycle.begin(Operation::FeedHeader)?;
        let result = header::parse_header_field(line)
            .map(|field| self.headers.push(field))
            .map_err(Error::from);
        self.lifecycle.complete(next, result)
    }

    /// Feeds a parsed header field.
    pub fn feed_header_field(&mut self, field: HeaderField) -> Result<(), Error> {
        let next = self.lifecycle.begin(Operation::FeedHeader)?;
        self.headers.push(field);
        self.lifecycle.complete(next, Ok(()))
    }

    /// Signals the end of the header. The request is validated against the
    /// message header here.
    pub fn end_of_headers(&mut self) -> Result<(), Error> {
        let next = self.lifecycle.begin(Operation::EndOfHeaders)?;
        let result = self.prepare();
        self.lifecycle.complete(next, result)
    }

    fn prepare(&mut self) -> Result<(), Error> {
        let request = self.request.take().ok_or(SignerError::Internal)?;

        if request.output_buffer_size > self.config.max_output_size {
            return Err(SignerError::OutputBufferTooLarge.into());
        }

        let headers = HeaderFields::new(mem::take(&mut self.headers))
            .map_err(|_| SignerError::MissingFromHeader)?;

        let mut signer = Signer::prepare_signing(request, headers)?;
        if let Some(time) = self.config.fixed_system_time {
            signer.set_fixed_system_time(time);
        }

        self.signer = Some(signer);

        Ok(())
    }

    /// Feeds a chunk of the message body.
    pub fn feed_body(&mut self, chunk: &[u8]) -> Result<BodyHasherStance, Error> {
        let next = self.lifecycle.begin(Operation::FeedBody)?;
        let result = match &mut self.signer {
            Some(signer) => signer.process_body_chunk(chunk).map_err(Error::from),
            None => Err(SignerError::Internal.into()),
        };
        self.lifecycle.complete(next, result)
    }

    /// Signals the end of the message and returns the signature.
    pub fn end_of_message(&mut self) -> Result<SigningResult, Error> {
        let next = self.lifecycle.begin(Operation::EndOfMessage)?;
        let result = match self.signer.take() {
            Some(signer) => signer.sign().map_err(Error::from),
            None => Err(SignerError::Internal.into()),
        };
        self.lifecycle.complete(next, result)
    }
}

/// A session for verifying one message.
pub struct VerifyingSession {
    lifecycle: Lifecycle,
    config: Arc<EngineConfig>,
    headers: Vec<HeaderField>,
    verifier: Option<Verifier>,
}

impl VerifyingSession {
    pub(crate) fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            lifecycle: Lifecycle::new(),
            config,
            headers: vec![],
            verifier: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state
    }

    /// Feeds a raw header line of the form `Name: value`, which may be folded
    /// and may carry a terminating line break.
    pub fn feed_header(&mut self, line: &[u8]) -> Result<(), Error> {
        let next = self.lifecycle.begin(Operation::FeedHeader)?;
        let result = header::parse_header_field(line)
            .map(|field| self.headers.push(field))
            .map_err(Error::from);
        self.lifecycle.complete(next, result)
    }

    /// Feeds a parsed header field.
    pub fn feed_header_field(&mut self, field: HeaderField) -> Result<(), Error> {
        let next = self.lifecycle.begin(Operation::FeedHeader)?;
        self.headers.push(field);
        self.lifecycle.complete(next, Ok(()))
    }

    /// Signals the end of the header. The signatures are found and parsed here.
    pub fn end_of_headers(&mut self) -> Result<(), Error> {
        let next = self.lifecycle.begin(Operation::EndOfHeaders)?;

        // without any header there is nothing to verify
        let headers = mem::take(&mut self.headers);
        if let Ok(headers) = HeaderFields::new(headers) {
            self.verifier = Some(Verifier::verify_header(headers, &self.config));
        }

        self.lifecycle.complete(next, Ok(()))
    }

    /// Feeds a chunk of the message body.
    pub fn feed_body(&mut self, chunk: &[u8]) -> Result<BodyHasherStance, Error> {
        let next = self.lifecycle.begin(Operation::FeedBody)?;
        let result = match &mut self.verifier {
            Some(verifier) => verifier.process_body_chunk(chunk).map_err(Error::from),
            None => Ok(BodyHasherStance::Done),
        };
        self.lifecycle.complete(next, result)
    }

    /// Signals the end of the message, resolves the public keys and returns
    /// the verification report.
    pub async fn end_of_message<R>(&mut self, resolver: &R) -> Result<VerificationReport, Error>
    where
        R: KeyResolver + ?Sized,
    {
        let next = self.lifecycle.begin(Operation::EndOfMessage)?;
        let report = match self.verifier.take() {
            Some(verifier) => verifier.finish(resolver).await,
            None => VerificationReport::default(),
        };
        self.lifecycle.complete(next, Ok(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Status;

    #[test]
    fn transition_ok() {
        use Operation::*;
        use SessionState::*;

        let mut state = Created;
        for op in [FeedHeader, FeedHeader, EndOfHeaders, FeedBody, FeedBody, EndOfMessage] {
            state = state.transition(op).unwrap();
        }
        assert_eq!(state, Complete);

        assert_eq!(Created.transition(FeedHeader), Ok(HeadersFed(1)));
        assert_eq!(HeadersFed(1).transition(FeedHeader), Ok(HeadersFed(2)));
        assert_eq!(Created.transition(EndOfHeaders), Ok(HeadersDone));
        assert_eq!(HeadersDone.transition(EndOfMessage), Ok(Complete));
    }

    #[test]
    fn transition_illegal() {
        use Operation::*;
        use SessionState::*;

        let illegal = [
            (Created, FeedBody),
            (Created, EndOfMessage),
            (HeadersFed(3), FeedBody),
            (HeadersDone, FeedHeader),
            (HeadersDone, EndOfHeaders),
            (BodyFed, FeedHeader),
            (Complete, FeedBody),
            (Complete, EndOfMessage),
            (Failed, FeedHeader),
            (Failed, EndOfHeaders),
        ];

        for (state, operation) in illegal {
            let e = state.transition(operation).unwrap_err();
            assert_eq!(e, Error::IllegalTransition { state, operation });
            assert_eq!(e.status(), Status::InternalError);
        }
    }

    #[tokio::test]
    async fn verifying_session_fails_on_bad_order() {
        let mut session = VerifyingSession::new(Default::default());

        session.feed_header(b"From: me@example.com\r\n").unwrap();
        assert_eq!(session.state(), SessionState::HeadersFed(1));

        let e = session.feed_body(b"hi\r\n").unwrap_err();
        assert_eq!(e.status(), Status::InternalError);
        assert_eq!(session.state(), SessionState::Failed);

        assert!(session.end_of_headers().is_err());
    }

    #[tokio::test]
    async fn verifying_session_header_syntax_error() {
        let mut session = VerifyingSession::new(Default::default());

        let e = session.feed_header(b"no colon here").unwrap_err();

        assert_eq!(e.status(), Status::SyntaxError);
        assert_eq!(session.state(), SessionState::Failed);
    }
}
