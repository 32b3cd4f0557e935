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
    engine::EngineConfig,
    header::HeaderFields,
    signature::{DkimSignature, DkimSignatureError, DkimSignatureErrorKind, DKIM_SIGNATURE_NAME},
    verifier::{PolicyError, VerifierError},
};
use std::str::{self, FromStr};
use tracing::trace;

/// The preliminary status of a signature evaluated at the end of the header.
#[derive(Debug, PartialEq)]
pub enum VerifyStatus {
    InProgress,
    Failed(VerifierError),
}

pub struct VerifyTask {
    pub index: usize,
    pub status: VerifyStatus,
    pub signature: Option<DkimSignature>,
    pub name: Option<Box<str>>,
    pub value: Option<Box<str>>,
    // reported only once the key lookup has succeeded
    pub policy: Option<PolicyError>,
}

impl VerifyTask {
    fn failed(index: usize, signature: Option<DkimSignature>, error: VerifierError) -> Self {
        Self {
            index,
            status: VerifyStatus::Failed(error),
            signature,
            name: None,
            value: None,
            policy: None,
        }
    }

    fn in_progress(index: usize, signature: DkimSignature, name: Box<str>, value: Box<str>) -> Self {
        Self {
            index,
            status: VerifyStatus::InProgress,
            signature: Some(signature),
            name: Some(name),
            value: Some(value),
            policy: None,
        }
    }
}

/// Finds and parses the *DKIM-Signature* headers, at most `max_signatures` of
/// them, and records the outcome of the configured policy checks that need no
/// key.
pub fn find_signatures(headers: &HeaderFields, config: &EngineConfig) -> Vec<VerifyTask> {
    let mut tasks = vec![];

    let dkim_headers = headers
        .as_ref()
        .iter()
        .enumerate()
        .filter(|(_, (name, _))| *name == DKIM_SIGNATURE_NAME)
        .take(config.max_signatures);

    for (idx, (name, value)) in dkim_headers {
        trace!(index = idx, "found DKIM-Signature header");

        // well-formed DKIM-Signature contain only UTF-8
        let Ok(value) = str::from_utf8(value.as_ref()) else {
            let error = DkimSignatureError {
                domain: None,
                selector: None,
                kind: DkimSignatureErrorKind::ValueSyntax,
            };
            tasks.push(VerifyTask::failed(idx, None, VerifierError::DkimSignatureFormat(error)));
            continue;
        };

        let sig = match DkimSignature::from_str(value) {
            Ok(sig) => sig,
            Err(e) => {
                trace!("unusable DKIM-Signature: {e}");
                tasks.push(VerifyTask::failed(idx, None, VerifierError::DkimSignatureFormat(e)));
                continue;
            }
        };

        let policy = check_policy(&sig, config).err();
        if let Some(e) = &policy {
            trace!("signature rejected by policy: {e}");
        }

        let mut task = VerifyTask::in_progress(idx, sig, name.as_ref().into(), value.into());
        task.policy = policy;

        tasks.push(task);
    }

    tasks
}

fn check_policy(sig: &DkimSignature, config: &EngineConfig) -> Result<(), PolicyError> {
    if config
        .required_signed_headers
        .iter()
        .any(|h| !sig.signed_headers.contains(h))
    {
        return Err(PolicyError::RequiredHeadersNotSigned);
    }

    let current_t = config.current_timestamp();
    let delta = config.time_tolerance.as_secs();

    if config.fail_if_expired {
        if let Some(t) = sig.expiration {
            if current_t >= t.saturating_add(delta) {
                return Err(PolicyError::SignatureExpired);
            }
        }
    }

    if config.fail_if_in_future {
        if let Some(t) = sig.timestamp {
            if t.saturating_sub(delta) > current_t {
                return Err(PolicyError::TimestampInFuture);
            }
        }
    }

    Ok(())
}
