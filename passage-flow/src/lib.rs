//! # Passage Flow
//!
//! The flow engine of the Passage identity SDK: typed, explicitly enumerated
//! state machines for login, signup, legacy-account migration, account
//! deletion, MFA updates and ticket-based recovery.
//!
//! Every state value owns the permit gating its one possible transition, and
//! every transition consumes the state, so stale continuations are unusable
//! by construction. Each state can also be snapshotted to JSON and resumed
//! on a different process instance; the provider validates the permit, so a
//! tampered record is rejected server-side.
//!
//! Transitions resolve to a [`FutResult`](passage_core::FutResult): the
//! outer layer aborts on request failures, the inner layer carries expected
//! flow outcomes such as "wrong guess, here is the retry state".

#![warn(missing_docs)]

/// The top-level client handle.
pub mod client;

/// The account-deletion flow.
pub mod delete;

/// The login flow.
pub mod login;

/// The legacy-account migration flow.
pub mod migrate;

/// MFA-enrolment states shared by signup and migration.
pub mod setup;

/// The signup flow.
pub mod signup;

/// The ticket-based recovery flow.
pub mod ticket;

/// The MFA-update flow.
pub mod update_mfa;

pub use client::{Opaque, Passage, PassageBuilder, ResumeError};

use passage_core::envelope::{self, Permit, Reply};
use passage_core::transport::{Dispatch, Route};
use passage_core::{Base64Error, RequestError};
use passage_token::{SessionToken, Ticket};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Implemented by every resumable flow state.
pub trait Snapshot {
    /// The serializable record for this flow.
    type Record: Serialize;

    /// Snapshot the state for the stateless-server pattern. The live state
    /// should be dropped once its record has been handed out; the record is
    /// the continuation now.
    fn record(&self) -> Self::Record;

    /// JSON form of [`Snapshot::record`].
    fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.record())
    }
}

/// The transport handle and permit a live state owns.
pub(crate) struct FlowCore {
    pub(crate) transport: Arc<dyn Dispatch>,
    pub(crate) permit: Permit,
}

impl FlowCore {
    pub(crate) fn new(transport: Arc<dyn Dispatch>, permit: Permit) -> Self {
        FlowCore { transport, permit }
    }

    /// One permit-gated exchange: send args, split the reply.
    pub(crate) async fn exchange<A, R>(
        &self,
        route: Route,
        args: &A,
    ) -> Result<(R, Option<Permit>), RequestError>
    where
        A: Serialize + Sync,
        R: DeserializeOwned,
    {
        let reply: Reply<R> =
            envelope::call(self.transport.as_ref(), route, args, Some(&self.permit)).await?;
        let ret = reply.ret.ok_or(RequestError::Deserialization)?;
        Ok((ret, reply.permit))
    }

    /// Successor core holding the rotated permit. A continuing flow whose
    /// reply carried no permit is a malformed reply.
    pub(crate) fn advance(self, permit: Option<Permit>) -> Result<Self, RequestError> {
        let permit = permit.ok_or(RequestError::Deserialization)?;
        Ok(FlowCore {
            transport: self.transport,
            permit,
        })
    }
}

/// An exchange from outside any state: no permit, or one supplied from a
/// non-state source such as a recovery ticket.
pub(crate) async fn ingress<A, R>(
    transport: &Arc<dyn Dispatch>,
    route: Route,
    args: &A,
    permit: Option<&Permit>,
) -> Result<(R, Option<Permit>), RequestError>
where
    A: Serialize + Sync,
    R: DeserializeOwned,
{
    let reply: Reply<R> = envelope::call(transport.as_ref(), route, args, permit).await?;
    let ret = reply.ret.ok_or(RequestError::Deserialization)?;
    Ok((ret, reply.permit))
}

pub(crate) fn require_permit(permit: Option<Permit>) -> Result<Permit, RequestError> {
    permit.ok_or(RequestError::Deserialization)
}

/// A token arriving in a response body. Failing to decode it means the
/// provider broke the wire contract, not that the caller's input was bad.
pub(crate) fn decode_token(encoded: &str) -> Result<SessionToken, RequestError> {
    SessionToken::from_encoded(encoded).map_err(|Base64Error::InvalidEncoding| {
        log::warn!("provider returned a malformed session token");
        RequestError::Deserialization
    })
}

pub(crate) fn decode_ticket(encoded: &str) -> Result<Ticket, RequestError> {
    Ticket::from_encoded(encoded).map_err(|Base64Error::InvalidEncoding| {
        log::warn!("provider returned a malformed recovery ticket");
        RequestError::Deserialization
    })
}

/// An ok-reply with no payload.
#[derive(Debug, Deserialize)]
pub(crate) struct Empty {}

/// Wire form of a new MFA method being enrolled. TOTP needs no delivery
/// address; SMS and email carry theirs.
#[derive(Debug, Serialize)]
pub(crate) enum NewMfa<'a> {
    Totp(()),
    Sms(&'a str),
    Email(&'a str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_mfa_uses_tagged_object_encodings() {
        assert_eq!(
            serde_json::to_string(&NewMfa::Totp(())).unwrap(),
            r#"{"Totp":null}"#
        );
        assert_eq!(
            serde_json::to_string(&NewMfa::Sms("+15550100")).unwrap(),
            r#"{"Sms":"+15550100"}"#
        );
        assert_eq!(
            serde_json::to_string(&NewMfa::Email("bob@example.com")).unwrap(),
            r#"{"Email":"bob@example.com"}"#
        );
    }
}
