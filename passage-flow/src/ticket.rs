//! The ticket-based recovery flow.
//!
//! A privileged user issues a single-use ticket for a target account; the
//! target redeems it to reset their password, their MFA configuration, or
//! both. The ticket itself travels as the permit of the redemption request,
//! and the provider invalidates it on first redemption regardless of the
//! outcome. `Mutual` tickets are scoped down: they cannot authorize
//! [`RecoveryOp::ResetAll`].

use crate::{decode_ticket, decode_token, ingress, require_permit, Empty, FlowCore, NewMfa, Snapshot};
use passage_core::envelope::{ok_slot, Permit};
use passage_core::transport::{Dispatch, Route};
use passage_core::{FutResult, Password, RequestError};
use passage_token::{SessionToken, Ticket};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use thiserror::Error;

/// How much a ticket can authorize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketKind {
    /// Reset the password or the MFA configuration, not both.
    Mutual,
    /// Any recovery operation, including [`RecoveryOp::ResetAll`].
    Full,
}

/// What the redeeming user asks to recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryOp {
    /// Replace the password, keep MFA.
    ResetPassword,
    /// Rebuild MFA, keep the password.
    ResetMfa,
    /// Both, password first.
    ResetAll,
}

/// Expected ways a redemption can be refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Error)]
pub enum TicketError {
    /// Unknown, expired or already-redeemed ticket.
    #[error("the ticket is invalid or already redeemed")]
    InvalidTicket,
    /// The operation exceeds what the ticket's kind allows.
    #[error("the requested operation is not allowed by this ticket")]
    InvalidOp,
}

/// A refused issuance. Carries the replacement token for the privileged
/// session.
#[must_use = "carries the replacement session token; dropping it unobserved ends the session"]
#[derive(Debug, Error)]
#[error("not allowed to issue recovery tickets")]
pub struct IssueRefused {
    /// The rotated session token of the would-be issuer.
    pub token: SessionToken,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum TicketArgs<'a> {
    IssueTicket {
        username: &'a str,
        kind: TicketKind,
        reason: &'a str,
        token: &'a str,
    },
    RedeemTicket {
        operation: RecoveryOp,
    },
    ResetPassword {
        password: &'a str,
    },
    SetupMfa {
        kind: NewMfa<'a>,
    },
    CompleteRecovery {},
}

#[derive(Deserialize)]
struct IssueRet {
    ticket: Option<String>,
    token: Option<String>,
    forbidden: Option<String>,
}

#[derive(Deserialize)]
struct RedeemRet {
    failure: Option<TicketError>,
}

#[derive(Deserialize)]
struct TotpSetupRet {
    setup_totp: Option<String>,
}

#[derive(Deserialize)]
struct CompleteRet {
    token: Option<String>,
}

/// Ingress for issuing and redeeming recovery tickets; obtained from
/// [`Passage::ticket`](crate::Passage::ticket).
pub struct Tickets {
    pub(crate) transport: Arc<dyn Dispatch>,
}

impl Tickets {
    /// Issue a ticket for `username`. Requires a privileged session; the
    /// passed token is consumed and its rotation returned next to the
    /// ticket.
    pub fn issue(
        self,
        token: SessionToken,
        username: impl Into<String>,
        kind: TicketKind,
        reason: impl Into<String>,
    ) -> FutResult<'static, (Ticket, SessionToken), IssueRefused> {
        let username = username.into();
        let reason = reason.into();
        FutResult::new(async move {
            let encoded = token.into_encoded();
            let args = TicketArgs::IssueTicket {
                username: &username,
                kind,
                reason: &reason,
                token: &encoded,
            };
            let (ret, _): (IssueRet, _) =
                ingress(&self.transport, Route::Recover, &args, None).await?;
            match (ret.ticket, ret.token, ret.forbidden) {
                (Some(ticket), Some(rotated), None) => Ok(Ok((
                    decode_ticket(&ticket)?,
                    decode_token(&rotated)?,
                ))),
                (None, None, Some(rotated)) => Ok(Err(IssueRefused {
                    token: decode_token(&rotated)?,
                })),
                _ => Err(RequestError::Deserialization),
            }
        })
    }

    /// Redeem a ticket for `operation`. The ticket rides as the request
    /// permit and is dead after this call either way.
    pub fn redeem(
        self,
        ticket: Ticket,
        operation: RecoveryOp,
    ) -> FutResult<'static, VerifiedTicket, TicketError> {
        FutResult::new(async move {
            let ticket_permit = Permit::new(ticket.into_encoded());
            let args = TicketArgs::RedeemTicket { operation };
            let (ret, permit): (RedeemRet, _) =
                ingress(&self.transport, Route::Recover, &args, Some(&ticket_permit)).await?;
            match ret.failure {
                None => Ok(Ok(VerifiedTicket {
                    core: FlowCore::new(self.transport, require_permit(permit)?),
                    operation,
                })),
                Some(failure) => Ok(Err(failure)),
            }
        })
    }
}

/// A redeemed ticket, not yet acted on.
pub struct VerifiedTicket {
    pub(crate) core: FlowCore,
    pub(crate) operation: RecoveryOp,
}

impl VerifiedTicket {
    /// The operation the ticket was redeemed for.
    pub fn operation(&self) -> RecoveryOp {
        self.operation
    }

    /// Route to the first recovery step. Local transition; the provider
    /// pinned the operation at redemption and the permit carries over.
    pub fn proceed(self) -> RecoveryPath {
        match self.operation {
            RecoveryOp::ResetPassword | RecoveryOp::ResetAll => {
                RecoveryPath::Password(ResetPassword {
                    core: self.core,
                    operation: self.operation,
                })
            }
            RecoveryOp::ResetMfa => RecoveryPath::Mfa(SetupMfa {
                core: self.core,
                operation: self.operation,
            }),
        }
    }
}

/// Where [`VerifiedTicket::proceed`] lands.
pub enum RecoveryPath {
    /// Password reset comes first.
    Password(ResetPassword),
    /// Straight to MFA rebuild.
    Mfa(SetupMfa),
}

/// What follows a password reset.
pub enum AfterPassword {
    /// Recovery is ready to conclude.
    Done(CompleteRecovery),
    /// A `ResetAll` continues into the MFA rebuild.
    Mfa(SetupMfa),
}

/// Set the replacement password.
pub struct ResetPassword {
    pub(crate) core: FlowCore,
    pub(crate) operation: RecoveryOp,
}

impl ResetPassword {
    /// The operation the ticket was redeemed for.
    pub fn operation(&self) -> RecoveryOp {
        self.operation
    }

    /// Submit the validated replacement password.
    pub fn password(self, password: &Password) -> FutResult<'static, AfterPassword, Infallible> {
        let password = password.clone();
        FutResult::new(async move {
            let args = TicketArgs::ResetPassword {
                password: password.expose(),
            };
            let (Empty {}, permit) = self.core.exchange(Route::Recover, &args).await?;
            let core = self.core.advance(permit)?;
            match self.operation {
                RecoveryOp::ResetAll => Ok(Ok(AfterPassword::Mfa(SetupMfa {
                    core,
                    operation: self.operation,
                }))),
                _ => Ok(Ok(AfterPassword::Done(CompleteRecovery {
                    core,
                    operation: self.operation,
                }))),
            }
        })
    }
}

/// Rebuild the MFA configuration from scratch with a single method.
pub struct SetupMfa {
    pub(crate) core: FlowCore,
    pub(crate) operation: RecoveryOp,
}

impl SetupMfa {
    /// The operation the ticket was redeemed for.
    pub fn operation(&self) -> RecoveryOp {
        self.operation
    }

    /// Enrol an authenticator app. Returns the provisioning URI next to the
    /// concluding state.
    pub fn totp(self) -> FutResult<'static, (String, CompleteRecovery), Infallible> {
        FutResult::new(async move {
            let args = TicketArgs::SetupMfa {
                kind: NewMfa::Totp(()),
            };
            let (ret, permit): (TotpSetupRet, _) = self.core.exchange(Route::Recover, &args).await?;
            let uri = ok_slot(ret.setup_totp)?;
            Ok(Ok((
                uri,
                CompleteRecovery {
                    core: self.core.advance(permit)?,
                    operation: self.operation,
                },
            )))
        })
    }

    /// Enrol a phone number for SMS delivery.
    pub fn sms(self, phone: impl Into<String>) -> FutResult<'static, CompleteRecovery, Infallible> {
        let phone = phone.into();
        FutResult::new(async move {
            let args = TicketArgs::SetupMfa {
                kind: NewMfa::Sms(&phone),
            };
            let (Empty {}, permit) = self.core.exchange(Route::Recover, &args).await?;
            Ok(Ok(CompleteRecovery {
                core: self.core.advance(permit)?,
                operation: self.operation,
            }))
        })
    }

    /// Enrol an email address for OTP delivery.
    pub fn email(
        self,
        address: impl Into<String>,
    ) -> FutResult<'static, CompleteRecovery, Infallible> {
        let address = address.into();
        FutResult::new(async move {
            let args = TicketArgs::SetupMfa {
                kind: NewMfa::Email(&address),
            };
            let (Empty {}, permit) = self.core.exchange(Route::Recover, &args).await?;
            Ok(Ok(CompleteRecovery {
                core: self.core.advance(permit)?,
                operation: self.operation,
            }))
        })
    }
}

/// Conclude the recovery.
pub struct CompleteRecovery {
    pub(crate) core: FlowCore,
    pub(crate) operation: RecoveryOp,
}

impl CompleteRecovery {
    /// The operation the ticket was redeemed for.
    pub fn operation(&self) -> RecoveryOp {
        self.operation
    }

    /// Commit every reset negotiated so far. The user is logged in with the
    /// returned token.
    pub fn complete(self) -> FutResult<'static, SessionToken, Infallible> {
        FutResult::new(async move {
            let (ret, _): (CompleteRet, _) = self
                .core
                .exchange(Route::Recover, &TicketArgs::CompleteRecovery {})
                .await?;
            Ok(Ok(decode_token(&ok_slot(ret.token)?)?))
        })
    }
}

/// Stage tags of the recovery flow's serialized records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketStage {
    /// Redeemed, not yet routed.
    VerifiedTicket,
    /// Awaiting the replacement password.
    ResetPassword,
    /// Awaiting the replacement MFA method.
    SetupMfa,
    /// Ready to conclude.
    CompleteRecovery,
}

/// Serializable snapshot of a recovery flow state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketRecord {
    /// Which state the record reconstitutes into.
    pub stage: TicketStage,
    /// The permit gating the next transition.
    pub permit: Permit,
    /// The operation the ticket was redeemed for.
    pub operation: RecoveryOp,
}

impl TicketRecord {
    fn new(stage: TicketStage, core: &FlowCore, operation: RecoveryOp) -> Self {
        TicketRecord {
            stage,
            permit: core.permit.clone(),
            operation,
        }
    }
}

impl Snapshot for VerifiedTicket {
    type Record = TicketRecord;

    fn record(&self) -> TicketRecord {
        TicketRecord::new(TicketStage::VerifiedTicket, &self.core, self.operation)
    }
}

impl Snapshot for ResetPassword {
    type Record = TicketRecord;

    fn record(&self) -> TicketRecord {
        TicketRecord::new(TicketStage::ResetPassword, &self.core, self.operation)
    }
}

impl Snapshot for SetupMfa {
    type Record = TicketRecord;

    fn record(&self) -> TicketRecord {
        TicketRecord::new(TicketStage::SetupMfa, &self.core, self.operation)
    }
}

impl Snapshot for CompleteRecovery {
    type Record = TicketRecord;

    fn record(&self) -> TicketRecord {
        TicketRecord::new(TicketStage::CompleteRecovery, &self.core, self.operation)
    }
}

/// A recovery state reconstituted from a serialized record.
pub enum ResumedTicket {
    /// Back at the routing point.
    VerifiedTicket(VerifiedTicket),
    /// Back at the password reset.
    ResetPassword(ResetPassword),
    /// Back at the MFA rebuild.
    SetupMfa(SetupMfa),
    /// Back at the conclusion.
    CompleteRecovery(CompleteRecovery),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_serialize_to_the_wire_shapes() {
        assert_eq!(
            serde_json::to_string(&TicketArgs::IssueTicket {
                username: "bob123",
                kind: TicketKind::Mutual,
                reason: "lost phone",
                token: "dG9rZW4",
            })
            .unwrap(),
            r#"{"issue_ticket":{"username":"bob123","kind":"Mutual","reason":"lost phone","token":"dG9rZW4"}}"#
        );
        assert_eq!(
            serde_json::to_string(&TicketArgs::RedeemTicket {
                operation: RecoveryOp::ResetAll
            })
            .unwrap(),
            r#"{"redeem_ticket":{"operation":"ResetAll"}}"#
        );
    }

    #[test]
    fn redemption_failures_decode_from_their_wire_names() {
        let ret: RedeemRet = serde_json::from_str(r#"{"failure":"InvalidOp"}"#).unwrap();
        assert_eq!(ret.failure, Some(TicketError::InvalidOp));
    }
}
