//! The MFA-update flow.
//!
//! The user re-authenticates with an existing method, then either removes a
//! configured method or enrols and verifies a new one. The provider performs
//! *no* mutation of the account's MFA configuration before the finalization
//! call; every intermediate state is pure verification and negotiation, so
//! an abandoned flow leaves the account untouched.
//!
//! The ingress and the finalization each consume a session token and yield
//! a rotated one, on the error path too, so a refused update never logs the
//! user out.

use crate::{decode_token, ingress, require_permit, Empty, FlowCore, NewMfa, Snapshot};
use passage_core::envelope::{ok_slot, two_slot, Permit};
use passage_core::transport::{Dispatch, Route};
use passage_core::{FutResult, MfaKind, RequestError, SimpleOtp, Totp};
use passage_token::SessionToken;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum UpdateArgs<'a> {
    HelloUpdate { token: &'a str },
    RequestCheck { kind: MfaKind },
    CheckSimpleOtp { guess: &'a str },
    CheckTotp { guess: &'a str },
    RemoveMfa { kind: MfaKind },
    SetupMfa { kind: NewMfa<'a> },
    VerifySimpleOtp { guess: &'a str },
    VerifyTotp { guess: &'a str },
    FinalizeRemoval { token: &'a str },
    FinalizeUpdate { token: &'a str },
}

#[derive(Deserialize)]
struct HelloUpdateRet {
    hello_update: Option<HelloUpdate>,
}

#[derive(Deserialize)]
struct HelloUpdate {
    token: String,
    old_mfa: Vec<MfaKind>,
}

#[derive(Deserialize)]
struct CheckGuessRet {
    maybe_retry: Option<bool>,
}

#[derive(Deserialize)]
struct RemoveRet {
    invalid_mfa: Option<bool>,
}

#[derive(Deserialize)]
struct TotpSetupRet {
    setup_totp: Option<String>,
}

#[derive(Deserialize)]
struct VerifySimpleRet {
    maybe_retry_simple: Option<bool>,
}

#[derive(Deserialize)]
struct VerifyTotpRet {
    maybe_retry_totp: Option<bool>,
}

#[derive(Deserialize)]
struct FinalizeRet {
    token: Option<String>,
    update_failed: Option<String>,
}

/// Ingress of the MFA-update flow; obtained from
/// [`Passage::update_mfa`](crate::Passage::update_mfa).
pub struct UpdateMfa {
    pub(crate) transport: Arc<dyn Dispatch>,
}

impl UpdateMfa {
    /// Open the flow. Consumes the session token; the rotated replacement is
    /// returned next to the first state and must be kept for finalization.
    pub fn hello(
        self,
        token: SessionToken,
    ) -> FutResult<'static, (StartUpdate, SessionToken), Infallible> {
        FutResult::new(async move {
            let encoded = token.into_encoded();
            let args = UpdateArgs::HelloUpdate { token: &encoded };
            let (ret, permit): (HelloUpdateRet, _) =
                ingress(&self.transport, Route::UpdateMfa, &args, None).await?;
            let hello = ok_slot(ret.hello_update)?;
            let state = StartUpdate {
                core: FlowCore::new(self.transport, require_permit(permit)?),
                old: hello.old_mfa,
            };
            Ok(Ok((state, decode_token(&hello.token)?)))
        })
    }
}

/// Choose which already-configured method to re-authenticate with.
///
/// Selecting a kind the account does not have is refused locally, returning
/// the state unchanged.
pub struct StartUpdate {
    pub(crate) core: FlowCore,
    pub(crate) old: Vec<MfaKind>,
}

impl StartUpdate {
    /// The account's current MFA configuration.
    pub fn old_mfa(&self) -> &[MfaKind] {
        &self.old
    }

    /// Be challenged over SMS.
    pub fn sms(self) -> FutResult<'static, CheckOtp, StartUpdate> {
        self.request_check(MfaKind::Sms)
    }

    /// Be challenged over email.
    pub fn email(self) -> FutResult<'static, CheckOtp, StartUpdate> {
        self.request_check(MfaKind::Email)
    }

    /// Answer with the authenticator app.
    pub fn totp(self) -> FutResult<'static, CheckTotp, StartUpdate> {
        if !self.old.contains(&MfaKind::Totp) {
            return FutResult::err(self);
        }
        FutResult::new(async move {
            let args = UpdateArgs::RequestCheck {
                kind: MfaKind::Totp,
            };
            let (Empty {}, permit) = self.core.exchange(Route::UpdateMfa, &args).await?;
            Ok(Ok(CheckTotp {
                core: self.core.advance(permit)?,
                old: self.old,
            }))
        })
    }

    fn request_check(self, kind: MfaKind) -> FutResult<'static, CheckOtp, StartUpdate> {
        if !self.old.contains(&kind) {
            return FutResult::err(self);
        }
        FutResult::new(async move {
            let args = UpdateArgs::RequestCheck { kind };
            let (Empty {}, permit) = self.core.exchange(Route::UpdateMfa, &args).await?;
            Ok(Ok(CheckOtp {
                core: self.core.advance(permit)?,
                old: self.old,
                kind,
            }))
        })
    }
}

/// Re-authentication against an OTP delivered to an existing method.
pub struct CheckOtp {
    pub(crate) core: FlowCore,
    pub(crate) old: Vec<MfaKind>,
    pub(crate) kind: MfaKind,
}

impl CheckOtp {
    /// Which delivery channel was chosen.
    pub fn kind(&self) -> MfaKind {
        self.kind
    }

    /// Present the delivered passcode. A wrong guess returns the flow to
    /// method selection under a fresh permit.
    pub fn guess(self, otp: SimpleOtp) -> FutResult<'static, Decide, StartUpdate> {
        FutResult::new(async move {
            let args = UpdateArgs::CheckSimpleOtp {
                guess: otp.as_str(),
            };
            let (ret, permit): (CheckGuessRet, _) =
                self.core.exchange(Route::UpdateMfa, &args).await?;
            let core = self.core.advance(permit)?;
            match ret.maybe_retry {
                None => Ok(Ok(Decide {
                    core,
                    old: self.old,
                })),
                Some(_) => Ok(Err(StartUpdate {
                    core,
                    old: self.old,
                })),
            }
        })
    }
}

/// Re-authentication against the authenticator app.
pub struct CheckTotp {
    pub(crate) core: FlowCore,
    pub(crate) old: Vec<MfaKind>,
}

impl CheckTotp {
    /// Present the authenticator code. A wrong guess returns the flow to
    /// method selection under a fresh permit.
    pub fn guess(self, code: Totp) -> FutResult<'static, Decide, StartUpdate> {
        FutResult::new(async move {
            let args = UpdateArgs::CheckTotp {
                guess: code.as_str(),
            };
            let (ret, permit): (CheckGuessRet, _) =
                self.core.exchange(Route::UpdateMfa, &args).await?;
            let core = self.core.advance(permit)?;
            match ret.maybe_retry {
                None => Ok(Ok(Decide {
                    core,
                    old: self.old,
                })),
                Some(_) => Ok(Err(StartUpdate {
                    core,
                    old: self.old,
                })),
            }
        })
    }
}

/// Why an MFA-removal request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CannotRemoveReason {
    /// Removing the only configured method would lock MFA off entirely.
    IsOnlyMfaKind,
    /// The kind is not part of the account's configuration.
    NotSetUp,
    /// The provider flagged the request as inconsistent with its own view
    /// of the configuration.
    Upstream,
}

impl fmt::Display for CannotRemoveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CannotRemoveReason::IsOnlyMfaKind => "cannot remove the only configured MFA kind",
            CannotRemoveReason::NotSetUp => "the kind is not set up on this account",
            CannotRemoveReason::Upstream => "MFA state tampering in removal",
        })
    }
}

/// A refused removal. The flow stays at [`Decide`]; the state rides along
/// so another choice can be made.
#[must_use = "carries the live Decide state; dropping it unobserved abandons the flow"]
#[derive(Error)]
#[error("cannot remove MFA kind: {reason}")]
pub struct CannotRemoveMfa {
    /// What was wrong with the request.
    pub reason: CannotRemoveReason,
    /// The state to continue from.
    pub state: Decide,
}

impl fmt::Debug for CannotRemoveMfa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CannotRemoveMfa")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

/// Branch point: remove an existing method, or enrol a new one.
pub struct Decide {
    pub(crate) core: FlowCore,
    pub(crate) old: Vec<MfaKind>,
}

impl Decide {
    /// The account's current MFA configuration.
    pub fn old_mfa(&self) -> &[MfaKind] {
        &self.old
    }

    /// Request removal of `kind`. Refused locally when `kind` is not
    /// configured or is the only configured method; the provider re-checks
    /// and reports an `invalid_mfa` slot when its view disagrees.
    pub fn remove(self, kind: MfaKind) -> FutResult<'static, FinalizeRemoval, CannotRemoveMfa> {
        if !self.old.contains(&kind) {
            return FutResult::err(CannotRemoveMfa {
                reason: CannotRemoveReason::NotSetUp,
                state: self,
            });
        }
        if self.old.len() == 1 {
            return FutResult::err(CannotRemoveMfa {
                reason: CannotRemoveReason::IsOnlyMfaKind,
                state: self,
            });
        }
        FutResult::new(async move {
            let args = UpdateArgs::RemoveMfa { kind };
            let (ret, permit): (RemoveRet, _) = self.core.exchange(Route::UpdateMfa, &args).await?;
            let core = self.core.advance(permit)?;
            match ret.invalid_mfa {
                None => Ok(Ok(FinalizeRemoval {
                    core,
                    old: self.old,
                })),
                Some(_) => {
                    log::warn!("provider rejected removal of a kind it reported as configured");
                    Ok(Err(CannotRemoveMfa {
                        reason: CannotRemoveReason::Upstream,
                        state: Decide {
                            core,
                            old: self.old,
                        },
                    }))
                }
            }
        })
    }

    /// Enrol an authenticator app as the new method. Refused locally when
    /// one is already configured.
    pub fn totp(self) -> FutResult<'static, EnsureTotpSetup, Decide> {
        if self.old.contains(&MfaKind::Totp) {
            return FutResult::err(self);
        }
        FutResult::new(async move {
            let args = UpdateArgs::SetupMfa {
                kind: NewMfa::Totp(()),
            };
            let (ret, permit): (TotpSetupRet, _) =
                self.core.exchange(Route::UpdateMfa, &args).await?;
            let uri = ok_slot(ret.setup_totp)?;
            Ok(Ok(EnsureTotpSetup {
                core: self.core.advance(permit)?,
                old: self.old,
                uri: Some(uri),
            }))
        })
    }

    /// Enrol a phone number as the new method.
    pub fn sms(self, phone: impl Into<String>) -> FutResult<'static, EnsureOtpSetup, Decide> {
        if self.old.contains(&MfaKind::Sms) {
            return FutResult::err(self);
        }
        let phone = phone.into();
        FutResult::new(async move {
            let args = UpdateArgs::SetupMfa {
                kind: NewMfa::Sms(&phone),
            };
            let (Empty {}, permit) = self.core.exchange(Route::UpdateMfa, &args).await?;
            Ok(Ok(EnsureOtpSetup {
                core: self.core.advance(permit)?,
                old: self.old,
                kind: MfaKind::Sms,
            }))
        })
    }

    /// Enrol an email address as the new method.
    pub fn email(self, address: impl Into<String>) -> FutResult<'static, EnsureOtpSetup, Decide> {
        if self.old.contains(&MfaKind::Email) {
            return FutResult::err(self);
        }
        let address = address.into();
        FutResult::new(async move {
            let args = UpdateArgs::SetupMfa {
                kind: NewMfa::Email(&address),
            };
            let (Empty {}, permit) = self.core.exchange(Route::UpdateMfa, &args).await?;
            Ok(Ok(EnsureOtpSetup {
                core: self.core.advance(permit)?,
                old: self.old,
                kind: MfaKind::Email,
            }))
        })
    }
}

/// Prove the user controls the new delivery method. Loops on itself until
/// the guess is right.
pub struct EnsureOtpSetup {
    pub(crate) core: FlowCore,
    pub(crate) old: Vec<MfaKind>,
    pub(crate) kind: MfaKind,
}

impl EnsureOtpSetup {
    /// The method being verified.
    pub fn kind(&self) -> MfaKind {
        self.kind
    }

    /// Present the delivered passcode.
    pub fn guess(self, otp: SimpleOtp) -> FutResult<'static, FinalizeUpdate, EnsureOtpSetup> {
        FutResult::new(async move {
            let args = UpdateArgs::VerifySimpleOtp {
                guess: otp.as_str(),
            };
            let (ret, permit): (VerifySimpleRet, _) =
                self.core.exchange(Route::UpdateMfa, &args).await?;
            let core = self.core.advance(permit)?;
            match ret.maybe_retry_simple {
                None => Ok(Ok(FinalizeUpdate {
                    core,
                    old: self.old,
                })),
                Some(_) => Ok(Err(EnsureOtpSetup {
                    core,
                    old: self.old,
                    kind: self.kind,
                })),
            }
        })
    }
}

/// Prove the user's authenticator accepted the new TOTP secret. Loops on
/// itself until the guess is right; retries carry no URI.
pub struct EnsureTotpSetup {
    pub(crate) core: FlowCore,
    pub(crate) old: Vec<MfaKind>,
    pub(crate) uri: Option<String>,
}

impl EnsureTotpSetup {
    /// The provisioning URI to render as a QR code, on the first attempt.
    pub fn provisioning_uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    /// Present the first code from the authenticator.
    pub fn guess(self, code: Totp) -> FutResult<'static, FinalizeUpdate, EnsureTotpSetup> {
        FutResult::new(async move {
            let args = UpdateArgs::VerifyTotp {
                guess: code.as_str(),
            };
            let (ret, permit): (VerifyTotpRet, _) =
                self.core.exchange(Route::UpdateMfa, &args).await?;
            let core = self.core.advance(permit)?;
            match ret.maybe_retry_totp {
                None => Ok(Ok(FinalizeUpdate {
                    core,
                    old: self.old,
                })),
                Some(_) => Ok(Err(EnsureTotpSetup {
                    core,
                    old: self.old,
                    uri: None,
                })),
            }
        })
    }
}

/// A refused finalization. Carries the replacement session token; the
/// account's MFA configuration is unchanged and the user is still logged in.
#[must_use = "carries the replacement session token; dropping it unobserved ends the session"]
#[derive(Debug, Error)]
#[error("the provider refused to commit the MFA update")]
pub struct UpdateFailed {
    /// The rotated session token.
    pub token: SessionToken,
}

async fn finalize(
    core: FlowCore,
    route_args: UpdateArgs<'_>,
) -> Result<Result<SessionToken, UpdateFailed>, RequestError> {
    let (ret, _): (FinalizeRet, _) = core.exchange(Route::UpdateMfa, &route_args).await?;
    match two_slot(ret.token, ret.update_failed)? {
        Ok(rotated) => Ok(Ok(decode_token(&rotated)?)),
        Err(rotated) => Ok(Err(UpdateFailed {
            token: decode_token(&rotated)?,
        })),
    }
}

/// Commit the negotiated removal. This is the first call that mutates the
/// account.
pub struct FinalizeRemoval {
    pub(crate) core: FlowCore,
    pub(crate) old: Vec<MfaKind>,
}

impl FinalizeRemoval {
    /// Commit, consuming the session token and returning its rotation.
    pub fn finalize(self, token: SessionToken) -> FutResult<'static, SessionToken, UpdateFailed> {
        FutResult::new(async move {
            let encoded = token.into_encoded();
            finalize(self.core, UpdateArgs::FinalizeRemoval { token: &encoded }).await
        })
    }
}

/// Commit the negotiated enrolment. This is the first call that mutates the
/// account.
pub struct FinalizeUpdate {
    pub(crate) core: FlowCore,
    pub(crate) old: Vec<MfaKind>,
}

impl FinalizeUpdate {
    /// Commit, consuming the session token and returning its rotation.
    pub fn finalize(self, token: SessionToken) -> FutResult<'static, SessionToken, UpdateFailed> {
        FutResult::new(async move {
            let encoded = token.into_encoded();
            finalize(self.core, UpdateArgs::FinalizeUpdate { token: &encoded }).await
        })
    }
}

/// Stage tags of the MFA-update flow's serialized records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateMfaStage {
    /// Choosing the method to re-authenticate with.
    StartUpdate,
    /// Re-authenticating against a delivered OTP.
    CheckOtp,
    /// Re-authenticating against the authenticator.
    CheckTotp,
    /// Choosing between removal and enrolment.
    Decide,
    /// Committing a removal.
    FinalizeRemoval,
    /// Verifying the new delivery method.
    EnsureOtpSetup,
    /// Verifying the new authenticator.
    EnsureTotpSetup,
    /// Committing an enrolment.
    FinalizeUpdate,
}

/// Serializable snapshot of an MFA-update flow state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMfaRecord {
    /// Which state the record reconstitutes into.
    pub stage: UpdateMfaStage,
    /// The permit gating the next transition.
    pub permit: Permit,
    /// The account's MFA configuration as reported at ingress.
    pub old_mfa: Vec<MfaKind>,
    /// The delivery channel in play; populated at [`UpdateMfaStage::CheckOtp`]
    /// and [`UpdateMfaStage::EnsureOtpSetup`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MfaKind>,
}

impl UpdateMfaRecord {
    fn new(stage: UpdateMfaStage, core: &FlowCore, old: &[MfaKind], kind: Option<MfaKind>) -> Self {
        UpdateMfaRecord {
            stage,
            permit: core.permit.clone(),
            old_mfa: old.to_vec(),
            kind,
        }
    }
}

impl Snapshot for StartUpdate {
    type Record = UpdateMfaRecord;

    fn record(&self) -> UpdateMfaRecord {
        UpdateMfaRecord::new(UpdateMfaStage::StartUpdate, &self.core, &self.old, None)
    }
}

impl Snapshot for CheckOtp {
    type Record = UpdateMfaRecord;

    fn record(&self) -> UpdateMfaRecord {
        UpdateMfaRecord::new(
            UpdateMfaStage::CheckOtp,
            &self.core,
            &self.old,
            Some(self.kind),
        )
    }
}

impl Snapshot for CheckTotp {
    type Record = UpdateMfaRecord;

    fn record(&self) -> UpdateMfaRecord {
        UpdateMfaRecord::new(UpdateMfaStage::CheckTotp, &self.core, &self.old, None)
    }
}

impl Snapshot for Decide {
    type Record = UpdateMfaRecord;

    fn record(&self) -> UpdateMfaRecord {
        UpdateMfaRecord::new(UpdateMfaStage::Decide, &self.core, &self.old, None)
    }
}

impl Snapshot for EnsureOtpSetup {
    type Record = UpdateMfaRecord;

    fn record(&self) -> UpdateMfaRecord {
        UpdateMfaRecord::new(
            UpdateMfaStage::EnsureOtpSetup,
            &self.core,
            &self.old,
            Some(self.kind),
        )
    }
}

impl Snapshot for EnsureTotpSetup {
    type Record = UpdateMfaRecord;

    fn record(&self) -> UpdateMfaRecord {
        UpdateMfaRecord::new(UpdateMfaStage::EnsureTotpSetup, &self.core, &self.old, None)
    }
}

impl Snapshot for FinalizeRemoval {
    type Record = UpdateMfaRecord;

    fn record(&self) -> UpdateMfaRecord {
        UpdateMfaRecord::new(UpdateMfaStage::FinalizeRemoval, &self.core, &self.old, None)
    }
}

impl Snapshot for FinalizeUpdate {
    type Record = UpdateMfaRecord;

    fn record(&self) -> UpdateMfaRecord {
        UpdateMfaRecord::new(UpdateMfaStage::FinalizeUpdate, &self.core, &self.old, None)
    }
}

/// An MFA-update state reconstituted from a serialized record.
pub enum ResumedUpdateMfa {
    /// Back at re-authentication method selection.
    StartUpdate(StartUpdate),
    /// Back at delivered-OTP re-authentication.
    CheckOtp(CheckOtp),
    /// Back at authenticator re-authentication.
    CheckTotp(CheckTotp),
    /// Back at the removal/enrolment branch point.
    Decide(Decide),
    /// Back at removal commitment.
    FinalizeRemoval(FinalizeRemoval),
    /// Back at new-method verification.
    EnsureOtpSetup(EnsureOtpSetup),
    /// Back at new-authenticator verification (bare sub-shape, no URI).
    EnsureTotpSetup(EnsureTotpSetup),
    /// Back at enrolment commitment.
    FinalizeUpdate(FinalizeUpdate),
}
